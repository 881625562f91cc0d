//! The estimated extents must hold every converted event.

use proptest::prelude::*;
use rustmd_algorithms::{
    convert_to_md, CancellationToken, ConvertToMdConfig, EnergyMode, GeometryRegistry, NoProgress,
    QModeKind,
};
use rustmd_core::units::constants::ENERGY_TOF_FACTOR;
use rustmd_core::{InMemoryWorkspace, SimpleInstrument, Unit, EFIXED_LOG, EI_LOG};

const L1: f64 = 10.0;

fn instrument(name: &str, ef: Option<f64>) -> SimpleInstrument {
    let positions = [
        [0.0, 2.0, 3.0],
        [2.0, 0.0, -3.0],
        [-1.0, -2.0, 1.0],
        [0.0, 0.0, 4.0],
    ];
    let mut inst = SimpleInstrument::new(name, [0.0, 0.0, -L1], [0.0; 3]);
    for (id, p) in (1..).zip(positions) {
        inst = match ef {
            Some(ef) => inst.with_analyser(id, p, ef),
            None => inst.with_detector(id, p),
        };
    }
    inst
}

fn workspace(inst: SimpleInstrument, t0: f64, width: f64, nbins: usize) -> InMemoryWorkspace {
    let mut ws = InMemoryWorkspace::new(Unit::Tof, inst);
    #[allow(clippy::cast_precision_loss)]
    let x: Vec<f64> = (0..=nbins)
        .map(|i| t0 + width * i as f64 / nbins as f64)
        .collect();
    for id in 1..=4 {
        ws.add_histogram(vec![id], x.clone(), vec![1.0; nbins], None)
            .unwrap();
    }
    ws
}

fn dropped(ws: &InMemoryWorkspace, config: &ConvertToMdConfig) -> (u64, u64) {
    let out = convert_to_md(
        ws,
        config,
        &mut GeometryRegistry::new(),
        None,
        &NoProgress,
        &CancellationToken::new(),
    )
    .unwrap();
    let run = out.last_run().unwrap();
    (run.events_inserted, run.events_dropped)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn elastic_extents_hold_all_events(
        t0 in 500.0f64..20_000.0,
        width in 10.0f64..10_000.0,
        nbins in 1usize..40,
        q3d in any::<bool>(),
    ) {
        let ws = workspace(instrument("elastic", None), t0, width, nbins);
        let mode = if q3d { QModeKind::Q3D } else { QModeKind::ModQ };
        let config = ConvertToMdConfig::new(mode, EnergyMode::Elastic);
        let (inserted, lost) = dropped(&ws, &config);
        prop_assert_eq!(lost, 0);
        prop_assert_eq!(inserted, 4 * nbins as u64);
    }

    #[test]
    fn direct_extents_hold_all_events(
        ei in 5.0f64..200.0,
        start in 0.01f64..1.0,
        width in 10.0f64..10_000.0,
        nbins in 1usize..40,
        q3d in any::<bool>(),
    ) {
        let t_fixed = L1 * (ENERGY_TOF_FACTOR / ei).sqrt();
        let mut ws = workspace(instrument("direct", None), t_fixed * (1.0 + start), width, nbins);
        ws.logs.add_number(EI_LOG, ei);
        let mode = if q3d { QModeKind::Q3D } else { QModeKind::ModQ };
        let config = ConvertToMdConfig::new(mode, EnergyMode::Direct);
        let (inserted, lost) = dropped(&ws, &config);
        prop_assert_eq!(lost, 0);
        prop_assert_eq!(inserted, 4 * nbins as u64);
    }

    #[test]
    fn indirect_extents_hold_all_events(
        ef in 1.0f64..20.0,
        start in 0.01f64..1.0,
        width in 10.0f64..10_000.0,
        nbins in 1usize..40,
    ) {
        // longest analyser leg is 4 m
        let t_fixed = 4.0 * (ENERGY_TOF_FACTOR / ef).sqrt();
        let mut ws = workspace(instrument("indirect", Some(ef)), t_fixed * (1.0 + start), width, nbins);
        ws.logs.add_number(EFIXED_LOG, ef);
        let config = ConvertToMdConfig::new(QModeKind::Q3D, EnergyMode::Indirect);
        let (inserted, lost) = dropped(&ws, &config);
        prop_assert_eq!(lost, 0);
        prop_assert_eq!(inserted, 4 * nbins as u64);
    }
}
