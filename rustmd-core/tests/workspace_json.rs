#![cfg(feature = "serde")]

use rustmd_core::{
    Goniometer, GoniometerAxis, InMemoryWorkspace, InstrumentGeometry, LogValue, OrientedLattice,
    SimpleInstrument, SpectraSource, SpectrumData, TofEvent, Unit, EI_LOG,
};

const WORKSPACE: &str = r#"{
    "x_unit": "TOF",
    "instrument": {
        "name": "MERLIN",
        "id": 7,
        "source": [0.0, 0.0, -12.0],
        "detectors": {
            "1": { "position": [0.0, 1.0, 2.5] },
            "2": { "position": [1.0, 0.0, 2.5], "efixed": 3.5 }
        }
    },
    "spectra": [
        { "detector_ids": [1], "x": [100.0, 200.0, 300.0], "y": [4.0, 9.0] },
        { "detector_ids": [2], "events": [{ "tof": 150.0 }, { "tof": 250.0, "weight": 2.0, "error_sq": 4.0 }] }
    ],
    "logs": {
        "Ei": 25.0,
        "temperature": { "times": [0.0, 10.0], "values": [4.0, 6.0] },
        "sample": "vanadium"
    },
    "lattice": { "a": 3.0, "b": 3.0, "c": 5.0 },
    "goniometer": { "axes": [{ "name": "psi", "direction": [0.0, 1.0, 0.0], "angle": 30.0 }] }
}"#;

#[test]
fn test_load_workspace_json() {
    let ws: InMemoryWorkspace = serde_json::from_str(WORKSPACE).unwrap();
    ws.validate().unwrap();

    assert_eq!(ws.x_unit(), Unit::Tof);
    assert_eq!(ws.spectrum_count(), 2);
    assert_eq!(ws.detector_ids(1), &[2]);
    assert_eq!(ws.instrument().name(), "MERLIN");
    assert_eq!(ws.instrument().detector_efixed(2), Some(3.5));
    assert_eq!(ws.instrument().sample_position(), nalgebra::Vector3::zeros());

    match ws.spectrum(0).unwrap() {
        SpectrumData::Histogram { x, y, e } => {
            assert_eq!(x.len(), 3);
            assert_eq!(y, &[4.0, 9.0]);
            assert!(e.is_none());
        }
        SpectrumData::Events(_) => panic!("expected histogram"),
    }
    match ws.spectrum(1).unwrap() {
        SpectrumData::Events(events) => {
            assert_eq!(events[0], TofEvent::new(150.0));
            assert_eq!(events[1].weight, 2.0);
        }
        SpectrumData::Histogram { .. } => panic!("expected events"),
    }

    assert_eq!(ws.logs().get(EI_LOG), Some(&LogValue::Number(25.0)));
    assert_eq!(ws.logs().get("temperature").unwrap().min_max(), Some((4.0, 6.0)));
    assert_eq!(ws.logs().get("sample"), Some(&LogValue::Text("vanadium".into())));

    let expected = Goniometer::from_axes(vec![GoniometerAxis::new("psi", [0.0, 1.0, 0.0], 30.0)])
        .unwrap();
    assert_eq!(ws.goniometer(), Some(&expected));
    assert_eq!(
        ws.lattice(),
        Some(&OrientedLattice::new(3.0, 3.0, 5.0, 90.0, 90.0, 90.0).unwrap())
    );
}

#[test]
fn test_workspace_round_trip() {
    let inst = SimpleInstrument::new("rt", [0.0, 0.0, -10.0], [0.0; 3])
        .with_detector(1, [0.0, 0.0, 4.0])
        .with_analyser(2, [1.0, 0.0, 0.0], 5.0);
    let mut ws = InMemoryWorkspace::new(Unit::Tof, inst)
        .with_lattice(OrientedLattice::new(4.0, 5.0, 6.0, 90.0, 100.0, 90.0).unwrap())
        .with_goniometer(Goniometer::identity());
    ws.add_histogram(vec![1, 2], vec![1.0, 2.0], vec![3.0, 4.0], Some(vec![0.5, 0.5]))
        .unwrap();
    ws.add_events(vec![2], vec![TofEvent::new(12.0)]);
    ws.logs.add_number(EI_LOG, 12.0);

    let text = serde_json::to_string(&ws).unwrap();
    let back: InMemoryWorkspace = serde_json::from_str(&text).unwrap();
    assert_eq!(back, ws);
}

#[test]
fn test_inconsistent_spectrum_rejected() {
    let text = r#"{
        "instrument": { "name": "bad", "source": [0.0, 0.0, -1.0] },
        "spectra": [{ "detector_ids": [1], "x": [1.0, 2.0, 3.0, 4.0], "y": [1.0] }]
    }"#;
    let ws: InMemoryWorkspace = serde_json::from_str(text).unwrap();
    assert!(ws.validate().is_err());
}
