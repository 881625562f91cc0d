//! Conversion engine: spectra in, populated box tree out.
//!
//! Spectra are converted in blocks. Inside a block rayon workers each own a
//! clone of the per-spectrum [`SpectrumWorker`] and produce event batches;
//! the calling thread then inserts them into the tree in spectrum order, so
//! the tree only ever has one writer.

use log::{debug, info, warn};
use rayon::prelude::*;
use rustmd_core::{DetectorId, EventBatch, SpectraSource, SpectrumData};
use serde::Serialize;

use crate::box_controller::BoxController;
use crate::box_tree::MdBoxTree;
use crate::description::{DescriptionBuilder, WorkspaceDescription};
use crate::error::{Error, Result};
use crate::extents::ExtentEstimator;
use crate::geometry_cache::{CacheHandle, GeometryRegistry};
use crate::progress::{CancellationToken, ProgressReporter};
use crate::qmode::{CoordinateTransform, QTransform};
use crate::unit_converter::UnitConverter;

/// Default number of spectra per block.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Lifecycle of a [`ConversionEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Nothing built yet.
    Uninitialized,
    /// Description built and sized.
    DescriptionBuilt,
    /// Tree created or attached.
    TreeSized,
    /// Conversion in progress.
    Converting,
    /// Conversion finished.
    Done,
    /// An operation failed or was cancelled.
    Failed,
}

impl EngineState {
    /// State name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::DescriptionBuilt => "DescriptionBuilt",
            Self::TreeSized => "TreeSized",
            Self::Converting => "Converting",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

/// Counts of one conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    /// Run index stamped on the events.
    pub run_index: u16,
    /// Spectra in the source.
    pub spectra_total: usize,
    /// Spectra converted.
    pub spectra_processed: usize,
    /// Spectra skipped because their detector has no geometry.
    pub spectra_skipped: usize,
    /// Bins or events outside the convertible range or unphysical.
    pub bins_unconvertible: u64,
    /// Bins or events skipped for zero signal.
    pub zero_signal_skipped: u64,
    /// Events stored in the tree.
    pub events_inserted: u64,
    /// Events outside the tree extents.
    pub events_dropped: u64,
}

impl ConversionSummary {
    fn add(&mut self, stats: &SpectrumStats) {
        self.spectra_processed += stats.processed;
        self.spectra_skipped += stats.skipped;
        self.bins_unconvertible += stats.unconvertible;
        self.zero_signal_skipped += stats.zero_signal;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SpectrumStats {
    processed: usize,
    skipped: usize,
    unconvertible: u64,
    zero_signal: u64,
}

/// Converts single spectra into events. One clone per worker thread.
#[derive(Debug, Clone)]
pub struct SpectrumWorker {
    converter: UnitConverter,
    transform: QTransform,
    geometry: CacheHandle,
    coords: Vec<f64>,
    range: Option<(f64, f64)>,
    q_dims: usize,
    ignore_zero_signal: bool,
}

impl SpectrumWorker {
    /// Worker for a description.
    ///
    /// # Errors
    /// See [`UnitConverter::initialize`].
    pub fn new(description: &WorkspaceDescription, ignore_zero_signal: bool) -> Result<Self> {
        let q_dims = description.q_dims();
        let mut coords = vec![0.0; description.nd()];
        coords[q_dims..].copy_from_slice(description.other_values());
        Ok(Self {
            converter: description.converter()?,
            transform: description.transform(),
            geometry: description.geometry().clone(),
            coords,
            range: None,
            q_dims,
            ignore_zero_signal,
        })
    }

    /// Prepares for spectrum `index` and records its convertible axis range.
    /// Returns false if the spectrum has no usable geometry.
    fn prepare(&mut self, source: &dyn SpectraSource, index: usize) -> Result<bool> {
        if !self.converter.update_for_spectrum(index)? {
            return Ok(false);
        }
        let efixed = self.converter.params().efixed;
        if !self.transform.update_for_spectrum(self.geometry.entry(index), efixed) {
            return Ok(false);
        }
        self.range = source
            .x_range(index)
            .and_then(|(lo, hi)| self.converter.convertible_range(lo, hi));
        Ok(true)
    }

    /// Computes output coordinates of axis value `x` into the internal
    /// buffer. Returns false if the value is not convertible.
    #[inline]
    fn compute(&mut self, x: f64) -> bool {
        match self.range {
            Some(range) if UnitConverter::in_range(x, range) => {
                let value = self.converter.convert(x);
                self.transform.compute(value, &mut self.coords[..self.q_dims])
            }
            _ => false,
        }
    }

    /// Converts spectrum `index` and appends its events to `out`.
    #[allow(clippy::cast_possible_truncation)]
    fn convert_spectrum(
        &mut self,
        source: &dyn SpectraSource,
        index: usize,
        run_index: u16,
        out: &mut EventBatch,
    ) -> Result<SpectrumStats> {
        let mut stats = SpectrumStats::default();
        if !self.prepare(source, index)? {
            stats.skipped = 1;
            return Ok(stats);
        }
        stats.processed = 1;
        let data = source.spectrum(index)?;
        data.validate(index)?;
        let detector_id: DetectorId = source.detector_ids(index).first().copied().unwrap_or(-1);

        let mut emit = |worker: &mut Self, x: f64, signal: f64, error_sq: f64| -> Result<()> {
            if worker.ignore_zero_signal && signal == 0.0 {
                stats.zero_signal += 1;
                return Ok(());
            }
            if !worker.compute(x) {
                stats.unconvertible += 1;
                return Ok(());
            }
            out.push(
                signal as f32,
                error_sq as f32,
                run_index,
                detector_id,
                &worker.coords,
            )?;
            Ok(())
        };

        match data {
            SpectrumData::Histogram { x, y, e } => {
                let points = x.len() == y.len();
                for (j, &signal) in y.iter().enumerate() {
                    let position = if points { x[j] } else { 0.5 * (x[j] + x[j + 1]) };
                    let error_sq = e.map_or(signal, |e| e[j] * e[j]);
                    emit(self, position, signal, error_sq)?;
                }
            }
            SpectrumData::Events(events) => {
                for event in events {
                    emit(
                        self,
                        event.tof,
                        f64::from(event.weight),
                        f64::from(event.error_sq),
                    )?;
                }
            }
        }
        Ok(stats)
    }

    /// Min/max of the output coordinates over every bin boundary, point or
    /// event of spectrum `index`.
    fn spectrum_min_max(
        &mut self,
        source: &dyn SpectraSource,
        index: usize,
    ) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
        if !self.prepare(source, index)? {
            return Ok(None);
        }
        let data = source.spectrum(index)?;
        let values: Vec<f64> = match data {
            SpectrumData::Histogram { x, .. } => x.to_vec(),
            SpectrumData::Events(events) => events.iter().map(|e| e.tof).collect(),
        };
        let mut acc: Option<(Vec<f64>, Vec<f64>)> = None;
        for x in values {
            if !self.compute(x) {
                continue;
            }
            let coords = &self.coords;
            match &mut acc {
                None => acc = Some((coords.clone(), coords.clone())),
                Some((lo, hi)) => {
                    for (d, &c) in coords.iter().enumerate() {
                        lo[d] = lo[d].min(c);
                        hi[d] = hi[d].max(c);
                    }
                }
            }
        }
        Ok(acc)
    }
}

fn merge_min_max(
    a: Option<(Vec<f64>, Vec<f64>)>,
    b: Option<(Vec<f64>, Vec<f64>)>,
) -> Option<(Vec<f64>, Vec<f64>)> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some((mut lo, mut hi)), Some((blo, bhi))) => {
            for d in 0..lo.len() {
                lo[d] = lo[d].min(blo[d]);
                hi[d] = hi[d].max(bhi[d]);
            }
            Some((lo, hi))
        }
    }
}

/// Drives one conversion of one source.
pub struct ConversionEngine<'a> {
    source: &'a dyn SpectraSource,
    state: EngineState,
    description: Option<WorkspaceDescription>,
    tree: Option<MdBoxTree>,
    estimator: ExtentEstimator,
    block_size: usize,
    ignore_zero_signal: bool,
}

impl std::fmt::Debug for ConversionEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionEngine")
            .field("state", &self.state)
            .field("spectra", &self.source.spectrum_count())
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl<'a> ConversionEngine<'a> {
    /// Engine over `source`.
    #[must_use]
    pub fn new(source: &'a dyn SpectraSource) -> Self {
        Self {
            source,
            state: EngineState::Uninitialized,
            description: None,
            tree: None,
            estimator: ExtentEstimator::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            ignore_zero_signal: true,
        }
    }

    /// Sets the number of spectra per block.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Keeps or skips zero-signal bins.
    #[must_use]
    pub fn with_ignore_zero_signal(mut self, ignore: bool) -> Self {
        self.ignore_zero_signal = ignore;
        self
    }

    /// Sets the estimator used when no extents are given.
    #[must_use]
    pub fn with_estimator(mut self, estimator: ExtentEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Description, once built.
    #[must_use]
    pub fn description(&self) -> Option<&WorkspaceDescription> {
        self.description.as_ref()
    }

    /// Tree, once sized.
    #[must_use]
    pub fn tree(&self) -> Option<&MdBoxTree> {
        self.tree.as_ref()
    }

    fn expect_state(&self, expected: EngineState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = EngineState::Failed;
        }
        result
    }

    /// Builds the description and estimates extents if none were given.
    ///
    /// # Errors
    /// Returns description and estimation errors; the engine is then failed.
    pub fn initialize(
        &mut self,
        builder: &DescriptionBuilder,
        registry: &mut GeometryRegistry,
    ) -> Result<&WorkspaceDescription> {
        self.expect_state(EngineState::Uninitialized, "initialize")?;
        let result = builder.build(self.source, registry).and_then(|desc| {
            if desc.is_sized() {
                return Ok(desc);
            }
            let (min, max) = self.estimator.estimate(&desc, self.source)?;
            info!("estimated extents: min {min:?}, max {max:?}");
            desc.with_extents(min, max)
        });
        let description = self.fail(result)?;
        self.state = EngineState::DescriptionBuilt;
        Ok(self.description.insert(description))
    }

    /// Reuses a sized description (append mode).
    ///
    /// # Errors
    /// Returns an error if the description has no extents.
    pub fn initialize_from(&mut self, description: WorkspaceDescription) -> Result<()> {
        self.expect_state(EngineState::Uninitialized, "initialize_from")?;
        if !description.is_sized() {
            return self.fail(Err(Error::InvalidConfig(
                "reused description has no extents".to_string(),
            )));
        }
        self.description = Some(description);
        self.state = EngineState::DescriptionBuilt;
        Ok(())
    }

    fn extents(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let desc = self.description.as_ref().ok_or(Error::InvalidState {
            operation: "size_tree",
            state: self.state.name(),
        })?;
        match (desc.min(), desc.max()) {
            (Some(min), Some(max)) => Ok((min.to_vec(), max.to_vec())),
            _ => Err(Error::InvalidConfig("description has no extents".to_string())),
        }
    }

    /// Creates an empty tree over the description's extents.
    ///
    /// # Errors
    /// Returns an error for invalid splitting parameters.
    pub fn size_tree(&mut self, controller: BoxController) -> Result<&MdBoxTree> {
        self.expect_state(EngineState::DescriptionBuilt, "size_tree")?;
        let result = self
            .extents()
            .and_then(|(min, max)| MdBoxTree::new(min, max, controller));
        let tree = self.fail(result)?;
        info!(
            "created box tree: {} dimensions, {} boxes",
            tree.nd(),
            tree.n_boxes()
        );
        self.state = EngineState::TreeSized;
        Ok(self.tree.insert(tree))
    }

    /// Attaches an existing tree (append mode).
    ///
    /// # Errors
    /// Returns [`Error::IncompatibleTree`] if its dimensionality or extents
    /// differ from the description.
    pub fn attach_tree(&mut self, tree: MdBoxTree) -> Result<()> {
        self.expect_state(EngineState::DescriptionBuilt, "attach_tree")?;
        let result = self.extents().and_then(|(min, max)| {
            if tree.nd() != min.len() || tree.min() != min.as_slice() || tree.max() != max.as_slice() {
                return Err(Error::IncompatibleTree(format!(
                    "tree spans {:?}..{:?}, description {min:?}..{max:?}",
                    tree.min(),
                    tree.max()
                )));
            }
            Ok(())
        });
        self.fail(result)?;
        self.tree = Some(tree);
        self.state = EngineState::TreeSized;
        Ok(())
    }

    /// Converts every spectrum into the tree.
    ///
    /// # Errors
    /// Returns conversion errors or [`Error::Cancelled`]; the engine is then
    /// failed. Running twice is an [`Error::InvalidState`].
    pub fn run(
        &mut self,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        run_index: u16,
    ) -> Result<ConversionSummary> {
        self.expect_state(EngineState::TreeSized, "run")?;
        self.state = EngineState::Converting;
        let result = self.run_blocks(progress, cancel, run_index);
        let summary = self.fail(result)?;
        self.state = EngineState::Done;

        info!(
            "run {}: {} of {} spectra converted, {} events inserted",
            summary.run_index, summary.spectra_processed, summary.spectra_total, summary.events_inserted
        );
        if summary.spectra_skipped > 0 {
            warn!("{} spectra skipped: no detector geometry", summary.spectra_skipped);
        }
        if summary.events_dropped > 0 {
            warn!(
                "{} events fell outside the workspace extents and were dropped",
                summary.events_dropped
            );
        }
        Ok(summary)
    }

    fn run_blocks(
        &mut self,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        run_index: u16,
    ) -> Result<ConversionSummary> {
        let (Some(description), Some(tree)) = (self.description.as_ref(), self.tree.as_mut()) else {
            return Err(Error::InvalidState {
                operation: "run",
                state: EngineState::Converting.name(),
            });
        };
        let source = self.source;
        let worker = SpectrumWorker::new(description, self.ignore_zero_signal)?;
        let nd = description.nd();
        let total = source.spectrum_count();
        let dropped_before = tree.n_dropped();
        let mut summary = ConversionSummary {
            run_index,
            spectra_total: total,
            ..ConversionSummary::default()
        };

        let mut start = 0;
        while start < total {
            if cancel.is_cancelled() {
                info!("conversion cancelled after {start} of {total} spectra");
                return Err(Error::Cancelled);
            }
            let end = (start + self.block_size).min(total);
            let block: Vec<Result<(EventBatch, SpectrumStats)>> = (start..end)
                .into_par_iter()
                .map_init(
                    || worker.clone(),
                    |w, i| {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        let mut batch = EventBatch::new(nd);
                        let stats = w.convert_spectrum(source, i, run_index, &mut batch)?;
                        Ok((batch, stats))
                    },
                )
                .collect();
            for item in block {
                let (batch, stats) = item?;
                summary.add(&stats);
                summary.events_inserted += tree.insert_batch(&batch)? as u64;
            }
            start = end;
            progress.report(end, total);
            debug!("block done: {end}/{total} spectra, {} events", tree.n_events());
        }
        summary.events_dropped = tree.n_dropped() - dropped_before;
        Ok(summary)
    }

    /// Exact per-dimension min/max of the converted data, without a tree.
    ///
    /// # Errors
    /// Returns [`Error::NoConvertibleData`] if nothing converts, or an
    /// invalid-state error before [`Self::initialize`].
    pub fn local_min_max(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let description = self.description.as_ref().ok_or(Error::InvalidState {
            operation: "local_min_max",
            state: self.state.name(),
        })?;
        local_min_max(description, self.source)
    }

    /// Takes the description and tree of a finished engine.
    ///
    /// # Errors
    /// Returns an invalid-state error unless the run is done.
    pub fn into_parts(self) -> Result<(WorkspaceDescription, MdBoxTree)> {
        let state = self.state;
        match (state, self.description, self.tree) {
            (EngineState::Done, Some(description), Some(tree)) => Ok((description, tree)),
            _ => Err(Error::InvalidState {
                operation: "into_parts",
                state: state.name(),
            }),
        }
    }
}

/// Exact per-dimension min/max of `source` converted with `description`.
///
/// # Errors
/// Returns [`Error::NoConvertibleData`] if nothing converts.
pub fn local_min_max(
    description: &WorkspaceDescription,
    source: &dyn SpectraSource,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let worker = SpectrumWorker::new(description, false)?;
    let partials: Vec<Option<(Vec<f64>, Vec<f64>)>> = (0..source.spectrum_count())
        .into_par_iter()
        .map_init(|| worker.clone(), |w, i| w.spectrum_min_max(source, i))
        .collect::<Result<_>>()?;
    partials
        .into_iter()
        .fold(None, merge_min_max)
        .ok_or(Error::NoConvertibleData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::qmode::QModeKind;
    use rustmd_core::{EnergyMode, InMemoryWorkspace, SimpleInstrument, TofEvent, Unit};

    fn workspace() -> InMemoryWorkspace {
        let inst = SimpleInstrument::new("engine", [0.0, 0.0, -10.0], [0.0; 3])
            .with_detector(1, [0.0, 1.0, 3.0])
            .with_detector(2, [1.0, 0.0, 3.0]);
        let mut ws = InMemoryWorkspace::new(Unit::Tof, inst);
        ws.add_histogram(
            vec![1],
            vec![2000.0, 3000.0, 4000.0, 5000.0],
            vec![1.0, 0.0, 2.0],
            None,
        )
        .unwrap();
        ws.add_events(
            vec![2],
            vec![
                TofEvent::new(2500.0),
                TofEvent::new(3500.0),
                TofEvent {
                    tof: 3000.0,
                    weight: 0.0,
                    error_sq: 0.0,
                },
            ],
        );
        ws.add_histogram(vec![42], vec![2000.0, 3000.0], vec![1.0], None)
            .unwrap();
        ws
    }

    fn engine(ws: &InMemoryWorkspace) -> ConversionEngine<'_> {
        let mut engine = ConversionEngine::new(ws).with_block_size(2);
        let builder = DescriptionBuilder::new(QModeKind::ModQ, EnergyMode::Elastic);
        engine
            .initialize(&builder, &mut GeometryRegistry::new())
            .unwrap();
        engine
    }

    #[test]
    fn test_state_machine() {
        let ws = workspace();
        let mut engine = engine(&ws);
        assert_eq!(engine.state(), EngineState::DescriptionBuilt);
        assert!(matches!(
            engine.run(&NoProgress, &CancellationToken::new(), 0),
            Err(Error::InvalidState { operation: "run", .. })
        ));
        engine.size_tree(BoxController::default()).unwrap();
        let summary = engine
            .run(&NoProgress, &CancellationToken::new(), 0)
            .unwrap();
        assert_eq!(engine.state(), EngineState::Done);
        assert!(engine.run(&NoProgress, &CancellationToken::new(), 0).is_err());
        assert_eq!(engine.state(), EngineState::Done);

        assert_eq!(summary.spectra_total, 3);
        assert_eq!(summary.spectra_processed, 2);
        assert_eq!(summary.spectra_skipped, 1);
        assert_eq!(summary.zero_signal_skipped, 2);
        assert_eq!(summary.bins_unconvertible, 0);
        assert_eq!(summary.events_inserted, 4);
        assert_eq!(summary.events_dropped, 0);

        let (desc, tree) = engine.into_parts().unwrap();
        assert_eq!(desc.nd(), 1);
        assert_eq!(tree.n_events(), 4);
    }

    #[test]
    fn test_keep_zero_signal() {
        let ws = workspace();
        let mut engine = engine(&ws).with_ignore_zero_signal(false);
        engine.size_tree(BoxController::default()).unwrap();
        let summary = engine
            .run(&NoProgress, &CancellationToken::new(), 3)
            .unwrap();
        assert_eq!(summary.events_inserted, 6);
        let (_, tree) = engine.into_parts().unwrap();
        assert!(tree
            .leaves()
            .filter_map(|leaf| leaf.events())
            .all(|batch| batch.run_index.iter().all(|&r| r == 3)));
    }

    #[test]
    fn test_unconvertible_bins_counted() {
        let inst = SimpleInstrument::new("direct", [0.0, 0.0, -10.0], [0.0; 3])
            .with_detector(1, [0.0, 1.0, 3.0]);
        let mut ws = InMemoryWorkspace::new(Unit::Tof, inst);
        // the first bin centre precedes the incident flight time (~6341 us)
        ws.add_histogram(
            vec![1],
            vec![5000.0, 6000.0, 8000.0, 10_000.0],
            vec![1.0, 1.0, 1.0],
            None,
        )
        .unwrap();
        ws.logs.add_number(rustmd_core::EI_LOG, 13.0);
        let builder = DescriptionBuilder::new(QModeKind::ModQ, EnergyMode::Direct)
            .with_extents(vec![0.0, -200.0], vec![20.0, 13.0]);
        let mut engine = ConversionEngine::new(&ws);
        engine
            .initialize(&builder, &mut GeometryRegistry::new())
            .unwrap();
        engine.size_tree(BoxController::default()).unwrap();
        let summary = engine
            .run(&NoProgress, &CancellationToken::new(), 0)
            .unwrap();
        assert_eq!(summary.bins_unconvertible, 1);
        assert_eq!(summary.events_inserted, 2);
        assert_eq!(summary.events_dropped, 0);
    }

    #[test]
    fn test_cancellation_fails_engine() {
        let ws = workspace();
        let mut engine = engine(&ws);
        engine.size_tree(BoxController::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            engine.run(&NoProgress, &cancel, 0),
            Err(Error::Cancelled)
        ));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.into_parts().is_err());
    }

    /// Delegates to a workspace and cancels once spectrum 0 is read, if armed.
    struct CancellingSource<'a> {
        inner: &'a InMemoryWorkspace,
        cancel: &'a CancellationToken,
        armed: std::sync::atomic::AtomicBool,
    }

    impl SpectraSource for CancellingSource<'_> {
        fn spectrum_count(&self) -> usize {
            self.inner.spectrum_count()
        }
        fn x_unit(&self) -> Unit {
            self.inner.x_unit()
        }
        fn spectrum(&self, index: usize) -> rustmd_core::Result<rustmd_core::SpectrumData<'_>> {
            if index == 0 && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                self.cancel.cancel();
            }
            self.inner.spectrum(index)
        }
        fn detector_ids(&self, index: usize) -> &[rustmd_core::DetectorId] {
            self.inner.detector_ids(index)
        }
        fn logs(&self) -> &rustmd_core::SampleLogs {
            self.inner.logs()
        }
        fn lattice(&self) -> Option<&rustmd_core::OrientedLattice> {
            self.inner.lattice()
        }
        fn goniometer(&self) -> Option<&rustmd_core::Goniometer> {
            self.inner.goniometer()
        }
        fn instrument(&self) -> &dyn rustmd_core::InstrumentGeometry {
            self.inner.instrument()
        }
    }

    #[test]
    fn test_cancellation_inside_block() {
        let ws = workspace();
        let cancel = CancellationToken::new();
        let source = CancellingSource {
            inner: &ws,
            cancel: &cancel,
            armed: std::sync::atomic::AtomicBool::new(false),
        };
        // one block covers every spectrum
        let mut engine = ConversionEngine::new(&source).with_block_size(16);
        engine
            .initialize(
                &DescriptionBuilder::new(QModeKind::ModQ, EnergyMode::Elastic),
                &mut GeometryRegistry::new(),
            )
            .unwrap();
        engine.size_tree(BoxController::default()).unwrap();
        source.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let result = pool.install(|| engine.run(&NoProgress, &cancel, 0));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[test]
    fn test_progress_reported_per_block() {
        let ws = workspace();
        let mut engine = engine(&ws);
        engine.size_tree(BoxController::default()).unwrap();
        let calls = std::sync::Mutex::new(Vec::new());
        let reporter = |done: usize, total: usize| calls.lock().unwrap().push((done, total));
        engine
            .run(&reporter, &CancellationToken::new(), 0)
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![(2, 3), (3, 3)]);
    }

    #[test]
    fn test_attach_incompatible_tree() {
        let ws = workspace();
        let mut engine = engine(&ws);
        let tree = MdBoxTree::new(vec![0.0], vec![1.0], BoxController::default()).unwrap();
        assert!(matches!(
            engine.attach_tree(tree),
            Err(Error::IncompatibleTree(_))
        ));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[test]
    fn test_local_min_max_within_estimate() {
        let ws = workspace();
        let engine = engine(&ws);
        let (lo, hi) = engine.local_min_max().unwrap();
        let desc = engine.description().unwrap();
        assert!(lo[0] > 0.0 && lo[0] < hi[0]);
        assert!(desc.min().unwrap()[0] <= lo[0]);
        assert!(desc.max().unwrap()[0] >= hi[0]);
    }
}
