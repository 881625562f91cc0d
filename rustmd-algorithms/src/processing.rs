//! High-level entry points that combine description, estimation, tree
//! sizing and conversion.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use rustmd_core::{EnergyMode, SpectraSource};
use serde::{Deserialize, Serialize};

use crate::box_controller::{BoxController, SplitInto};
use crate::box_tree::MdBoxTree;
use crate::description::{validate_extents, DescriptionBuilder, DescriptionSummary, WorkspaceDescription};
use crate::engine::{self, ConversionEngine, ConversionSummary, DEFAULT_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::extents::ExtentEstimator;
use crate::geometry_cache::GeometryRegistry;
use crate::progress::{CancellationToken, ProgressReporter};
use crate::qmode::QModeKind;
use crate::transform::{QScaling, TargetFrame};

/// Options of one `convert_to_md` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertToMdConfig {
    /// Conversion mode.
    pub q_mode: QModeKind,
    /// Energy-transfer mode.
    pub emode: EnergyMode,
    /// Requested target frame (`Q3D`).
    pub frame: TargetFrame,
    /// Requested scaling (`Q3D`).
    pub scaling: QScaling,
    /// First projection vector; empty for the default.
    pub u_proj: Vec<f64>,
    /// Second projection vector.
    pub v_proj: Vec<f64>,
    /// Third projection vector.
    pub w_proj: Vec<f64>,
    /// Sample logs added as extra dimensions.
    pub other_dimensions: Vec<String>,
    /// Lower extents; empty to estimate.
    pub min_values: Vec<f64>,
    /// Upper extents; empty to estimate.
    pub max_values: Vec<f64>,
    /// Fixed energy override (meV).
    pub efixed: Option<f64>,
    /// Children per dimension when a box splits.
    pub split_into: SplitInto,
    /// A leaf splits once it holds more events than this.
    pub split_threshold: usize,
    /// Leaves at this depth never split.
    pub max_recursion_depth: usize,
    /// Every leaf is pre-split to this depth.
    pub min_recursion_depth: usize,
    /// Coplanar projection vectors are an error instead of a warning.
    pub strict_projections: bool,
    /// Rebuild the detector geometry even if one is cached.
    pub force_geometry_rebuild: bool,
    /// Skip bins and events with zero signal.
    pub ignore_zero_signal: bool,
    /// Spectra per parallel block.
    pub block_size: usize,
    /// Relative padding of estimated extents.
    pub estimate_margin: f64,
}

impl Default for ConvertToMdConfig {
    fn default() -> Self {
        let controller = BoxController::default();
        Self {
            q_mode: QModeKind::ModQ,
            emode: EnergyMode::Elastic,
            frame: TargetFrame::AutoSelect,
            scaling: QScaling::NoScaling,
            u_proj: Vec::new(),
            v_proj: Vec::new(),
            w_proj: Vec::new(),
            other_dimensions: Vec::new(),
            min_values: Vec::new(),
            max_values: Vec::new(),
            efixed: None,
            split_into: controller.split_into,
            split_threshold: controller.split_threshold,
            max_recursion_depth: controller.max_depth,
            min_recursion_depth: controller.min_depth,
            strict_projections: false,
            force_geometry_rebuild: false,
            ignore_zero_signal: true,
            block_size: DEFAULT_BLOCK_SIZE,
            estimate_margin: ExtentEstimator::default().margin,
        }
    }
}

impl ConvertToMdConfig {
    /// Config for a mode pair with every other option at its default.
    #[must_use]
    pub fn new(q_mode: QModeKind, emode: EnergyMode) -> Self {
        Self {
            q_mode,
            emode,
            ..Self::default()
        }
    }

    /// Sets the requested frame.
    #[must_use]
    pub fn with_frame(mut self, frame: TargetFrame) -> Self {
        self.frame = frame;
        self
    }

    /// Sets the requested scaling.
    #[must_use]
    pub fn with_scaling(mut self, scaling: QScaling) -> Self {
        self.scaling = scaling;
        self
    }

    /// Sets the projection vectors.
    #[must_use]
    pub fn with_projection(mut self, u: [f64; 3], v: [f64; 3], w: [f64; 3]) -> Self {
        self.u_proj = u.to_vec();
        self.v_proj = v.to_vec();
        self.w_proj = w.to_vec();
        self
    }

    /// Adds log-value dimensions.
    #[must_use]
    pub fn with_other_dimensions<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.other_dimensions = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets explicit extents.
    #[must_use]
    pub fn with_extents(mut self, min: Vec<f64>, max: Vec<f64>) -> Self {
        self.min_values = min;
        self.max_values = max;
        self
    }

    /// Overrides the fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = Some(efixed);
        self
    }

    /// Sets a uniform split-into factor.
    #[must_use]
    pub fn with_split_into(mut self, n: usize) -> Self {
        self.split_into = SplitInto::Uniform(n);
        self
    }

    /// Sets the split threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Sets the recursion depth limits.
    #[must_use]
    pub fn with_recursion_depth(mut self, min: usize, max: usize) -> Self {
        self.min_recursion_depth = min;
        self.max_recursion_depth = max;
        self
    }

    /// Makes coplanar projections an error.
    #[must_use]
    pub fn with_strict_projections(mut self, strict: bool) -> Self {
        self.strict_projections = strict;
        self
    }

    /// Forces a geometry rebuild.
    #[must_use]
    pub fn with_force_geometry_rebuild(mut self, force: bool) -> Self {
        self.force_geometry_rebuild = force;
        self
    }

    /// Keeps or skips zero-signal bins.
    #[must_use]
    pub fn with_ignore_zero_signal(mut self, ignore: bool) -> Self {
        self.ignore_zero_signal = ignore;
        self
    }

    /// Sets the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Number of output dimensions the config produces.
    #[must_use]
    pub fn output_dims(&self) -> usize {
        self.q_mode.matrix_dims(self.emode) + self.other_dimensions.len()
    }

    /// Loads a config from a JSON string.
    ///
    /// # Errors
    /// Returns parse errors and [`Self::validate`] errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config from a JSON file.
    ///
    /// # Errors
    /// Returns I/O, parse and [`Self::validate`] errors.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that does not depend on the data.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        self.q_mode.check_emode(self.emode)?;
        if let Some(e) = self.efixed {
            if !e.is_finite() || e <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "fixed energy must be positive, got {e}"
                )));
            }
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be at least 1".to_string()));
        }
        if !self.estimate_margin.is_finite() || self.estimate_margin < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "estimate_margin must be non-negative, got {}",
                self.estimate_margin
            )));
        }
        let nd = self.output_dims();
        self.box_controller()?.validate(nd)?;
        if !self.min_values.is_empty() || !self.max_values.is_empty() {
            validate_extents(nd, &self.min_values, &self.max_values)?;
        }
        Ok(())
    }

    /// Box controller described by the config, with a uniform split factor
    /// reduced to fit the output dimensionality.
    ///
    /// # Errors
    /// Returns [`Error::RecursionDepth`] if the minimum depth exceeds the
    /// maximum.
    pub fn box_controller(&self) -> Result<BoxController> {
        let controller = BoxController {
            split_into: self.split_into.clone(),
            ..BoxController::new()
        }
        .with_split_threshold(self.split_threshold)
        .with_max_depth(self.max_recursion_depth)
        .fitted_to(self.output_dims());
        controller.try_with_min_depth(self.min_recursion_depth)
    }

    /// Description builder described by the config.
    #[must_use]
    pub fn description_builder(&self) -> DescriptionBuilder {
        DescriptionBuilder::new(self.q_mode, self.emode)
            .with_frame(self.frame)
            .with_scaling(self.scaling)
            .with_projection(&self.u_proj, &self.v_proj, &self.w_proj)
            .with_other_dimensions(self.other_dimensions.clone())
            .with_extents(self.min_values.clone(), self.max_values.clone())
            .with_efixed(self.efixed)
            .with_strict_projections(self.strict_projections)
            .with_force_geometry_rebuild(self.force_geometry_rebuild)
    }

    fn estimator(&self) -> ExtentEstimator {
        ExtentEstimator::new().with_margin(self.estimate_margin)
    }
}

/// Output of [`convert_to_md`]: the description, the populated tree and one
/// summary per converted run.
#[derive(Debug, Clone)]
pub struct ConvertedWorkspace {
    /// Description shared by every run.
    pub description: WorkspaceDescription,
    /// Event tree.
    pub tree: MdBoxTree,
    /// Per-run summaries in run order.
    pub runs: Vec<ConversionSummary>,
}

impl ConvertedWorkspace {
    /// Summary of the most recent run.
    #[must_use]
    pub fn last_run(&self) -> Option<&ConversionSummary> {
        self.runs.last()
    }

    /// Serializable report.
    #[must_use]
    pub fn report(&self) -> WorkspaceReport {
        WorkspaceReport {
            description: self.description.summary(),
            n_events: self.tree.n_events(),
            n_dropped: self.tree.n_dropped(),
            n_boxes: self.tree.n_boxes(),
            n_leaves: self.tree.n_leaves(),
            depth: self.tree.depth(),
            total_signal: self.tree.total_signal(),
            total_error_sq: self.tree.total_error_sq(),
            runs: self.runs.clone(),
        }
    }
}

/// Serializable overview of a [`ConvertedWorkspace`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceReport {
    /// Description.
    pub description: DescriptionSummary,
    /// Events stored.
    pub n_events: u64,
    /// Events dropped over all runs.
    pub n_dropped: u64,
    /// Boxes in the tree.
    pub n_boxes: usize,
    /// Leaf boxes.
    pub n_leaves: usize,
    /// Deepest level reached.
    pub depth: usize,
    /// Integrated signal.
    pub total_signal: f64,
    /// Integrated squared error.
    pub total_error_sq: f64,
    /// Per-run summaries.
    pub runs: Vec<ConversionSummary>,
}

/// Converts `source` into a new workspace, or appends it to `existing`.
///
/// In append mode the existing description is reused verbatim (frame,
/// scaling, extents, matrix) and only geometry, fixed energy and log values
/// are taken from `source`; mode options of `config` are ignored. The
/// existing workspace is consumed; on error it is lost.
///
/// # Errors
/// Returns configuration, data, cancellation and state errors.
pub fn convert_to_md(
    source: &dyn SpectraSource,
    config: &ConvertToMdConfig,
    registry: &mut GeometryRegistry,
    existing: Option<ConvertedWorkspace>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ConvertedWorkspace> {
    config.validate()?;
    let mut engine = ConversionEngine::new(source)
        .with_block_size(config.block_size)
        .with_ignore_zero_signal(config.ignore_zero_signal)
        .with_estimator(config.estimator());

    let (mut runs, run_index) = match existing {
        None => {
            engine.initialize(&config.description_builder(), registry)?;
            engine.size_tree(config.box_controller()?)?;
            (Vec::new(), 0)
        }
        Some(previous) => {
            let run_index = u16::try_from(previous.runs.len()).map_err(|_| {
                Error::InvalidConfig(format!("cannot append more than {} runs", u16::MAX))
            })?;
            let description = previous.description;
            if description.q_mode() != config.q_mode || description.emode() != config.emode {
                warn!(
                    "appending with the existing {} / {} layout, ignoring requested {} / {}",
                    description.q_mode(),
                    description.emode(),
                    config.q_mode,
                    config.emode
                );
            }
            let description = description.rebind(
                source,
                registry,
                config.efixed,
                config.force_geometry_rebuild,
            )?;
            engine.initialize_from(description)?;
            engine.attach_tree(previous.tree)?;
            info!("appending run {run_index}");
            (previous.runs, run_index)
        }
    };

    let summary = engine.run(progress, cancel, run_index)?;
    let (description, tree) = engine.into_parts()?;
    runs.push(summary);
    Ok(ConvertedWorkspace {
        description,
        tree,
        runs,
    })
}

/// Estimated extents of `source` under `config`, ignoring configured
/// extents.
///
/// # Errors
/// Returns description and estimation errors.
pub fn estimate_min_max(
    source: &dyn SpectraSource,
    config: &ConvertToMdConfig,
    registry: &mut GeometryRegistry,
) -> Result<(Vec<f64>, Vec<f64>)> {
    config.validate()?;
    let description = config
        .description_builder()
        .with_extents(Vec::new(), Vec::new())
        .build(source, registry)?;
    config.estimator().estimate(&description, source)
}

/// Exact per-dimension min/max of the converted data of `source`.
///
/// # Errors
/// Returns description errors and [`Error::NoConvertibleData`].
pub fn local_min_max(
    source: &dyn SpectraSource,
    config: &ConvertToMdConfig,
    registry: &mut GeometryRegistry,
) -> Result<(Vec<f64>, Vec<f64>)> {
    config.validate()?;
    let description = config
        .description_builder()
        .with_extents(Vec::new(), Vec::new())
        .build(source, registry)?;
    engine::local_min_max(&description, source)
}
