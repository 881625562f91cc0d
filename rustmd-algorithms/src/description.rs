//! Immutable description of the output workspace.
//!
//! A [`WorkspaceDescription`] is produced once per conversion by a
//! [`DescriptionBuilder`] and shared read-only by every worker. Later stages
//! (sizing, rebinding to another run) return new values.

use std::sync::Arc;

use log::{info, warn};
use nalgebra::Matrix3;
use rustmd_core::{EnergyMode, SampleLogs, SpectraSource, Unit, EFIXED_LOG, EI_LOG};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::geometry_cache::{CacheHandle, GeometryCache, GeometryRegistry};
use crate::qmode::{QModeKind, QTransform};
use crate::transform::{Projection, QScaling, TargetFrame, TransformBuilder};
use crate::unit_converter::UnitConverter;

/// Name and unit of one output dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionInfo {
    /// Axis name.
    pub name: String,
    /// Axis unit.
    pub unit: String,
}

impl DimensionInfo {
    fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

/// Everything workers need to convert a spectrum.
#[derive(Debug, Clone)]
pub struct WorkspaceDescription {
    dims: Vec<DimensionInfo>,
    emode: EnergyMode,
    q_mode: QModeKind,
    frame: Option<TargetFrame>,
    scaling: Option<QScaling>,
    source_unit: Unit,
    input_unit: Unit,
    min: Option<Vec<f64>>,
    max: Option<Vec<f64>>,
    matrix: Matrix3<f64>,
    w_matrix: Matrix3<f64>,
    geometry: CacheHandle,
    efixed: Option<f64>,
    other_dims: Vec<String>,
    other_values: Vec<f64>,
}

impl WorkspaceDescription {
    /// Number of output dimensions.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.dims.len()
    }

    /// Number of dimensions produced by the Q mode.
    #[must_use]
    pub fn q_dims(&self) -> usize {
        self.dims.len() - self.other_dims.len()
    }

    /// Output dimensions.
    #[must_use]
    pub fn dims(&self) -> &[DimensionInfo] {
        &self.dims
    }

    /// Energy mode.
    #[must_use]
    pub fn emode(&self) -> EnergyMode {
        self.emode
    }

    /// Q mode.
    #[must_use]
    pub fn q_mode(&self) -> QModeKind {
        self.q_mode
    }

    /// Resolved frame (`Q3D` only).
    #[must_use]
    pub fn frame(&self) -> Option<TargetFrame> {
        self.frame
    }

    /// Applied scaling (`Q3D` only).
    #[must_use]
    pub fn scaling(&self) -> Option<QScaling> {
        self.scaling
    }

    /// Unit of the source x axis.
    #[must_use]
    pub fn source_unit(&self) -> Unit {
        self.source_unit
    }

    /// Unit the Q mode consumes.
    #[must_use]
    pub fn input_unit(&self) -> Unit {
        self.input_unit
    }

    /// Lower extents, once sized.
    #[must_use]
    pub fn min(&self) -> Option<&[f64]> {
        self.min.as_deref()
    }

    /// Upper extents, once sized.
    #[must_use]
    pub fn max(&self) -> Option<&[f64]> {
        self.max.as_deref()
    }

    /// Returns true once extents are set.
    #[must_use]
    pub fn is_sized(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    /// Lab-frame Q to output coordinates.
    #[must_use]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Projection matrix.
    #[must_use]
    pub fn w_matrix(&self) -> &Matrix3<f64> {
        &self.w_matrix
    }

    /// Detector geometry in use.
    #[must_use]
    pub fn geometry(&self) -> &CacheHandle {
        &self.geometry
    }

    /// Fixed energy of the run (meV).
    #[must_use]
    pub fn efixed(&self) -> Option<f64> {
        self.efixed
    }

    /// Names of the log dimensions.
    #[must_use]
    pub fn other_dims(&self) -> &[String] {
        &self.other_dims
    }

    /// Per-run values of the log dimensions.
    #[must_use]
    pub fn other_values(&self) -> &[f64] {
        &self.other_values
    }

    /// Returns a copy with extents set.
    ///
    /// # Errors
    /// Returns an error if the vectors have the wrong length or a bound is
    /// non-finite or empty.
    pub fn with_extents(&self, min: Vec<f64>, max: Vec<f64>) -> Result<Self> {
        validate_extents(self.nd(), &min, &max)?;
        Ok(Self {
            min: Some(min),
            max: Some(max),
            ..self.clone()
        })
    }

    /// Returns a copy bound to another run of the same layout: geometry,
    /// fixed energy and log values come from `source`, everything else is
    /// kept verbatim.
    ///
    /// # Errors
    /// Returns an error if the geometry cannot be built, the fixed energy
    /// cannot be resolved or a log dimension is missing.
    pub fn rebind(
        &self,
        source: &dyn SpectraSource,
        registry: &mut GeometryRegistry,
        efixed: Option<f64>,
        force_geometry_rebuild: bool,
    ) -> Result<Self> {
        let geometry = resolve_geometry(self.q_mode, source, registry, force_geometry_rebuild)?;
        let efixed = resolve_efixed(self.q_mode, self.emode, source.logs(), efixed)?;
        let other_values = log_values(&self.other_dims, source.logs())?;
        if source.x_unit() != self.source_unit {
            info!(
                "appending {} data to a workspace built from {}",
                source.x_unit().id(),
                self.source_unit.id()
            );
        }
        Ok(Self {
            source_unit: source.x_unit(),
            geometry,
            efixed,
            other_values,
            ..self.clone()
        })
    }

    /// Coordinate transform for a worker.
    #[must_use]
    pub fn transform(&self) -> QTransform {
        QTransform::new(
            self.q_mode,
            self.emode,
            self.source_unit,
            *self.geometry.beam_direction(),
            self.matrix,
        )
    }

    /// Unit converter for a worker.
    ///
    /// # Errors
    /// See [`UnitConverter::initialize`].
    pub fn converter(&self) -> Result<UnitConverter> {
        let emode = if self.q_mode == QModeKind::CopyToMd {
            EnergyMode::Undefined
        } else {
            self.emode
        };
        UnitConverter::initialize(
            self.source_unit,
            self.input_unit,
            Arc::clone(&self.geometry),
            emode,
            self.efixed,
        )
    }

    /// Serializable overview.
    #[must_use]
    pub fn summary(&self) -> DescriptionSummary {
        DescriptionSummary {
            dims: self.dims.clone(),
            emode: self.emode,
            q_mode: self.q_mode,
            frame: self.frame,
            scaling: self.scaling,
            min: self.min.clone(),
            max: self.max.clone(),
            matrix: rows(&self.matrix),
            w_matrix: rows(&self.w_matrix),
            efixed: self.efixed,
            instrument: self.geometry.instrument_name().to_string(),
            other_dims: self.other_dims.clone(),
            other_values: self.other_values.clone(),
        }
    }
}

fn rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [0, 1, 2].map(|i| [m[(i, 0)], m[(i, 1)], m[(i, 2)]])
}

/// Serializable form of a [`WorkspaceDescription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptionSummary {
    /// Output dimensions.
    pub dims: Vec<DimensionInfo>,
    /// Energy mode.
    pub emode: EnergyMode,
    /// Q mode.
    pub q_mode: QModeKind,
    /// Resolved frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<TargetFrame>,
    /// Applied scaling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaling: Option<QScaling>,
    /// Lower extents.
    pub min: Option<Vec<f64>>,
    /// Upper extents.
    pub max: Option<Vec<f64>>,
    /// Transformation matrix, row major.
    pub matrix: [[f64; 3]; 3],
    /// Projection matrix, row major.
    pub w_matrix: [[f64; 3]; 3],
    /// Fixed energy (meV).
    pub efixed: Option<f64>,
    /// Instrument the geometry came from.
    pub instrument: String,
    /// Log dimensions.
    pub other_dims: Vec<String>,
    /// Log values of the last run.
    pub other_values: Vec<f64>,
}

/// Checks a pair of extent vectors.
///
/// # Errors
/// Returns [`Error::ExtentsLength`] or [`Error::InvalidExtents`].
pub fn validate_extents(nd: usize, min: &[f64], max: &[f64]) -> Result<()> {
    for len in [min.len(), max.len()] {
        if len != nd {
            return Err(Error::ExtentsLength {
                expected: nd,
                actual: len,
            });
        }
    }
    for (dim, (&lo, &hi)) in min.iter().zip(max).enumerate() {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::InvalidExtents {
                dim,
                min: lo,
                max: hi,
            });
        }
    }
    Ok(())
}

fn resolve_geometry(
    q_mode: QModeKind,
    source: &dyn SpectraSource,
    registry: &mut GeometryRegistry,
    force: bool,
) -> Result<CacheHandle> {
    if q_mode == QModeKind::CopyToMd {
        return Ok(Arc::new(GeometryCache::placeholder(source.spectrum_count())));
    }
    registry.get_or_build(source, force)
}

/// Run fixed energy: the configured value, else the `Ei` log (direct) or
/// `Efixed` log (indirect).
fn resolve_efixed(
    q_mode: QModeKind,
    emode: EnergyMode,
    logs: &SampleLogs,
    configured: Option<f64>,
) -> Result<Option<f64>> {
    if q_mode == QModeKind::CopyToMd {
        return Ok(configured);
    }
    match emode {
        EnergyMode::Direct => configured
            .or_else(|| logs.single_value(EI_LOG))
            .map(Some)
            .ok_or(Error::MissingIncidentEnergy { log: EI_LOG }),
        EnergyMode::Indirect => Ok(configured.or_else(|| logs.single_value(EFIXED_LOG))),
        EnergyMode::Elastic | EnergyMode::Undefined => Ok(None),
    }
}

fn log_values(names: &[String], logs: &SampleLogs) -> Result<Vec<f64>> {
    names
        .iter()
        .map(|name| {
            logs.single_value(name)
                .ok_or_else(|| Error::DimensionPropertyNotFound { name: name.clone() })
        })
        .collect()
}

/// Builds a [`WorkspaceDescription`] for a source.
#[derive(Debug, Clone, Default)]
pub struct DescriptionBuilder {
    q_mode: QModeKind,
    emode: EnergyMode,
    frame: TargetFrame,
    scaling: QScaling,
    u: Vec<f64>,
    v: Vec<f64>,
    w: Vec<f64>,
    other_dims: Vec<String>,
    min: Vec<f64>,
    max: Vec<f64>,
    efixed: Option<f64>,
    strict_projections: bool,
    force_geometry_rebuild: bool,
}

impl DescriptionBuilder {
    /// Builder for the given mode pair.
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

    /// Sets the projection vectors; empty slices keep the defaults.
    #[must_use]
    pub fn with_projection(mut self, u: &[f64], v: &[f64], w: &[f64]) -> Self {
        self.u = u.to_vec();
        self.v = v.to_vec();
        self.w = w.to_vec();
        self
    }

    /// Adds log-value dimensions.
    #[must_use]
    pub fn with_other_dimensions(mut self, names: Vec<String>) -> Self {
        self.other_dims = names;
        self
    }

    /// Sets user extents; empty vectors request estimation.
    #[must_use]
    pub fn with_extents(mut self, min: Vec<f64>, max: Vec<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Overrides the fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: Option<f64>) -> Self {
        self.efixed = efixed;
        self
    }

    /// Makes coplanar projections an error instead of a warning.
    #[must_use]
    pub fn with_strict_projections(mut self, strict: bool) -> Self {
        self.strict_projections = strict;
        self
    }

    /// Rebuilds the detector geometry even if the registry holds one.
    #[must_use]
    pub fn with_force_geometry_rebuild(mut self, force: bool) -> Self {
        self.force_geometry_rebuild = force;
        self
    }

    /// Returns true if user extents were given.
    #[must_use]
    pub fn has_extents(&self) -> bool {
        !self.min.is_empty() || !self.max.is_empty()
    }

    /// Builds the description. Extents are set only when given by the user.
    ///
    /// # Errors
    /// Returns configuration errors (mode combinations, frame prerequisites,
    /// strict coplanar projections, malformed extents) and data errors
    /// (geometry, fixed energy, log dimensions).
    pub fn build(
        &self,
        source: &dyn SpectraSource,
        registry: &mut GeometryRegistry,
    ) -> Result<WorkspaceDescription> {
        self.q_mode.check_emode(self.emode)?;
        let source_unit = source.x_unit();
        let input_unit = self.q_mode.input_unit(self.emode, source_unit);
        let efixed = resolve_efixed(self.q_mode, self.emode, source.logs(), self.efixed)?;
        let other_values = log_values(&self.other_dims, source.logs())?;

        let mut dims = Vec::new();
        let mut frame = None;
        let mut scaling = None;
        let mut matrix = Matrix3::identity();
        let mut w_matrix = Matrix3::identity();
        match self.q_mode {
            QModeKind::CopyToMd => {
                dims.push(DimensionInfo::new(source_unit.id(), source_unit.label()));
            }
            QModeKind::ModQ => dims.push(DimensionInfo::new("|Q|", "A^-1")),
            QModeKind::Q3D => {
                let mut projection = Projection::default();
                if let Err(err) = projection.set_uvw(&self.u, &self.v, &self.w) {
                    if self.strict_projections || !matches!(err, Error::CoplanarProjection { .. }) {
                        return Err(err);
                    }
                    warn!("{err}, using the default projection");
                }
                let resolved = TransformBuilder::new()
                    .with_lattice(source.lattice())
                    .with_goniometer(source.goniometer())
                    .with_projection(projection)
                    .with_frame(self.frame)
                    .with_scaling(self.scaling)
                    .build()?;
                for (name, unit) in resolved.names.iter().zip(&resolved.units) {
                    dims.push(DimensionInfo::new(name.as_str(), unit.as_str()));
                }
                frame = Some(resolved.frame);
                scaling = Some(resolved.scaling);
                matrix = resolved.matrix;
                w_matrix = resolved.w_matrix;
            }
        }
        if self.q_mode != QModeKind::CopyToMd && self.emode.is_inelastic() {
            dims.push(DimensionInfo::new("DeltaE", "meV"));
        }
        for name in &self.other_dims {
            dims.push(DimensionInfo::new(name.as_str(), ""));
        }

        let (min, max) = if self.has_extents() {
            validate_extents(dims.len(), &self.min, &self.max)?;
            (Some(self.min.clone()), Some(self.max.clone()))
        } else {
            (None, None)
        };

        let geometry =
            resolve_geometry(self.q_mode, source, registry, self.force_geometry_rebuild)?;

        Ok(WorkspaceDescription {
            dims,
            emode: self.emode,
            q_mode: self.q_mode,
            frame,
            scaling,
            source_unit,
            input_unit,
            min,
            max,
            matrix,
            w_matrix,
            geometry,
            efixed,
            other_dims: self.other_dims.clone(),
            other_values,
        })
    }
}
