//! Error types for rustmd-algorithms.

use rustmd_core::DetectorId;
use thiserror::Error;

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request is inconsistent; fix the configuration.
    Configuration,
    /// The input data cannot support the request.
    Data,
    /// An operation was called in the wrong engine state.
    State,
    /// The caller cancelled the conversion.
    Cancelled,
    /// Reading or parsing external input failed.
    Io,
}

/// Conversion error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Error raised by a core type.
    #[error(transparent)]
    Core(#[from] rustmd_core::Error),

    /// Generic invalid configuration.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// Mode, frame or scaling name not recognised.
    #[error("unknown {kind} '{name}'")]
    UnknownName {
        /// What was being looked up.
        kind: &'static str,
        /// The name supplied.
        name: String,
    },

    /// The three projection vectors do not span space.
    #[error("projection vectors {u:?}, {v:?}, {w:?} are coplanar")]
    CoplanarProjection {
        /// First vector.
        u: [f64; 3],
        /// Second vector.
        v: [f64; 3],
        /// Third vector.
        w: [f64; 3],
    },

    /// The requested frame needs an oriented lattice.
    #[error("{frame} frame requires an oriented lattice")]
    MissingLattice {
        /// Requested frame.
        frame: &'static str,
    },

    /// The requested frame needs a goniometer.
    #[error("{frame} frame requires a goniometer")]
    MissingGoniometer {
        /// Requested frame.
        frame: &'static str,
    },

    /// The composed transformation cannot be inverted.
    #[error("transformation matrix is singular (determinant {determinant:e})")]
    SingularTransform {
        /// Determinant of the product.
        determinant: f64,
    },

    /// Box splitting parameters are invalid.
    #[error("invalid split parameters: {0}")]
    InvalidSplit(String),

    /// Minimum recursion depth exceeds the maximum.
    #[error("minimum recursion depth {min} exceeds maximum {max}")]
    RecursionDepth {
        /// Requested minimum depth.
        min: usize,
        /// Configured maximum depth.
        max: usize,
    },

    /// Extents are malformed.
    #[error("invalid extents for dimension {dim}: [{min}, {max}]")]
    InvalidExtents {
        /// Dimension index.
        dim: usize,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// Extent vectors have the wrong length.
    #[error("expected {expected} extent values, got {actual}")]
    ExtentsLength {
        /// Number of output dimensions.
        expected: usize,
        /// Number supplied.
        actual: usize,
    },

    /// No detector of the instrument could be located.
    #[error("instrument '{instrument}' has no valid detectors")]
    NoValidDetectors {
        /// Instrument name.
        instrument: String,
    },

    /// Instrument geometry is unusable.
    #[error("invalid instrument '{instrument}': {reason}")]
    InvalidInstrument {
        /// Instrument name.
        instrument: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A log named as an extra dimension does not exist.
    #[error("dimension property '{name}' not found in sample logs")]
    DimensionPropertyNotFound {
        /// Log name.
        name: String,
    },

    /// The fixed energy of a direct-geometry run is unknown.
    #[error("incident energy not set and sample log '{log}' is missing")]
    MissingIncidentEnergy {
        /// Log that was consulted.
        log: &'static str,
    },

    /// The final energy of an indirect-geometry detector is unknown.
    #[error("no fixed energy for detector {detector_id} (spectrum {spectrum})")]
    UnresolvedEfixed {
        /// Detector id.
        detector_id: DetectorId,
        /// Spectrum index.
        spectrum: usize,
    },

    /// No spectrum had a convertible range.
    #[error("no spectrum contains convertible data")]
    NoConvertibleData,

    /// An existing tree does not match the description.
    #[error("incompatible tree: {0}")]
    IncompatibleTree(String),

    /// Engine operation called in the wrong state.
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// Current state name.
        state: &'static str,
    },

    /// Conversion was cancelled.
    #[error("conversion cancelled")]
    Cancelled,

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classification of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(inner) => match inner {
                rustmd_core::Error::InvalidSpectrum { .. }
                | rustmd_core::Error::InvalidLog { .. }
                | rustmd_core::Error::InvalidLattice(_)
                | rustmd_core::Error::InvalidRotation(_) => ErrorKind::Data,
                _ => ErrorKind::Configuration,
            },
            Self::InvalidConfig(_)
            | Self::UnknownName { .. }
            | Self::CoplanarProjection { .. }
            | Self::MissingLattice { .. }
            | Self::MissingGoniometer { .. }
            | Self::InvalidSplit(_)
            | Self::RecursionDepth { .. }
            | Self::InvalidExtents { .. }
            | Self::ExtentsLength { .. }
            | Self::IncompatibleTree(_) => ErrorKind::Configuration,
            Self::SingularTransform { .. }
            | Self::NoValidDetectors { .. }
            | Self::InvalidInstrument { .. }
            | Self::DimensionPropertyNotFound { .. }
            | Self::MissingIncidentEnergy { .. }
            | Self::UnresolvedEfixed { .. }
            | Self::NoConvertibleData => ErrorKind::Data,
            Self::InvalidState { .. } => ErrorKind::State,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Json(_) | Self::Io(_) => ErrorKind::Io,
        }
    }
}
