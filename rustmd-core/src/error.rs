//! Error types for rustmd-core.

use thiserror::Error;

/// Result type alias for rustmd-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Lattice parameters do not describe a valid unit cell.
    #[error("invalid lattice: {0}")]
    InvalidLattice(String),

    /// A matrix expected to be a proper rotation is not one.
    #[error("invalid rotation matrix: {0}")]
    InvalidRotation(String),

    /// Unit identifier not recognised.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// Energy analysis mode name not recognised.
    #[error("unknown energy mode: {0}")]
    UnknownEnergyMode(String),

    /// Conversion between two units is not defined for the energy mode.
    #[error("cannot convert {from} to {to} in {mode} mode")]
    UnsupportedConversion {
        /// Source unit identifier.
        from: &'static str,
        /// Target unit identifier.
        to: &'static str,
        /// Energy mode name.
        mode: &'static str,
    },

    /// Spectrum data is malformed.
    #[error("invalid spectrum {index}: {reason}")]
    InvalidSpectrum {
        /// Spectrum index.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// Sample log is malformed.
    #[error("invalid log '{name}': {reason}")]
    InvalidLog {
        /// Log name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Event coordinates do not match the expected dimensionality.
    #[error("event has {actual} coordinates, expected {expected}")]
    DimensionMismatch {
        /// Expected number of dimensions.
        expected: usize,
        /// Number of coordinates supplied.
        actual: usize,
    },
}
