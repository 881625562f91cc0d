//! Provider traits for source spectra and instrument geometry.
//!
//! Conversion consumes data only through these traits; how spectra are
//! loaded or instruments parsed is up to the implementor.

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::event::DetectorId;
use crate::goniometer::Goniometer;
use crate::lattice::OrientedLattice;
use crate::logs::SampleLogs;
use crate::units::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity token of an instrument.
///
/// Two sources reporting the same token are assumed to share geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct InstrumentId(pub u64);

static NEXT_INSTRUMENT_ID: AtomicU64 = AtomicU64::new(1 << 32);

impl InstrumentId {
    /// Allocates a process-unique token.
    #[must_use]
    pub fn unique() -> Self {
        Self(NEXT_INSTRUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Instrument geometry provider.
pub trait InstrumentGeometry: Send + Sync {
    /// Identity token, stable across calls on the same instrument.
    fn identity(&self) -> InstrumentId;

    /// Instrument name.
    fn name(&self) -> &str;

    /// Neutron source position (m).
    fn source_position(&self) -> Vector3<f64>;

    /// Sample position (m).
    fn sample_position(&self) -> Vector3<f64>;

    /// Position of a detector (m), if it is known.
    fn detector_position(&self, id: DetectorId) -> Option<Vector3<f64>>;

    /// Per-detector fixed energy (meV), for indirect-geometry analysers.
    fn detector_efixed(&self, _id: DetectorId) -> Option<f64> {
        None
    }
}

/// A weighted time-of-flight event.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofEvent {
    /// Time of flight in the source unit.
    pub tof: f64,
    /// Event weight.
    #[cfg_attr(feature = "serde", serde(default = "unit_weight"))]
    pub weight: f32,
    /// Squared error of the weight.
    #[cfg_attr(feature = "serde", serde(default = "unit_weight"))]
    pub error_sq: f32,
}

#[cfg(feature = "serde")]
fn unit_weight() -> f32 {
    1.0
}

impl TofEvent {
    /// Unit-weight event.
    #[must_use]
    pub fn new(tof: f64) -> Self {
        Self {
            tof,
            weight: 1.0,
            error_sq: 1.0,
        }
    }
}

/// Data of one spectrum, borrowed from its provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpectrumData<'a> {
    /// Histogram (`x.len() == y.len() + 1`) or point data (`x.len() == y.len()`).
    Histogram {
        /// Bin boundaries or point positions.
        x: &'a [f64],
        /// Counts.
        y: &'a [f64],
        /// Errors; Poisson (`e² = y`) when absent.
        e: Option<&'a [f64]>,
    },
    /// Individual events.
    Events(&'a [TofEvent]),
}

impl SpectrumData<'_> {
    /// Returns true for point data.
    #[must_use]
    pub fn is_points(&self) -> bool {
        matches!(self, Self::Histogram { x, y, .. } if x.len() == y.len())
    }

    /// Checks array lengths.
    ///
    /// # Errors
    /// Returns an error naming the spectrum if lengths are inconsistent.
    pub fn validate(&self, index: usize) -> Result<()> {
        if let Self::Histogram { x, y, e } = self {
            if x.len() != y.len() && x.len() != y.len() + 1 {
                return Err(Error::InvalidSpectrum {
                    index,
                    reason: format!("{} x values for {} counts", x.len(), y.len()),
                });
            }
            if let Some(e) = e {
                if e.len() != y.len() {
                    return Err(Error::InvalidSpectrum {
                        index,
                        reason: format!("{} errors for {} counts", e.len(), y.len()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Axis values that carry signal: bin centres, points or event times.
    #[must_use]
    pub fn positions(&self) -> Vec<f64> {
        match self {
            Self::Histogram { x, y, .. } if x.len() == y.len() => x.to_vec(),
            Self::Histogram { x, .. } => x.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect(),
            Self::Events(events) => events.iter().map(|e| e.tof).collect(),
        }
    }

    /// Smallest and largest x value (or event time).
    #[must_use]
    pub fn x_range(&self) -> Option<(f64, f64)> {
        let fold = |acc: Option<(f64, f64)>, v: f64| {
            if !v.is_finite() {
                return acc;
            }
            Some(match acc {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            })
        };
        match self {
            Self::Histogram { x, .. } => x.iter().copied().fold(None, fold),
            Self::Events(events) => events.iter().map(|e| e.tof).fold(None, fold),
        }
    }
}

/// Source spectra provider.
pub trait SpectraSource: Send + Sync {
    /// Number of spectra.
    fn spectrum_count(&self) -> usize;

    /// Native unit of the x axis.
    fn x_unit(&self) -> Unit;

    /// Data of spectrum `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range.
    fn spectrum(&self, index: usize) -> Result<SpectrumData<'_>>;

    /// Detectors contributing to spectrum `index` (empty if unknown).
    fn detector_ids(&self, index: usize) -> &[DetectorId];

    /// Sample logs.
    fn logs(&self) -> &SampleLogs;

    /// Oriented lattice, if the sample has one.
    fn lattice(&self) -> Option<&OrientedLattice>;

    /// Goniometer, if one is set.
    fn goniometer(&self) -> Option<&Goniometer>;

    /// Instrument geometry.
    fn instrument(&self) -> &dyn InstrumentGeometry;

    /// Axis range of spectrum `index`.
    fn x_range(&self, index: usize) -> Option<(f64, f64)> {
        self.spectrum(index).ok().and_then(|s| s.x_range())
    }
}
