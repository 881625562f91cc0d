//! Conservative output extents from spectrum axis endpoints.
//!
//! The estimator never converts individual bins. It converts the two ends of
//! each spectrum's convertible range, derives the largest possible `|Q|` and
//! energy transfer from them and widens the result by a margin.

use rayon::prelude::*;
use rustmd_core::units::energy_to_wavevector;
use rustmd_core::{EnergyMode, SpectraSource};
use serde::{Deserialize, Serialize};

use crate::description::WorkspaceDescription;
use crate::error::{Error, Result};
use crate::qmode::QModeKind;
use crate::unit_converter::UnitConverter;

const DEFAULT_MARGIN: f64 = 0.05;
const DEFAULT_ABSOLUTE_MARGIN: f64 = 1e-3;
const DEFAULT_EPSILON: f64 = 1e-6;

/// Per-spectrum (and reduced) endpoint statistics.
#[derive(Debug, Clone, Copy)]
struct Partial {
    qmax: f64,
    lo: f64,
    hi: f64,
    n: usize,
}

impl Partial {
    const EMPTY: Self = Self {
        qmax: 0.0,
        lo: f64::INFINITY,
        hi: f64::NEG_INFINITY,
        n: 0,
    };

    fn merge(self, other: Self) -> Self {
        Self {
            qmax: self.qmax.max(other.qmax),
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
            n: self.n + other.n,
        }
    }
}

/// Mirrors the `±f64::MAX` sentinels of an energy-transfer range.
fn mirror_sentinels(mut dmin: f64, mut dmax: f64) -> (f64, f64) {
    if dmax >= f64::MAX {
        dmax = -dmin;
    }
    if dmin <= -f64::MAX {
        dmin = -dmax;
    }
    (dmin, dmax)
}

/// Estimates `[min, max]` of every output dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtentEstimator {
    /// Relative padding of each range.
    pub margin: f64,
    /// Smallest padding applied to a range.
    pub absolute_margin: f64,
    /// Replacement for bounds that are exactly zero.
    pub epsilon: f64,
}

impl Default for ExtentEstimator {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            absolute_margin: DEFAULT_ABSOLUTE_MARGIN,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl ExtentEstimator {
    /// Estimator with default margins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the relative margin.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Sets the absolute margin floor.
    #[must_use]
    pub fn with_absolute_margin(mut self, margin: f64) -> Self {
        self.absolute_margin = margin;
        self
    }

    /// Estimates the extents of `description` over `source`.
    ///
    /// # Errors
    /// Returns [`Error::NoConvertibleData`] if no spectrum contributes,
    /// [`Error::DimensionPropertyNotFound`] for a missing log dimension and
    /// [`Error::InvalidExtents`] if a bound is not finite.
    pub fn estimate(
        &self,
        description: &WorkspaceDescription,
        source: &dyn SpectraSource,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let converter = description.converter()?;
        let q_mode = description.q_mode();
        let emode = description.emode();

        let total = (0..source.spectrum_count())
            .into_par_iter()
            .map_init(
                || converter.clone(),
                |conv, i| spectrum_partial(conv, source, i, q_mode, emode),
            )
            .filter_map(Result::transpose)
            .try_reduce(|| Partial::EMPTY, |a, b| Ok(a.merge(b)))?;

        if total.n == 0 {
            return Err(Error::NoConvertibleData);
        }

        let mut min = Vec::with_capacity(description.nd());
        let mut max = Vec::with_capacity(description.nd());
        match q_mode {
            QModeKind::CopyToMd => {
                min.push(total.lo);
                max.push(total.hi);
            }
            QModeKind::ModQ => {
                min.push(0.0);
                max.push(total.qmax);
            }
            QModeKind::Q3D => {
                let m = description.matrix();
                for i in 0..3 {
                    let extent = total.qmax * m.row(i).norm();
                    min.push(-extent);
                    max.push(extent);
                }
            }
        }
        if q_mode != QModeKind::CopyToMd && emode.is_inelastic() {
            min.push(total.lo);
            max.push(total.hi);
        }
        for name in description.other_dims() {
            let (lo, hi) = source
                .logs()
                .min_max(name)
                .ok_or_else(|| Error::DimensionPropertyNotFound { name: name.clone() })?;
            min.push(lo);
            max.push(hi);
        }
        self.finalize(min, max)
    }

    /// Replaces zero bounds and pads every range.
    ///
    /// # Errors
    /// Returns [`Error::InvalidExtents`] for non-finite or inverted bounds.
    pub fn finalize(&self, mut min: Vec<f64>, mut max: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>)> {
        for (dim, (lo, hi)) in min.iter_mut().zip(max.iter_mut()).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && *lo <= *hi) {
                return Err(Error::InvalidExtents {
                    dim,
                    min: *lo,
                    max: *hi,
                });
            }
            if *lo == 0.0 {
                *lo = -self.epsilon;
            }
            if *hi == 0.0 {
                *hi = self.epsilon;
            }
            let pad = (self.margin * (*hi - *lo)).max(self.absolute_margin);
            *lo -= pad;
            *hi += pad;
        }
        Ok((min, max))
    }
}

/// Endpoint statistics of spectrum `index`; `None` if it contributes nothing.
fn spectrum_partial(
    conv: &mut UnitConverter,
    source: &dyn SpectraSource,
    index: usize,
    q_mode: QModeKind,
    emode: EnergyMode,
) -> Result<Option<Partial>> {
    if !conv.update_for_spectrum(index)? {
        return Ok(None);
    }
    let Some((x_lo, x_hi)) = source.x_range(index) else {
        return Ok(None);
    };
    let Some((x_lo, x_hi)) = conv.convertible_range(x_lo, x_hi) else {
        return Ok(None);
    };
    let a = conv.convert(x_lo);
    let b = conv.convert(x_hi);
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    let partial = match (q_mode, emode) {
        (QModeKind::CopyToMd, _) => Partial { qmax: 0.0, lo, hi, n: 1 },
        (_, EnergyMode::Direct) => {
            let (dmin, dmax) = mirror_sentinels(lo, hi);
            let ei = conv.params().efixed;
            let qmax = energy_to_wavevector(ei) + energy_to_wavevector(ei - dmin);
            Partial { qmax, lo: dmin, hi: dmax, n: 1 }
        }
        (_, EnergyMode::Indirect) => {
            let (dmin, dmax) = mirror_sentinels(lo, hi);
            let ef = conv.params().efixed;
            let qmax = energy_to_wavevector(ef + dmax) + energy_to_wavevector(ef);
            Partial { qmax, lo: dmin, hi: dmax, n: 1 }
        }
        (_, EnergyMode::Elastic | EnergyMode::Undefined) => {
            let kmax = if hi < f64::MAX {
                hi
            } else {
                // an endpoint sits on TOF 0; bound by the values that convert
                match regular_max(conv, source, index, (x_lo, x_hi))? {
                    Some(k) => k.max(lo),
                    None => return Ok(None),
                }
            };
            Partial {
                qmax: 2.0 * kmax,
                lo: f64::INFINITY,
                hi: f64::NEG_INFINITY,
                n: 1,
            }
        }
    };
    Ok(Some(partial))
}

/// Largest finite, non-sentinel converted value among the signal positions
/// of spectrum `index` inside `range`.
fn regular_max(
    conv: &UnitConverter,
    source: &dyn SpectraSource,
    index: usize,
    range: (f64, f64),
) -> Result<Option<f64>> {
    let positions = source.spectrum(index)?.positions();
    Ok(positions
        .into_iter()
        .filter(|&x| UnitConverter::in_range(x, range))
        .map(|x| conv.convert(x))
        .filter(|v| v.is_finite() && v.abs() < f64::MAX)
        .reduce(f64::max))
}
