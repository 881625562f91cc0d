//! Per-spectrum conversion of axis values from the source unit to the unit
//! a Q mode consumes.

use rustmd_core::{ConversionParams, EnergyMode, Unit};

use crate::error::{Error, Result};
use crate::geometry_cache::CacheHandle;

/// Converts axis values of one spectrum at a time.
///
/// Cheap to clone; each worker thread owns a clone and calls
/// [`Self::update_for_spectrum`] before converting.
#[derive(Debug, Clone)]
pub struct UnitConverter {
    source: Unit,
    target: Unit,
    emode: EnergyMode,
    efixed: Option<f64>,
    geometry: CacheHandle,
    params: ConversionParams,
    spectrum: Option<usize>,
}

impl UnitConverter {
    /// Creates a converter.
    ///
    /// `efixed` is the run's fixed energy: required for direct geometry,
    /// the fallback for detectors without their own in indirect geometry.
    ///
    /// # Errors
    /// Returns an error if the target needs an inelastic mode that is not
    /// set, or a direct-geometry run has no incident energy.
    pub fn initialize(
        source: Unit,
        target: Unit,
        geometry: CacheHandle,
        emode: EnergyMode,
        efixed: Option<f64>,
    ) -> Result<Self> {
        if source != target {
            source.check_mode(target, emode)?;
        }
        if emode == EnergyMode::Direct && efixed.is_none() {
            return Err(Error::MissingIncidentEnergy {
                log: rustmd_core::EI_LOG,
            });
        }
        if let Some(e) = efixed {
            if !e.is_finite() || e <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "fixed energy must be positive, got {e}"
                )));
            }
        }
        Ok(Self {
            source,
            target,
            emode,
            efixed,
            params: ConversionParams {
                l1: geometry.l1(),
                l2: 0.0,
                two_theta: 0.0,
                emode,
                efixed: efixed.unwrap_or(0.0),
            },
            geometry,
            spectrum: None,
        })
    }

    /// Returns true if values pass through unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    /// Source unit.
    #[must_use]
    pub fn source_unit(&self) -> Unit {
        self.source
    }

    /// Target unit.
    #[must_use]
    pub fn target_unit(&self) -> Unit {
        self.target
    }

    /// Energy mode.
    #[must_use]
    pub fn emode(&self) -> EnergyMode {
        self.emode
    }

    /// Geometry in use.
    #[must_use]
    pub fn geometry(&self) -> &CacheHandle {
        &self.geometry
    }

    /// Parameters of the current spectrum.
    #[must_use]
    pub fn params(&self) -> &ConversionParams {
        &self.params
    }

    /// Spectrum the converter is set up for.
    #[must_use]
    pub fn current_spectrum(&self) -> Option<usize> {
        self.spectrum
    }

    /// Prepares for spectrum `index`. Returns `Ok(false)` if the spectrum
    /// has no detector geometry and must be skipped.
    ///
    /// Detector parameters are loaded on the identity path too, since the
    /// Q modes read the fixed energy from [`Self::params`].
    ///
    /// # Errors
    /// Returns an error in indirect mode if neither the detector nor the run
    /// provides a fixed energy.
    pub fn update_for_spectrum(&mut self, index: usize) -> Result<bool> {
        self.spectrum = Some(index);
        if self.geometry.is_placeholder() {
            return Ok(self.is_identity());
        }
        let Some(entry) = self.geometry.entry(index) else {
            return Ok(false);
        };
        self.params.l2 = entry.l2;
        self.params.two_theta = entry.two_theta;
        if self.emode == EnergyMode::Indirect {
            self.params.efixed = entry
                .efixed
                .or(self.efixed)
                .ok_or(Error::UnresolvedEfixed {
                    detector_id: entry.detector_id,
                    spectrum: index,
                })?;
        }
        Ok(true)
    }

    /// Converts a source-unit value to the target unit.
    #[inline]
    #[must_use]
    pub fn convert(&self, value: f64) -> f64 {
        if self.is_identity() {
            return value;
        }
        let tof = self.source.to_tof(value, &self.params);
        self.target.from_tof(tof, &self.params)
    }

    /// Clamps `[min, max]` (source units) to the part on which the target is
    /// defined. Returns `None` if nothing is convertible.
    #[must_use]
    pub fn convertible_range(&self, min: f64, max: f64) -> Option<(f64, f64)> {
        if !(min <= max) {
            return None;
        }
        if self.is_identity() {
            return Some((min, max));
        }
        let a = self.source.to_tof(min, &self.params);
        let b = self.source.to_tof(max, &self.params);
        let (t_lo, t_hi) = if a <= b { (a, b) } else { (b, a) };
        let (valid_lo, valid_hi) = self.target.tof_range(&self.params);
        let lo = t_lo.max(valid_lo);
        let hi = t_hi.min(valid_hi);
        if !(lo < hi) {
            return None;
        }
        if self.source == Unit::Tof {
            return Some((lo, hi));
        }
        let x = self.source.from_tof(lo, &self.params);
        let y = self.source.from_tof(hi, &self.params);
        Some(if x <= y { (x, y) } else { (y, x) })
    }

    /// Returns true if `value` (source units) lies in `range`.
    #[inline]
    #[must_use]
    pub fn in_range(value: f64, range: (f64, f64)) -> bool {
        value >= range.0 && value <= range.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry_cache::GeometryCache;
    use approx::assert_relative_eq;
    use rustmd_core::{InMemoryWorkspace, SimpleInstrument};
    use std::sync::Arc;

    fn geometry(with_analyser: bool) -> CacheHandle {
        let mut inst = SimpleInstrument::new("uc", [0.0, 0.0, -10.0], [0.0; 3])
            .with_detector(1, [0.0, 4.0, 0.0]);
        if with_analyser {
            inst = inst.with_analyser(2, [0.0, -4.0, 0.0], 3.0);
        }
        let mut ws = InMemoryWorkspace::new(Unit::Tof, inst);
        ws.add_histogram(vec![1], vec![1.0, 2.0], vec![1.0], None).unwrap();
        ws.add_histogram(vec![2], vec![1.0, 2.0], vec![1.0], None).unwrap();
        ws.add_histogram(vec![7], vec![1.0, 2.0], vec![1.0], None).unwrap();
        Arc::new(GeometryCache::build(&ws).unwrap())
    }

    #[test]
    fn test_identity_fast_path() {
        let mut c = UnitConverter::initialize(
            Unit::Tof,
            Unit::Tof,
            Arc::new(GeometryCache::placeholder(1)),
            EnergyMode::Undefined,
            None,
        )
        .unwrap();
        assert!(c.update_for_spectrum(0).unwrap());
        assert_eq!(c.convert(123.0), 123.0);
        assert_eq!(c.convertible_range(5.0, 1.0), None);
        assert_eq!(c.convertible_range(1.0, 5.0), Some((1.0, 5.0)));
    }

    #[test]
    fn test_elastic_momentum() {
        let mut c = UnitConverter::initialize(
            Unit::Tof,
            Unit::Momentum,
            geometry(false),
            EnergyMode::Elastic,
            None,
        )
        .unwrap();
        assert!(c.update_for_spectrum(0).unwrap());
        assert_relative_eq!(c.params().l2, 4.0);
        let k = c.convert(10_000.0);
        let expected = Unit::Momentum.from_tof(10_000.0, c.params());
        assert_relative_eq!(k, expected);
        // missing geometry skips the spectrum
        assert!(!c.update_for_spectrum(2).unwrap());
        // TOF 0 is kept; it converts to the sentinel
        let (lo, hi) = c.convertible_range(0.0, 100.0).unwrap();
        assert_eq!((lo, hi), (0.0, 100.0));
        assert_eq!(c.convert(0.0), f64::MAX);
    }

    #[test]
    fn test_direct_range_starts_at_fixed_leg() {
        let mut c = UnitConverter::initialize(
            Unit::Tof,
            Unit::DeltaE,
            geometry(false),
            EnergyMode::Direct,
            Some(25.0),
        )
        .unwrap();
        c.update_for_spectrum(0).unwrap();
        let t_fixed = c.params().fixed_leg_time();
        let (lo, hi) = c.convertible_range(0.0, 20_000.0).unwrap();
        assert_relative_eq!(lo, t_fixed);
        assert_relative_eq!(hi, 20_000.0);
        assert_eq!(c.convert(lo), -f64::MAX);
        assert!(c.convertible_range(0.0, t_fixed * 0.5).is_none());
    }

    #[test]
    fn test_direct_requires_ei() {
        let err = UnitConverter::initialize(
            Unit::Tof,
            Unit::DeltaE,
            geometry(false),
            EnergyMode::Direct,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingIncidentEnergy { .. }));
    }

    #[test]
    fn test_delta_e_in_elastic_rejected() {
        let err = UnitConverter::initialize(
            Unit::Tof,
            Unit::DeltaE,
            geometry(false),
            EnergyMode::Elastic,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Core(rustmd_core::Error::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn test_indirect_efixed_resolution() {
        let mut c = UnitConverter::initialize(
            Unit::Tof,
            Unit::DeltaE,
            geometry(true),
            EnergyMode::Indirect,
            None,
        )
        .unwrap();
        assert!(c.update_for_spectrum(1).unwrap());
        assert_relative_eq!(c.params().efixed, 3.0);
        let err = c.update_for_spectrum(0).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedEfixed {
                detector_id: 1,
                spectrum: 0
            }
        ));

        let mut c = UnitConverter::initialize(
            Unit::Tof,
            Unit::DeltaE,
            geometry(true),
            EnergyMode::Indirect,
            Some(5.0),
        )
        .unwrap();
        c.update_for_spectrum(0).unwrap();
        assert_relative_eq!(c.params().efixed, 5.0);
    }

    #[test]
    fn test_identity_indirect_resolves_analyser_efixed() {
        let mut c = UnitConverter::initialize(
            Unit::DeltaE,
            Unit::DeltaE,
            geometry(true),
            EnergyMode::Indirect,
            None,
        )
        .unwrap();
        assert!(c.is_identity());
        assert!(c.update_for_spectrum(1).unwrap());
        assert_relative_eq!(c.params().efixed, 3.0);
        assert_relative_eq!(c.params().l2, 4.0);
        assert_eq!(c.convert(1.5), 1.5);
        assert!(matches!(
            c.update_for_spectrum(0),
            Err(Error::UnresolvedEfixed { detector_id: 1, .. })
        ));
        assert!(!c.update_for_spectrum(2).unwrap());
    }

    #[test]
    fn test_wavelength_source() {
        let mut c = UnitConverter::initialize(
            Unit::Wavelength,
            Unit::Momentum,
            geometry(false),
            EnergyMode::Elastic,
            None,
        )
        .unwrap();
        c.update_for_spectrum(0).unwrap();
        assert_relative_eq!(c.convert(2.0), std::f64::consts::PI, epsilon = 1e-9);
        let (lo, hi) = c.convertible_range(1.0, 3.0).unwrap();
        assert_relative_eq!(lo, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hi, 3.0, epsilon = 1e-12);
    }
}
