//! Physical units, energy analysis modes and time-of-flight conversions.
//!
//! Every unit is converted through time-of-flight: `from_tof` maps a TOF
//! value (microseconds) into the unit, `to_tof` maps it back. Flight-path
//! parameters for one spectrum are carried by [`ConversionParams`].
//!
//! Values that are physically unreachable (for instance an energy transfer at
//! a TOF shorter than the fixed-energy leg) are returned as the `±f64::MAX`
//! sentinel rather than infinities, so callers can recognise and mirror them.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Physical constants (CODATA 2006) and derived conversion factors.
pub mod constants {
    /// Planck constant (J s).
    pub const H: f64 = 6.626_068_96e-34;
    /// Reduced Planck constant (J s).
    pub const H_BAR: f64 = 1.054_571_628e-34;
    /// Neutron mass (kg).
    pub const NEUTRON_MASS: f64 = 1.674_927_211e-27;
    /// One milli-electron-volt in joules.
    pub const MEV: f64 = 1.602_176_487e-22;

    /// `λ[Å] = WAVELENGTH_TOF_FACTOR · t[µs] / L[m]`.
    pub const WAVELENGTH_TOF_FACTOR: f64 = H / NEUTRON_MASS * 1e4;
    /// `E[meV] = ENERGY_TOF_FACTOR · (L[m] / t[µs])²`.
    pub const ENERGY_TOF_FACTOR: f64 = NEUTRON_MASS / (2.0 * MEV) * 1e12;
    /// `E[meV] = E_MEV_TO_K_SQ · k²[Å⁻²]`.
    pub const E_MEV_TO_K_SQ: f64 = H_BAR * H_BAR / (2.0 * NEUTRON_MASS) * 1e20 / MEV;
}

use constants::{E_MEV_TO_K_SQ, ENERGY_TOF_FACTOR, WAVELENGTH_TOF_FACTOR};

/// Wavevector (Å⁻¹) of a neutron with the given energy (meV).
///
/// Negative energies map to zero.
#[inline]
#[must_use]
pub fn energy_to_wavevector(energy_mev: f64) -> f64 {
    (energy_mev.max(0.0) / E_MEV_TO_K_SQ).sqrt()
}

/// Energy (meV) of a neutron with the given wavevector (Å⁻¹).
#[inline]
#[must_use]
pub fn wavevector_to_energy(k: f64) -> f64 {
    E_MEV_TO_K_SQ * k * k
}

/// Energy-transfer analysis mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyMode {
    /// No energy analysis: coordinates are copied from the native axis.
    #[default]
    Undefined,
    /// Elastic scattering, incident energy equals final energy.
    Elastic,
    /// Direct geometry: fixed incident energy `Ei`.
    Direct,
    /// Indirect geometry: fixed final energy `Ef`, per analyser.
    Indirect,
}

impl EnergyMode {
    /// All modes in declaration order.
    pub const ALL: [Self; 4] = [Self::Undefined, Self::Elastic, Self::Direct, Self::Indirect];

    /// Conventional mode name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Elastic => "Elastic",
            Self::Direct => "Direct",
            Self::Indirect => "Indirect",
        }
    }

    /// Returns true for direct and indirect geometry.
    #[must_use]
    pub fn is_inelastic(self) -> bool {
        matches!(self, Self::Direct | Self::Indirect)
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnergyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownEnergyMode(s.to_string()))
    }
}

/// Per-spectrum flight-path parameters used by the TOF conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionParams {
    /// Source-to-sample distance (m).
    pub l1: f64,
    /// Sample-to-detector distance (m).
    pub l2: f64,
    /// Scattering angle 2θ (radians).
    pub two_theta: f64,
    /// Energy analysis mode.
    pub emode: EnergyMode,
    /// Fixed energy (meV): `Ei` in direct mode, `Ef` in indirect mode.
    pub efixed: f64,
}

impl ConversionParams {
    /// Creates parameters for an elastic spectrum.
    #[must_use]
    pub fn elastic(l1: f64, l2: f64, two_theta: f64) -> Self {
        Self {
            l1,
            l2,
            two_theta,
            emode: EnergyMode::Elastic,
            efixed: 0.0,
        }
    }

    /// Sets the energy mode and fixed energy.
    #[must_use]
    pub fn with_energy(mut self, emode: EnergyMode, efixed: f64) -> Self {
        self.emode = emode;
        self.efixed = efixed;
        self
    }

    /// Total flight path `L1 + L2`.
    #[inline]
    #[must_use]
    pub fn total_path(&self) -> f64 {
        self.l1 + self.l2
    }

    /// Flight time (µs) of the fixed-energy leg of an inelastic instrument.
    ///
    /// Returns 0 for elastic or undefined modes.
    #[must_use]
    pub fn fixed_leg_time(&self) -> f64 {
        let leg = match self.emode {
            EnergyMode::Direct => self.l1,
            EnergyMode::Indirect => self.l2,
            EnergyMode::Elastic | EnergyMode::Undefined => return 0.0,
        };
        if self.efixed <= 0.0 {
            return f64::MAX;
        }
        leg * (ENERGY_TOF_FACTOR / self.efixed).sqrt()
    }
}

/// Physical unit of a spectrum axis or of a conversion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    /// Time of flight (µs).
    #[cfg_attr(feature = "serde", serde(rename = "TOF"))]
    Tof,
    /// Neutron wavelength (Å).
    Wavelength,
    /// Neutron wavevector `k = 2π/λ` (Å⁻¹).
    Momentum,
    /// Neutron energy (meV).
    Energy,
    /// Interplanar spacing (Å).
    #[cfg_attr(feature = "serde", serde(rename = "dSpacing"))]
    DSpacing,
    /// Energy transfer `Ei - Ef` (meV).
    DeltaE,
}

impl Unit {
    /// All units in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Tof,
        Self::Wavelength,
        Self::Momentum,
        Self::Energy,
        Self::DSpacing,
        Self::DeltaE,
    ];

    /// Unit identifier.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Tof => "TOF",
            Self::Wavelength => "Wavelength",
            Self::Momentum => "Momentum",
            Self::Energy => "Energy",
            Self::DSpacing => "dSpacing",
            Self::DeltaE => "DeltaE",
        }
    }

    /// Human-readable unit label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Tof => "microsecond",
            Self::Wavelength | Self::DSpacing => "Angstrom",
            Self::Momentum => "Angstrom^-1",
            Self::Energy | Self::DeltaE => "meV",
        }
    }

    /// Returns true if the unit needs an inelastic energy mode.
    #[must_use]
    pub fn is_energy_transfer(self) -> bool {
        matches!(self, Self::DeltaE)
    }

    /// Checks that the unit can be used in the given energy mode.
    ///
    /// # Errors
    /// Returns an error for `DeltaE` outside direct/indirect mode.
    pub fn check_mode(self, target: Self, emode: EnergyMode) -> Result<()> {
        if (self.is_energy_transfer() || target.is_energy_transfer()) && !emode.is_inelastic() {
            return Err(Error::UnsupportedConversion {
                from: self.id(),
                to: target.id(),
                mode: emode.name(),
            });
        }
        Ok(())
    }

    /// TOF interval on which [`Self::from_tof`] is defined.
    ///
    /// The lower end is inclusive; converting it may yield a sentinel.
    #[must_use]
    pub fn tof_range(self, params: &ConversionParams) -> (f64, f64) {
        match self {
            Self::DeltaE => (params.fixed_leg_time(), f64::MAX),
            _ => (0.0, f64::MAX),
        }
    }

    /// Converts a TOF value (µs) into this unit.
    #[must_use]
    pub fn from_tof(self, tof: f64, params: &ConversionParams) -> f64 {
        let path = params.total_path();
        match self {
            Self::Tof => tof,
            Self::Wavelength => WAVELENGTH_TOF_FACTOR * tof / path,
            Self::Momentum => {
                if tof <= 0.0 {
                    return f64::MAX;
                }
                2.0 * PI * path / (WAVELENGTH_TOF_FACTOR * tof)
            }
            Self::Energy => {
                if tof <= 0.0 {
                    return f64::MAX;
                }
                let v = path / tof;
                ENERGY_TOF_FACTOR * v * v
            }
            Self::DSpacing => {
                let sin_theta = (0.5 * params.two_theta).sin();
                if sin_theta <= 0.0 {
                    return f64::MAX;
                }
                WAVELENGTH_TOF_FACTOR * tof / path / (2.0 * sin_theta)
            }
            Self::DeltaE => delta_e_from_tof(tof, params),
        }
    }

    /// Converts a value in this unit back to TOF (µs).
    #[must_use]
    pub fn to_tof(self, value: f64, params: &ConversionParams) -> f64 {
        let path = params.total_path();
        match self {
            Self::Tof => value,
            Self::Wavelength => value * path / WAVELENGTH_TOF_FACTOR,
            Self::Momentum => {
                if value <= 0.0 {
                    return f64::MAX;
                }
                2.0 * PI * path / (WAVELENGTH_TOF_FACTOR * value)
            }
            Self::Energy => {
                if value <= 0.0 {
                    return f64::MAX;
                }
                path * (ENERGY_TOF_FACTOR / value).sqrt()
            }
            Self::DSpacing => {
                let sin_theta = (0.5 * params.two_theta).sin();
                2.0 * value * sin_theta * path / WAVELENGTH_TOF_FACTOR
            }
            Self::DeltaE => delta_e_to_tof(value, params),
        }
    }
}

fn delta_e_from_tof(tof: f64, params: &ConversionParams) -> f64 {
    let t_fixed = params.fixed_leg_time();
    match params.emode {
        EnergyMode::Direct => {
            if tof <= t_fixed {
                return -f64::MAX;
            }
            let v = params.l2 / (tof - t_fixed);
            params.efixed - ENERGY_TOF_FACTOR * v * v
        }
        EnergyMode::Indirect => {
            if tof <= t_fixed {
                return f64::MAX;
            }
            let v = params.l1 / (tof - t_fixed);
            ENERGY_TOF_FACTOR * v * v - params.efixed
        }
        EnergyMode::Elastic | EnergyMode::Undefined => f64::NAN,
    }
}

fn delta_e_to_tof(delta_e: f64, params: &ConversionParams) -> f64 {
    let t_fixed = params.fixed_leg_time();
    match params.emode {
        EnergyMode::Direct => {
            let ef = params.efixed - delta_e;
            if ef <= 0.0 {
                return f64::MAX;
            }
            t_fixed + params.l2 * (ENERGY_TOF_FACTOR / ef).sqrt()
        }
        EnergyMode::Indirect => {
            let ei = params.efixed + delta_e;
            if ei <= 0.0 {
                return f64::MAX;
            }
            t_fixed + params.l1 * (ENERGY_TOF_FACTOR / ei).sqrt()
        }
        EnergyMode::Elastic | EnergyMode::Undefined => f64::NAN,
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownUnit(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> ConversionParams {
        // Detector at (0.5, 0, 5) m, moderator 15 m upstream.
        let l2 = (0.25_f64 + 25.0).sqrt();
        ConversionParams::elastic(15.0, l2, (0.5_f64 / 5.0).atan())
    }

    #[test]
    fn test_constants() {
        assert_relative_eq!(constants::E_MEV_TO_K_SQ, 2.072_124_655, epsilon = 1e-8);
        assert_relative_eq!(constants::WAVELENGTH_TOF_FACTOR, 3.956_034e-3, epsilon = 1e-9);
        assert_relative_eq!(constants::ENERGY_TOF_FACTOR, 5_227_037.17, epsilon = 1e-1);
    }

    #[test]
    fn test_tof_to_momentum() {
        let k = Unit::Momentum.from_tof(25_000.0, &params());
        let lambda = Unit::Wavelength.from_tof(25_000.0, &params());
        assert_relative_eq!(k, 2.0 * PI / lambda, epsilon = 1e-12);
        assert_relative_eq!(k, 1.272_18, epsilon = 1e-4);
    }

    #[test]
    fn test_elastic_units_round_trip() {
        let p = params();
        for unit in [Unit::Wavelength, Unit::Momentum, Unit::Energy, Unit::DSpacing] {
            let value = unit.from_tof(12_345.0, &p);
            assert_relative_eq!(unit.to_tof(value, &p), 12_345.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_energy_wavevector() {
        let k = energy_to_wavevector(13.0);
        assert_relative_eq!(wavevector_to_energy(k), 13.0, epsilon = 1e-12);
        assert_eq!(energy_to_wavevector(-1.0), 0.0);
    }

    #[test]
    fn test_direct_delta_e() {
        let p = params().with_energy(EnergyMode::Direct, 13.0);
        let t1 = p.fixed_leg_time();
        // Elastic line: the final leg takes as long as the same speed over L2.
        let t_elastic = t1 + p.l2 * (ENERGY_TOF_FACTOR / 13.0).sqrt();
        assert_relative_eq!(Unit::DeltaE.from_tof(t_elastic, &p), 0.0, epsilon = 1e-9);
        assert!(Unit::DeltaE.from_tof(t_elastic * 1.5, &p) > 0.0);
        assert!(Unit::DeltaE.from_tof(t_elastic * 0.9, &p) < 0.0);
        assert_eq!(Unit::DeltaE.from_tof(t1, &p), -f64::MAX);
        let de = Unit::DeltaE.from_tof(t_elastic * 1.2, &p);
        assert_relative_eq!(Unit::DeltaE.to_tof(de, &p), t_elastic * 1.2, epsilon = 1e-6);
    }

    #[test]
    fn test_indirect_delta_e() {
        let p = params().with_energy(EnergyMode::Indirect, 3.5);
        let t2 = p.fixed_leg_time();
        assert_eq!(Unit::DeltaE.from_tof(t2 * 0.5, &p), f64::MAX);
        let de = Unit::DeltaE.from_tof(t2 + 2_000.0, &p);
        assert!(de > -3.5);
        assert_relative_eq!(Unit::DeltaE.to_tof(de, &p), t2 + 2_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_delta_e_requires_inelastic_mode() {
        assert!(Unit::Tof.check_mode(Unit::DeltaE, EnergyMode::Elastic).is_err());
        assert!(Unit::Tof.check_mode(Unit::DeltaE, EnergyMode::Direct).is_ok());
        assert!(Unit::Tof.check_mode(Unit::Momentum, EnergyMode::Elastic).is_ok());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("tof".parse::<Unit>().unwrap(), Unit::Tof);
        assert_eq!("dSpacing".parse::<Unit>().unwrap(), Unit::DSpacing);
        assert_eq!("Direct".parse::<EnergyMode>().unwrap(), EnergyMode::Direct);
        assert!("Furlongs".parse::<Unit>().is_err());
        assert!("Quasi".parse::<EnergyMode>().is_err());
    }
}
