//! Q conversion modes: `CopyToMD`, `|Q|` and `Q3D`.
//!
//! Each mode is a [`CoordinateTransform`]; [`QTransform`] closes over the
//! three so workers dispatch with a `match`. Modes are looked up by name in
//! a static table.

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use rustmd_core::units::energy_to_wavevector;
use rustmd_core::{EnergyMode, Unit};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry_cache::DetectorDirection;

/// Name of a conversion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QModeKind {
    /// Copy the axis values unchanged.
    #[serde(rename = "CopyToMD")]
    CopyToMd,
    /// Modulus of the momentum transfer.
    #[default]
    #[serde(rename = "|Q|", alias = "ModQ")]
    ModQ,
    /// Momentum transfer vector in the target frame.
    Q3D,
}

/// Mode names and their kinds.
pub const QMODES: [(&str, QModeKind); 3] = [
    ("CopyToMD", QModeKind::CopyToMd),
    ("|Q|", QModeKind::ModQ),
    ("Q3D", QModeKind::Q3D),
];

impl QModeKind {
    /// Conventional name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CopyToMd => "CopyToMD",
            Self::ModQ => "|Q|",
            Self::Q3D => "Q3D",
        }
    }

    /// Looks a mode up by name.
    ///
    /// # Errors
    /// Returns an error for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        let name = name.trim();
        QMODES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| Error::UnknownName {
                kind: "Q mode",
                name: name.to_string(),
            })
    }

    /// Number of dimensions the mode produces, excluding extra log dimensions.
    #[must_use]
    pub fn matrix_dims(self, emode: EnergyMode) -> usize {
        let energy = usize::from(emode.is_inelastic());
        match self {
            Self::CopyToMd => 1,
            Self::ModQ => 1 + energy,
            Self::Q3D => 3 + energy,
        }
    }

    /// Unit the mode consumes.
    #[must_use]
    pub fn input_unit(self, emode: EnergyMode, source_unit: Unit) -> Unit {
        match (self, emode.is_inelastic()) {
            (Self::CopyToMd, _) => source_unit,
            (_, true) => Unit::DeltaE,
            (_, false) => Unit::Momentum,
        }
    }

    /// Checks that the mode can run in `emode`.
    ///
    /// # Errors
    /// Returns an error for momentum modes without an energy mode.
    pub fn check_emode(self, emode: EnergyMode) -> Result<()> {
        if self != Self::CopyToMd && emode == EnergyMode::Undefined {
            return Err(Error::InvalidConfig(format!(
                "{} mode needs an Elastic, Direct or Indirect energy mode",
                self.name()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for QModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QModeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Per-worker coordinate computation of a conversion mode.
pub trait CoordinateTransform {
    /// Number of coordinates written by [`Self::compute`].
    fn matrix_dims(&self) -> usize;

    /// Unit of the values passed to [`Self::compute`].
    fn input_unit(&self) -> Unit;

    /// Prepares for a spectrum. Returns false if it cannot be converted.
    fn update_for_spectrum(&mut self, entry: Option<&DetectorDirection>, efixed: f64) -> bool;

    /// Writes the coordinates of `x` into `out`. Returns false for
    /// unphysical values.
    fn compute(&self, x: f64, out: &mut [f64]) -> bool;
}

#[inline]
fn is_usable(x: f64) -> bool {
    x.is_finite() && x.abs() < f64::MAX
}

/// Copies the axis value.
#[derive(Debug, Clone)]
pub struct CopyMode {
    unit: Unit,
}

impl CoordinateTransform for CopyMode {
    fn matrix_dims(&self) -> usize {
        1
    }

    fn input_unit(&self) -> Unit {
        self.unit
    }

    fn update_for_spectrum(&mut self, _entry: Option<&DetectorDirection>, _efixed: f64) -> bool {
        true
    }

    fn compute(&self, x: f64, out: &mut [f64]) -> bool {
        out[0] = x;
        x.is_finite()
    }
}

/// Momentum transfer of one spectrum: `Q = kᵢ·beam − k_f·n`.
#[derive(Debug, Clone)]
struct Kinematics {
    emode: EnergyMode,
    beam: Vector3<f64>,
    direction: Vector3<f64>,
    efixed: f64,
    k_fixed: f64,
}

impl Kinematics {
    fn new(emode: EnergyMode, beam: Vector3<f64>) -> Self {
        Self {
            emode,
            beam,
            direction: beam,
            efixed: 0.0,
            k_fixed: 0.0,
        }
    }

    fn update(&mut self, entry: Option<&DetectorDirection>, efixed: f64) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        self.direction = entry.direction;
        self.efixed = efixed;
        self.k_fixed = energy_to_wavevector(efixed);
        true
    }

    /// `x` is k for elastic data and ΔE otherwise.
    #[inline]
    fn q(&self, x: f64) -> Option<Vector3<f64>> {
        if !is_usable(x) {
            return None;
        }
        let (ki, kf) = match self.emode {
            EnergyMode::Elastic | EnergyMode::Undefined => (x, x),
            EnergyMode::Direct => {
                let ef = self.efixed - x;
                if ef <= 0.0 {
                    return None;
                }
                (self.k_fixed, energy_to_wavevector(ef))
            }
            EnergyMode::Indirect => {
                let ei = self.efixed + x;
                if ei <= 0.0 {
                    return None;
                }
                (energy_to_wavevector(ei), self.k_fixed)
            }
        };
        Some(self.beam * ki - self.direction * kf)
    }
}

/// `|Q|` and, for inelastic data, ΔE.
#[derive(Debug, Clone)]
pub struct ModQMode {
    kinematics: Kinematics,
}

impl CoordinateTransform for ModQMode {
    fn matrix_dims(&self) -> usize {
        QModeKind::ModQ.matrix_dims(self.kinematics.emode)
    }

    fn input_unit(&self) -> Unit {
        QModeKind::ModQ.input_unit(self.kinematics.emode, Unit::Tof)
    }

    fn update_for_spectrum(&mut self, entry: Option<&DetectorDirection>, efixed: f64) -> bool {
        self.kinematics.update(entry, efixed)
    }

    fn compute(&self, x: f64, out: &mut [f64]) -> bool {
        let Some(q) = self.kinematics.q(x) else {
            return false;
        };
        out[0] = q.norm();
        if self.kinematics.emode.is_inelastic() {
            out[1] = x;
        }
        true
    }
}

/// `M · Q_lab` and, for inelastic data, ΔE.
#[derive(Debug, Clone)]
pub struct Q3DMode {
    kinematics: Kinematics,
    matrix: Matrix3<f64>,
}

impl CoordinateTransform for Q3DMode {
    fn matrix_dims(&self) -> usize {
        QModeKind::Q3D.matrix_dims(self.kinematics.emode)
    }

    fn input_unit(&self) -> Unit {
        QModeKind::Q3D.input_unit(self.kinematics.emode, Unit::Tof)
    }

    fn update_for_spectrum(&mut self, entry: Option<&DetectorDirection>, efixed: f64) -> bool {
        self.kinematics.update(entry, efixed)
    }

    fn compute(&self, x: f64, out: &mut [f64]) -> bool {
        let Some(q) = self.kinematics.q(x) else {
            return false;
        };
        let p = self.matrix * q;
        out[..3].copy_from_slice(p.as_slice());
        if self.kinematics.emode.is_inelastic() {
            out[3] = x;
        }
        true
    }
}

/// Closed set of conversion modes.
#[derive(Debug, Clone)]
pub enum QTransform {
    /// `CopyToMD`.
    Copy(CopyMode),
    /// `|Q|`.
    ModQ(ModQMode),
    /// `Q3D`.
    Q3D(Q3DMode),
}

impl QTransform {
    /// Creates the transform for a mode.
    #[must_use]
    pub fn new(
        kind: QModeKind,
        emode: EnergyMode,
        source_unit: Unit,
        beam: Vector3<f64>,
        matrix: Matrix3<f64>,
    ) -> Self {
        match kind {
            QModeKind::CopyToMd => Self::Copy(CopyMode { unit: source_unit }),
            QModeKind::ModQ => Self::ModQ(ModQMode {
                kinematics: Kinematics::new(emode, beam),
            }),
            QModeKind::Q3D => Self::Q3D(Q3DMode {
                kinematics: Kinematics::new(emode, beam),
                matrix,
            }),
        }
    }

    /// Mode kind.
    #[must_use]
    pub fn kind(&self) -> QModeKind {
        match self {
            Self::Copy(_) => QModeKind::CopyToMd,
            Self::ModQ(_) => QModeKind::ModQ,
            Self::Q3D(_) => QModeKind::Q3D,
        }
    }
}

impl CoordinateTransform for QTransform {
    fn matrix_dims(&self) -> usize {
        match self {
            Self::Copy(m) => m.matrix_dims(),
            Self::ModQ(m) => m.matrix_dims(),
            Self::Q3D(m) => m.matrix_dims(),
        }
    }

    fn input_unit(&self) -> Unit {
        match self {
            Self::Copy(m) => m.input_unit(),
            Self::ModQ(m) => m.input_unit(),
            Self::Q3D(m) => m.input_unit(),
        }
    }

    fn update_for_spectrum(&mut self, entry: Option<&DetectorDirection>, efixed: f64) -> bool {
        match self {
            Self::Copy(m) => m.update_for_spectrum(entry, efixed),
            Self::ModQ(m) => m.update_for_spectrum(entry, efixed),
            Self::Q3D(m) => m.update_for_spectrum(entry, efixed),
        }
    }

    #[inline]
    fn compute(&self, x: f64, out: &mut [f64]) -> bool {
        match self {
            Self::Copy(m) => m.compute(x, out),
            Self::ModQ(m) => m.compute(x, out),
            Self::Q3D(m) => m.compute(x, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn entry(direction: Vector3<f64>) -> DetectorDirection {
        DetectorDirection {
            detector_id: 1,
            direction: direction.normalize(),
            l2: 1.0,
            two_theta: direction.normalize().dot(&Vector3::z()).acos(),
            phi: 0.0,
            efixed: None,
        }
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(QModeKind::from_name("|Q|").unwrap(), QModeKind::ModQ);
        assert_eq!("q3d".parse::<QModeKind>().unwrap(), QModeKind::Q3D);
        assert_eq!(QModeKind::from_name("CopyToMD").unwrap(), QModeKind::CopyToMd);
        assert!(QModeKind::from_name("Q4D").is_err());
    }

    #[test]
    fn test_dims_and_units() {
        assert_eq!(QModeKind::Q3D.matrix_dims(EnergyMode::Direct), 4);
        assert_eq!(QModeKind::ModQ.matrix_dims(EnergyMode::Elastic), 1);
        assert_eq!(
            QModeKind::ModQ.input_unit(EnergyMode::Indirect, Unit::Tof),
            Unit::DeltaE
        );
        assert_eq!(
            QModeKind::CopyToMd.input_unit(EnergyMode::Undefined, Unit::Wavelength),
            Unit::Wavelength
        );
        assert!(QModeKind::ModQ.check_emode(EnergyMode::Undefined).is_err());
        assert!(QModeKind::CopyToMd.check_emode(EnergyMode::Undefined).is_ok());
    }

    #[test]
    fn test_elastic_mod_q_is_two_k_sin_theta() {
        let mut t = QTransform::new(
            QModeKind::ModQ,
            EnergyMode::Elastic,
            Unit::Tof,
            Vector3::z(),
            Matrix3::identity(),
        );
        let e = entry(Vector3::new(1.0, 0.0, 1.0));
        assert!(t.update_for_spectrum(Some(&e), 0.0));
        let mut out = [0.0];
        assert!(t.compute(2.0, &mut out));
        assert_relative_eq!(out[0], 2.0 * 2.0 * (e.two_theta / 2.0).sin(), epsilon = 1e-12);
        assert!(!t.compute(f64::MAX, &mut out));
    }

    #[test]
    fn test_direct_q3d_energy_transfer() {
        let mut t = QTransform::new(
            QModeKind::Q3D,
            EnergyMode::Direct,
            Unit::Tof,
            Vector3::z(),
            Matrix3::identity(),
        );
        assert!(t.update_for_spectrum(Some(&entry(Vector3::z())), 13.0));
        let mut out = [0.0; 4];
        // forward scattering: Q is along the beam with |Q| = ki - kf
        assert!(t.compute(5.0, &mut out));
        let expected = energy_to_wavevector(13.0) - energy_to_wavevector(8.0);
        assert_relative_eq!(out[2], expected, epsilon = 1e-12);
        assert_relative_eq!(out[3], 5.0);
        // no energy left for the scattered neutron
        assert!(!t.compute(13.0, &mut out));
    }

    #[test]
    fn test_indirect_rejects_negative_ei() {
        let mut t = QTransform::new(
            QModeKind::ModQ,
            EnergyMode::Indirect,
            Unit::Tof,
            Vector3::z(),
            Matrix3::identity(),
        );
        assert!(t.update_for_spectrum(Some(&entry(Vector3::x())), 3.0));
        let mut out = [0.0; 2];
        assert!(!t.compute(-4.0, &mut out));
        assert!(t.compute(1.0, &mut out));
        let q = (energy_to_wavevector(4.0).powi(2) + energy_to_wavevector(3.0).powi(2)).sqrt();
        assert_relative_eq!(out[0], q, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_geometry_skips() {
        let mut t = QTransform::new(
            QModeKind::ModQ,
            EnergyMode::Elastic,
            Unit::Tof,
            Vector3::z(),
            Matrix3::identity(),
        );
        assert!(!t.update_for_spectrum(None, 0.0));
        let mut copy = QTransform::new(
            QModeKind::CopyToMd,
            EnergyMode::Undefined,
            Unit::Tof,
            Vector3::z(),
            Matrix3::identity(),
        );
        assert!(copy.update_for_spectrum(None, 0.0));
        assert_eq!(copy.kind(), QModeKind::CopyToMd);
    }
}
