//! Oriented crystal lattice: unit cell, B matrix and orientation U.
//!
//! The B matrix follows the Busing–Levy convention: it maps Miller indices to
//! reciprocal-space coordinates (Å⁻¹, without the 2π factor) in a Cartesian
//! frame attached to the crystal. U rotates that frame into the goniometer
//! frame, so `Q_sample = 2π · U · B · hkl`.
#![allow(clippy::many_single_char_names)]

use nalgebra::{Matrix3, Vector3};

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const ROTATION_TOLERANCE: f64 = 1e-6;

/// Serializable lattice parameters (lengths in Å, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatticeParameters {
    /// Cell length a.
    pub a: f64,
    /// Cell length b.
    pub b: f64,
    /// Cell length c.
    pub c: f64,
    /// Angle between b and c.
    #[cfg_attr(feature = "serde", serde(default = "right_angle"))]
    pub alpha: f64,
    /// Angle between a and c.
    #[cfg_attr(feature = "serde", serde(default = "right_angle"))]
    pub beta: f64,
    /// Angle between a and b.
    #[cfg_attr(feature = "serde", serde(default = "right_angle"))]
    pub gamma: f64,
    /// Orientation matrix, row-major. Identity when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub u: Option<[[f64; 3]; 3]>,
}

#[cfg(feature = "serde")]
fn right_angle() -> f64 {
    90.0
}

/// A unit cell together with its orientation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "LatticeParameters", into = "LatticeParameters")
)]
pub struct OrientedLattice {
    lengths: [f64; 3],
    angles: [f64; 3],
    b: Matrix3<f64>,
    u: Matrix3<f64>,
}

impl OrientedLattice {
    /// Creates a lattice with identity orientation.
    ///
    /// # Errors
    /// Returns an error if a length is not positive or the angles cannot
    /// close a cell.
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Result<Self> {
        let lengths = [a, b, c];
        let angles = [alpha, beta, gamma];
        if lengths.iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(Error::InvalidLattice(format!(
                "cell lengths must be positive, got {lengths:?}"
            )));
        }
        if angles.iter().any(|g| !g.is_finite() || *g <= 0.0 || *g >= 180.0) {
            return Err(Error::InvalidLattice(format!(
                "cell angles must lie in (0, 180) degrees, got {angles:?}"
            )));
        }
        let b = compute_b(lengths, angles)?;
        Ok(Self {
            lengths,
            angles,
            b,
            u: Matrix3::identity(),
        })
    }

    /// Cubic cell with edge `a`.
    ///
    /// # Errors
    /// Returns an error if `a` is not positive.
    pub fn cubic(a: f64) -> Result<Self> {
        Self::new(a, a, a, 90.0, 90.0, 90.0)
    }

    /// Cell length along axis `i` (0 = a, 1 = b, 2 = c).
    ///
    /// # Panics
    /// Panics if `i > 2`.
    #[must_use]
    pub fn a(&self, i: usize) -> f64 {
        self.lengths[i]
    }

    /// Cell lengths (a, b, c) in Å.
    #[must_use]
    pub fn lengths(&self) -> [f64; 3] {
        self.lengths
    }

    /// Cell angles (α, β, γ) in degrees.
    #[must_use]
    pub fn angles(&self) -> [f64; 3] {
        self.angles
    }

    /// Largest of the three cell lengths.
    #[must_use]
    pub fn max_length(&self) -> f64 {
        self.lengths.iter().copied().fold(f64::MIN, f64::max)
    }

    /// B matrix (reciprocal basis, no 2π).
    #[must_use]
    pub fn b_matrix(&self) -> &Matrix3<f64> {
        &self.b
    }

    /// Orientation matrix U.
    #[must_use]
    pub fn u_matrix(&self) -> &Matrix3<f64> {
        &self.u
    }

    /// `U · B`.
    #[must_use]
    pub fn ub_matrix(&self) -> Matrix3<f64> {
        self.u * self.b
    }

    /// Unit cell volume (Å³).
    #[must_use]
    pub fn volume(&self) -> f64 {
        1.0 / self.b.determinant()
    }

    /// Interplanar spacing for the given Miller indices.
    #[must_use]
    pub fn d_spacing(&self, hkl: &Vector3<f64>) -> f64 {
        let q = self.b * hkl;
        let norm = q.norm();
        if norm == 0.0 {
            f64::INFINITY
        } else {
            1.0 / norm
        }
    }

    /// Replaces the orientation matrix.
    ///
    /// # Errors
    /// Returns an error if `u` is not a proper rotation.
    pub fn set_u(&mut self, u: Matrix3<f64>) -> Result<()> {
        check_rotation(&u)?;
        self.u = u;
        Ok(())
    }

    /// Builder form of [`Self::set_u`].
    ///
    /// # Errors
    /// Returns an error if `u` is not a proper rotation.
    pub fn with_u(mut self, u: Matrix3<f64>) -> Result<Self> {
        self.set_u(u)?;
        Ok(self)
    }

    /// Orients the crystal so that `B·u` is along the beam (z) and `B·v` lies
    /// in the horizontal (x–z) plane.
    ///
    /// # Errors
    /// Returns an error if either vector is zero or the two are collinear.
    pub fn set_u_from_vectors(&mut self, u: &Vector3<f64>, v: &Vector3<f64>) -> Result<()> {
        let bu = self.b * u;
        let bv = self.b * v;
        if bu.norm_squared() < 1e-10 || bv.norm_squared() < 1e-10 {
            return Err(Error::InvalidLattice(
                "orientation vectors must be non-zero".to_string(),
            ));
        }
        let bu = bu.normalize();
        let bw = bu.cross(&bv.normalize());
        if bw.norm() < 1e-5 {
            return Err(Error::InvalidLattice(
                "orientation vectors are collinear".to_string(),
            ));
        }
        let bw = bw.normalize();
        let bv = bw.cross(&bu);
        let tau = Matrix3::from_rows(&[bu.transpose(), bv.transpose(), bw.transpose()]);
        // u -> z, v -> x, w -> y
        #[rustfmt::skip]
        let lab = Matrix3::new(
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
            1.0, 0.0, 0.0,
        );
        self.u = lab * tau;
        Ok(())
    }

    /// Lattice parameters record, including the orientation.
    #[must_use]
    pub fn parameters(&self) -> LatticeParameters {
        let u = self.u;
        LatticeParameters {
            a: self.lengths[0],
            b: self.lengths[1],
            c: self.lengths[2],
            alpha: self.angles[0],
            beta: self.angles[1],
            gamma: self.angles[2],
            u: Some([
                [u[(0, 0)], u[(0, 1)], u[(0, 2)]],
                [u[(1, 0)], u[(1, 1)], u[(1, 2)]],
                [u[(2, 0)], u[(2, 1)], u[(2, 2)]],
            ]),
        }
    }
}

impl TryFrom<LatticeParameters> for OrientedLattice {
    type Error = Error;

    fn try_from(p: LatticeParameters) -> Result<Self> {
        let lattice = Self::new(p.a, p.b, p.c, p.alpha, p.beta, p.gamma)?;
        match p.u {
            Some(rows) => lattice.with_u(matrix_from_rows(rows)),
            None => Ok(lattice),
        }
    }
}

impl From<OrientedLattice> for LatticeParameters {
    fn from(lattice: OrientedLattice) -> Self {
        lattice.parameters()
    }
}

/// Builds a matrix from row-major nested arrays.
#[must_use]
pub fn matrix_from_rows(rows: [[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| rows[i][j])
}

/// Checks that `m` is orthonormal with determinant +1.
///
/// # Errors
/// Returns an error describing the first violated property.
pub fn check_rotation(m: &Matrix3<f64>) -> Result<()> {
    let deviation = (m.transpose() * m - Matrix3::identity()).abs().max();
    if !deviation.is_finite() || deviation > ROTATION_TOLERANCE {
        return Err(Error::InvalidRotation(format!(
            "matrix is not orthonormal (deviation {deviation:.3e})"
        )));
    }
    let det = m.determinant();
    if det < 0.0 {
        return Err(Error::InvalidRotation(format!(
            "matrix is an improper rotation (determinant {det:.3})"
        )));
    }
    Ok(())
}

fn compute_b(lengths: [f64; 3], angles: [f64; 3]) -> Result<Matrix3<f64>> {
    let [a, b, c] = lengths;
    let [ca, cb, cg] = angles.map(|g| g.to_radians().cos());
    #[rustfmt::skip]
    let metric = Matrix3::new(
        a * a,      a * b * cg, a * c * cb,
        a * b * cg, b * b,      b * c * ca,
        a * c * cb, b * c * ca, c * c,
    );
    if metric.determinant() <= 1e-12 * (a * b * c).powi(2) {
        return Err(Error::InvalidLattice(format!(
            "angles {angles:?} do not describe a cell with positive volume"
        )));
    }
    let reciprocal = metric.try_inverse().ok_or_else(|| {
        Error::InvalidLattice("metric tensor is singular".to_string())
    })?;
    let a_star = reciprocal[(0, 0)].sqrt();
    let b_star = reciprocal[(1, 1)].sqrt();
    let c_star = reciprocal[(2, 2)].sqrt();
    let cos_beta_star = reciprocal[(0, 2)] / (a_star * c_star);
    let cos_gamma_star = reciprocal[(0, 1)] / (a_star * b_star);
    let sin_beta_star = (1.0 - cos_beta_star * cos_beta_star).max(0.0).sqrt();
    let sin_gamma_star = (1.0 - cos_gamma_star * cos_gamma_star).max(0.0).sqrt();

    #[rustfmt::skip]
    let bmat = Matrix3::new(
        a_star, b_star * cos_gamma_star, c_star * cos_beta_star,
        0.0,    b_star * sin_gamma_star, -c_star * sin_beta_star * ca,
        0.0,    0.0,                     1.0 / c,
    );
    Ok(bmat)
}
