//! Lab-frame momentum to target-frame transformation.
//!
//! For a goniometer `G`, orientation `U`, scaling `S` and projection `W`
//! the output coordinates of a lab-frame momentum transfer are `M · Q_lab`
//! with
//!
//! | frame    | `M`                       |
//! |----------|---------------------------|
//! | Q_lab    | `I`                       |
//! | Q_sample | `G⁻¹`                     |
//! | HKL      | `(G · T · S · W)⁻¹`       |
//!
//! where `T = U` except for full HKL scaling, which folds `U` into `S = 2π·UB`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use nalgebra::{Matrix3, Vector3};
use rustmd_core::{Goniometer, OrientedLattice};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Triple products below this mark the projection as coplanar.
const COPLANAR_TOLERANCE: f64 = 1e-3;
/// Components below this are printed as `0` in axis names.
const NAME_TOLERANCE: f64 = 1e-3;

/// Target coordinate frame of a Q3D conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TargetFrame {
    /// Pick from the available sample information.
    #[default]
    AutoSelect,
    /// Laboratory frame.
    #[serde(rename = "Q_lab", alias = "LabFrame")]
    LabFrame,
    /// Sample frame (goniometer removed).
    #[serde(rename = "Q_sample", alias = "SampleFrame")]
    SampleFrame,
    /// Crystal (Miller index) frame.
    #[serde(rename = "HKL", alias = "HKLFrame")]
    HklFrame,
}

impl TargetFrame {
    /// All frames.
    pub const ALL: [Self; 4] = [
        Self::AutoSelect,
        Self::LabFrame,
        Self::SampleFrame,
        Self::HklFrame,
    ];

    /// Conventional name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AutoSelect => "AutoSelect",
            Self::LabFrame => "Q_lab",
            Self::SampleFrame => "Q_sample",
            Self::HklFrame => "HKL",
        }
    }
}

impl fmt::Display for TargetFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetFrame {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownName {
                kind: "target frame",
                name: s.to_string(),
            })
    }
}

/// Scaling of Q3D coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QScaling {
    /// Å⁻¹.
    #[default]
    #[serde(rename = "Q in A^-1", alias = "NoScaling")]
    NoScaling,
    /// Units of `2π / max(a, b, c)`.
    #[serde(rename = "Q in lattice units", alias = "SingleScale")]
    SingleScale,
    /// Orthogonalised projection, each axis in units of `2π / aᵢ`.
    #[serde(rename = "Orthogonal HKL", alias = "OrthogonalHKLScale")]
    OrthogonalHkl,
    /// Miller indices.
    #[serde(rename = "HKL", alias = "HKLScale")]
    HklScale,
}

impl QScaling {
    /// All scalings.
    pub const ALL: [Self; 4] = [
        Self::NoScaling,
        Self::SingleScale,
        Self::OrthogonalHkl,
        Self::HklScale,
    ];

    /// Conventional name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NoScaling => "Q in A^-1",
            Self::SingleScale => "Q in lattice units",
            Self::OrthogonalHkl => "Orthogonal HKL",
            Self::HklScale => "HKL",
        }
    }
}

impl fmt::Display for QScaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QScaling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|q| q.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownName {
                kind: "Q scaling",
                name: s.to_string(),
            })
    }
}

/// Projection vectors `u`, `v`, `w` (columns of `W`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    u: Vector3<f64>,
    v: Vector3<f64>,
    w: Vector3<f64>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            u: Vector3::x(),
            v: Vector3::y(),
            w: Vector3::z(),
        }
    }
}

impl Projection {
    /// Sets the vectors. Empty slices mean "unset"; any other length is
    /// replaced by the default with a warning.
    ///
    /// # Errors
    /// Returns [`Error::CoplanarProjection`] if the vectors are coplanar. The
    /// projection is reset to the defaults in that case.
    pub fn set_uvw(&mut self, u: &[f64], v: &[f64], w: &[f64]) -> Result<()> {
        let defaults = Self::default();
        let u = vector_or(u, defaults.u, "u");
        let v = vector_or(v, defaults.v, "v");
        let w = vector_or(w, defaults.w, "w");
        if u.dot(&v.cross(&w)).abs() < COPLANAR_TOLERANCE {
            *self = defaults;
            return Err(Error::CoplanarProjection {
                u: u.into(),
                v: v.into(),
                w: w.into(),
            });
        }
        *self = Self { u, v, w };
        Ok(())
    }

    /// Builds a projection, failing on coplanar vectors.
    ///
    /// # Errors
    /// Returns [`Error::CoplanarProjection`] if the vectors are coplanar.
    pub fn from_slices(u: &[f64], v: &[f64], w: &[f64]) -> Result<Self> {
        let mut p = Self::default();
        p.set_uvw(u, v, w)?;
        Ok(p)
    }

    /// First vector.
    #[must_use]
    pub fn u(&self) -> &Vector3<f64> {
        &self.u
    }

    /// Second vector.
    #[must_use]
    pub fn v(&self) -> &Vector3<f64> {
        &self.v
    }

    /// Third vector.
    #[must_use]
    pub fn w(&self) -> &Vector3<f64> {
        &self.w
    }

    /// `W` with the vectors as columns.
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.u, self.v, self.w])
    }

    /// Orthonormal frame from `u` and `v`: `x ∥ u`, `z ∥ u × v`, `y = z × x`.
    #[must_use]
    pub fn orthogonal_matrix(&self) -> Matrix3<f64> {
        let x = self.u.normalize();
        let z = x.cross(&self.v).normalize();
        let y = z.cross(&x);
        Matrix3::from_columns(&[x, y, z])
    }
}

fn vector_or(values: &[f64], default: Vector3<f64>, name: &str) -> Vector3<f64> {
    match values {
        [] => default,
        [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => Vector3::new(*x, *y, *z),
        _ => {
            warn!(
                "projection vector {name} = {values:?} is malformed, using {:?}",
                default.as_slice()
            );
            default
        }
    }
}

/// Outcome of [`build_matrix`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTransform {
    /// Lab-frame Q to output coordinates.
    pub matrix: Matrix3<f64>,
    /// Frame after auto-selection.
    pub frame: TargetFrame,
    /// Scaling actually applied.
    pub scaling: QScaling,
    /// Projection matrix used (orthogonalised for orthogonal HKL).
    pub w_matrix: Matrix3<f64>,
    /// Axis names of the three Q dimensions.
    pub names: [String; 3],
    /// Axis units of the three Q dimensions.
    pub units: [String; 3],
}

/// Resolves `AutoSelect` and checks the prerequisites of an explicit frame.
///
/// # Errors
/// Returns an error if HKL is requested without a lattice or the sample
/// frame without a goniometer.
pub fn resolve_frame(
    requested: TargetFrame,
    has_lattice: bool,
    has_goniometer: bool,
) -> Result<TargetFrame> {
    match requested {
        TargetFrame::AutoSelect => Ok(match (has_goniometer, has_lattice) {
            (false, _) => TargetFrame::LabFrame,
            (true, false) => TargetFrame::SampleFrame,
            (true, true) => TargetFrame::HklFrame,
        }),
        TargetFrame::HklFrame if !has_lattice => Err(Error::MissingLattice {
            frame: TargetFrame::HklFrame.name(),
        }),
        TargetFrame::SampleFrame if !has_goniometer => Err(Error::MissingGoniometer {
            frame: TargetFrame::SampleFrame.name(),
        }),
        frame => Ok(frame),
    }
}

/// Builds the transformation for the given sample and request.
///
/// # Errors
/// Returns an error if the frame prerequisites are missing or the composed
/// matrix is singular.
pub fn build_matrix(
    lattice: Option<&OrientedLattice>,
    goniometer: Option<&Goniometer>,
    projection: &Projection,
    requested_frame: TargetFrame,
    requested_scaling: QScaling,
) -> Result<ResolvedTransform> {
    let frame = resolve_frame(requested_frame, lattice.is_some(), goniometer.is_some())?;

    let scaling = match frame {
        TargetFrame::LabFrame | TargetFrame::SampleFrame => {
            if requested_scaling != QScaling::NoScaling {
                info!(
                    "{frame} frame ignores '{requested_scaling}' scaling, using '{}'",
                    QScaling::NoScaling
                );
            }
            QScaling::NoScaling
        }
        _ => requested_scaling,
    };

    let g = match goniometer {
        Some(g) => *g.r(),
        None => {
            if frame == TargetFrame::HklFrame {
                warn!("HKL frame requested without a goniometer, assuming identity");
            }
            Matrix3::identity()
        }
    };

    match frame {
        TargetFrame::LabFrame => Ok(ResolvedTransform {
            matrix: Matrix3::identity(),
            frame,
            scaling,
            w_matrix: Matrix3::identity(),
            names: cartesian_names("Q_lab"),
            units: angstrom_units(),
        }),
        TargetFrame::SampleFrame => Ok(ResolvedTransform {
            matrix: invert(&g)?,
            frame,
            scaling,
            w_matrix: Matrix3::identity(),
            names: cartesian_names("Q_sample"),
            units: angstrom_units(),
        }),
        TargetFrame::HklFrame | TargetFrame::AutoSelect => {
            let lattice = lattice.ok_or(Error::MissingLattice {
                frame: TargetFrame::HklFrame.name(),
            })?;
            hkl_transform(lattice, &g, projection, scaling)
        }
    }
}

fn hkl_transform(
    lattice: &OrientedLattice,
    g: &Matrix3<f64>,
    projection: &Projection,
    scaling: QScaling,
) -> Result<ResolvedTransform> {
    let u = *lattice.u_matrix();
    let (transform, scale, w) = match scaling {
        QScaling::NoScaling => (u, Matrix3::identity(), projection.matrix()),
        QScaling::SingleScale => (
            u,
            Matrix3::identity() * (2.0 * PI / lattice.max_length()),
            projection.matrix(),
        ),
        QScaling::OrthogonalHkl => {
            let [a, b, c] = lattice.lengths();
            (
                u,
                Matrix3::from_diagonal(&Vector3::new(2.0 * PI / a, 2.0 * PI / b, 2.0 * PI / c)),
                projection.orthogonal_matrix(),
            )
        }
        QScaling::HklScale => (
            Matrix3::identity(),
            lattice.ub_matrix() * (2.0 * PI),
            projection.matrix(),
        ),
    };
    let matrix = invert(&(g * transform * scale * w))?;

    let names = [0, 1, 2].map(|i| make_axis_name(&w.column(i).into_owned(), ["H", "K", "L"]));
    let units = [0, 1, 2].map(|i| match scaling {
        QScaling::NoScaling => "A^-1".to_string(),
        QScaling::SingleScale => format!("in {:.3} A^-1", 2.0 * PI / lattice.max_length()),
        QScaling::OrthogonalHkl | QScaling::HklScale => {
            let length = (lattice.b_matrix() * w.column(i)).norm() * 2.0 * PI;
            format!("in {length:.3} A^-1")
        }
    });

    Ok(ResolvedTransform {
        matrix,
        frame: TargetFrame::HklFrame,
        scaling,
        w_matrix: w,
        names,
        units,
    })
}

fn invert(m: &Matrix3<f64>) -> Result<Matrix3<f64>> {
    let determinant = m.determinant();
    if !determinant.is_finite() || determinant.abs() < 1e-12 {
        return Err(Error::SingularTransform { determinant });
    }
    m.try_inverse()
        .ok_or(Error::SingularTransform { determinant })
}

fn cartesian_names(prefix: &str) -> [String; 3] {
    ["x", "y", "z"].map(|axis| format!("{prefix}_{axis}"))
}

fn angstrom_units() -> [String; 3] {
    ["A^-1", "A^-1", "A^-1"].map(str::to_string)
}

/// Names a reciprocal-space direction, e.g. `[H,0,0]`, `[H,H,0]` or
/// `[0.5K,-K,0]`, using the letter of its largest component.
#[must_use]
pub fn make_axis_name(dir: &Vector3<f64>, letters: [&str; 3]) -> String {
    let abs = dir.abs();
    let main = if abs[0] >= abs[1] && abs[0] >= abs[2] {
        letters[0]
    } else if abs[1] >= abs[2] {
        letters[1]
    } else {
        letters[2]
    };
    let parts: Vec<String> = (0..3)
        .map(|i| {
            if abs[i] < NAME_TOLERANCE {
                return "0".to_string();
            }
            let sign = if dir[i] < 0.0 { "-" } else { "" };
            if (abs[i] - 1.0).abs() < NAME_TOLERANCE {
                format!("{sign}{main}")
            } else {
                format!("{sign}{}{main}", trim_number(abs[i]))
            }
        })
        .collect();
    format!("[{}]", parts.join(","))
}

fn trim_number(value: f64) -> String {
    let s = format!("{value:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Builder over [`build_matrix`].
#[derive(Debug, Clone, Default)]
pub struct TransformBuilder<'a> {
    lattice: Option<&'a OrientedLattice>,
    goniometer: Option<&'a Goniometer>,
    projection: Projection,
    frame: TargetFrame,
    scaling: QScaling,
}

impl<'a> TransformBuilder<'a> {
    /// Creates a builder for the lab frame with no sample information.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the oriented lattice.
    #[must_use]
    pub fn with_lattice(mut self, lattice: Option<&'a OrientedLattice>) -> Self {
        self.lattice = lattice;
        self
    }

    /// Sets the goniometer.
    #[must_use]
    pub fn with_goniometer(mut self, goniometer: Option<&'a Goniometer>) -> Self {
        self.goniometer = goniometer;
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
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

    /// Builds the transformation.
    ///
    /// # Errors
    /// See [`build_matrix`].
    pub fn build(&self) -> Result<ResolvedTransform> {
        build_matrix(
            self.lattice,
            self.goniometer,
            &self.projection,
            self.frame,
            self.scaling,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lattice() -> OrientedLattice {
        OrientedLattice::new(2.0, 3.0, 4.0, 90.0, 90.0, 90.0).unwrap()
    }

    #[test]
    fn test_auto_select_table() {
        let table = [
            (false, false, TargetFrame::LabFrame),
            (true, false, TargetFrame::LabFrame),
            (false, true, TargetFrame::SampleFrame),
            (true, true, TargetFrame::HklFrame),
        ];
        for (has_lattice, has_goniometer, expected) in table {
            let frame = resolve_frame(TargetFrame::AutoSelect, has_lattice, has_goniometer);
            assert_eq!(frame.unwrap(), expected, "lattice={has_lattice} gonio={has_goniometer}");
        }
    }

    #[test]
    fn test_explicit_frame_prerequisites() {
        assert!(matches!(
            resolve_frame(TargetFrame::HklFrame, false, true),
            Err(Error::MissingLattice { .. })
        ));
        assert!(matches!(
            resolve_frame(TargetFrame::SampleFrame, true, false),
            Err(Error::MissingGoniometer { .. })
        ));
        assert_eq!(
            resolve_frame(TargetFrame::HklFrame, true, false).unwrap(),
            TargetFrame::HklFrame
        );
        assert_eq!(
            resolve_frame(TargetFrame::LabFrame, true, true).unwrap(),
            TargetFrame::LabFrame
        );
    }

    #[test]
    fn test_coplanar_resets_to_defaults() {
        let mut p = Projection::from_slices(&[1.0, 1.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 2.0])
            .unwrap();
        let err = p
            .set_uvw(&[1.0, 0.0, 0.0], &[0.0, 0.0, 1.0], &[0.0, 0.0, -1.0])
            .unwrap_err();
        assert!(matches!(err, Error::CoplanarProjection { .. }));
        assert_eq!(p, Projection::default());
    }

    #[test]
    fn test_malformed_vectors_default() {
        let p = Projection::from_slices(&[1.0, 0.0], &[], &[0.0, 0.0, 1.0, 5.0]).unwrap();
        assert_eq!(p, Projection::default());
    }

    #[test]
    fn test_lab_and_sample_force_no_scaling() {
        let g = Goniometer::omega(30.0);
        let t = build_matrix(None, Some(&g), &Projection::default(), TargetFrame::AutoSelect, QScaling::HklScale)
            .unwrap();
        assert_eq!(t.frame, TargetFrame::SampleFrame);
        assert_eq!(t.scaling, QScaling::NoScaling);
        assert_relative_eq!(t.matrix, g.r().transpose(), epsilon = 1e-12);
        assert_eq!(t.names[0], "Q_sample_x");

        let t = build_matrix(None, None, &Projection::default(), TargetFrame::AutoSelect, QScaling::SingleScale)
            .unwrap();
        assert_eq!(t.frame, TargetFrame::LabFrame);
        assert_eq!(t.matrix, Matrix3::identity());
        assert_eq!(t.units[2], "A^-1");
    }

    #[test]
    fn test_hkl_scalings_orthorhombic() {
        let l = lattice();
        let g = Goniometer::identity();
        let expected = Matrix3::from_diagonal(&Vector3::new(2.0, 3.0, 4.0)) / (2.0 * PI);
        for scaling in [QScaling::HklScale, QScaling::OrthogonalHkl] {
            let t = build_matrix(Some(&l), Some(&g), &Projection::default(), TargetFrame::AutoSelect, scaling)
                .unwrap();
            assert_eq!(t.frame, TargetFrame::HklFrame);
            assert_relative_eq!(t.matrix, expected, epsilon = 1e-12);
        }
        let t = build_matrix(Some(&l), Some(&g), &Projection::default(), TargetFrame::HklFrame, QScaling::SingleScale)
            .unwrap();
        assert_relative_eq!(t.matrix, Matrix3::identity() * (4.0 / (2.0 * PI)), epsilon = 1e-12);
        assert_eq!(t.units[0], "in 1.571 A^-1");
    }

    #[test]
    fn test_hkl_names_and_units() {
        let l = lattice();
        let p = Projection::from_slices(&[1.0, 1.0, 0.0], &[0.5, -1.0, 0.0], &[0.0, 0.0, 1.0]).unwrap();
        let t = build_matrix(Some(&l), None, &p, TargetFrame::HklFrame, QScaling::HklScale).unwrap();
        assert_eq!(t.names, ["[H,H,0]", "[0.5K,-K,0]", "[0,0,L]"].map(str::to_string));
        assert_eq!(t.units[2], "in 1.571 A^-1");
        assert_eq!(
            make_axis_name(&Vector3::new(-1.0, 0.0, 0.0), ["H", "K", "L"]),
            "[-H,0,0]"
        );
    }

    #[test]
    fn test_matrix_round_trip() {
        let mut l = OrientedLattice::new(3.0, 4.5, 5.0, 80.0, 95.0, 110.0).unwrap();
        l.set_u_from_vectors(&Vector3::new(1.0, 0.0, 1.0), &Vector3::new(0.0, 1.0, 0.0))
            .unwrap();
        let g = Goniometer::omega(37.0);
        let p = Projection::from_slices(&[1.0, 1.0, 0.0], &[-1.0, 1.0, 0.0], &[0.0, 0.0, 1.0]).unwrap();
        for scaling in QScaling::ALL {
            let t = TransformBuilder::new()
                .with_lattice(Some(&l))
                .with_goniometer(Some(&g))
                .with_projection(p)
                .with_frame(TargetFrame::HklFrame)
                .with_scaling(scaling)
                .build()
                .unwrap();
            assert!(t.matrix.determinant().abs() > 1e-9);
            let inv = t.matrix.try_inverse().unwrap();
            assert_relative_eq!(inv * t.matrix, Matrix3::identity(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_names_parse() {
        assert_eq!("q_sample".parse::<TargetFrame>().unwrap(), TargetFrame::SampleFrame);
        assert_eq!("Orthogonal HKL".parse::<QScaling>().unwrap(), QScaling::OrthogonalHkl);
        assert!("Q_cosmic".parse::<TargetFrame>().is_err());
    }
}
