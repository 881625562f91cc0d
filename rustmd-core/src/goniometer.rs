//! Sample goniometer: a chain of rotation axes composed into one matrix.

use nalgebra::{Matrix3, Rotation3, Unit, Vector3};

use crate::error::{Error, Result};
use crate::lattice::{check_rotation, matrix_from_rows};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Rotation sense of a goniometer axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sense {
    /// Counter-clockwise (right-hand rule).
    #[default]
    CounterClockwise,
    /// Clockwise.
    Clockwise,
}

impl Sense {
    fn sign(self) -> f64 {
        match self {
            Self::CounterClockwise => 1.0,
            Self::Clockwise => -1.0,
        }
    }
}

/// One motor axis of a goniometer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GoniometerAxis {
    /// Motor name, e.g. `omega`.
    pub name: String,
    /// Rotation axis in the lab frame.
    pub direction: [f64; 3],
    /// Rotation sense.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sense: Sense,
    /// Angle in degrees.
    pub angle: f64,
}

impl GoniometerAxis {
    /// Creates a counter-clockwise axis.
    #[must_use]
    pub fn new(name: impl Into<String>, direction: [f64; 3], angle: f64) -> Self {
        Self {
            name: name.into(),
            direction,
            sense: Sense::CounterClockwise,
            angle,
        }
    }

    /// Sets the rotation sense.
    #[must_use]
    pub fn with_sense(mut self, sense: Sense) -> Self {
        self.sense = sense;
        self
    }

    fn rotation(&self) -> Result<Rotation3<f64>> {
        let axis = Unit::try_new(Vector3::from(self.direction), 1e-12).ok_or_else(|| {
            Error::InvalidRotation(format!("goniometer axis '{}' has zero length", self.name))
        })?;
        Ok(Rotation3::from_axis_angle(
            &axis,
            self.sense.sign() * self.angle.to_radians(),
        ))
    }
}

/// Serializable goniometer description: either axes or an explicit matrix.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GoniometerRecord {
    /// Motor axes, outermost first.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub axes: Vec<GoniometerAxis>,
    /// Row-major rotation matrix; used when `axes` is empty.
    #[cfg_attr(feature = "serde", serde(default))]
    pub matrix: Option<[[f64; 3]; 3]>,
}

/// Sample orientation `R = R₀ · R₁ · …` over its axes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "GoniometerRecord", into = "GoniometerRecord")
)]
pub struct Goniometer {
    axes: Vec<GoniometerAxis>,
    r: Matrix3<f64>,
}

impl Default for Goniometer {
    fn default() -> Self {
        Self::identity()
    }
}

impl Goniometer {
    /// A goniometer with no axes.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            axes: Vec::new(),
            r: Matrix3::identity(),
        }
    }

    /// Builds the goniometer from an ordered axis list (outermost first).
    ///
    /// # Errors
    /// Returns an error if an axis direction is zero.
    pub fn from_axes(axes: Vec<GoniometerAxis>) -> Result<Self> {
        let mut r = Rotation3::identity();
        for axis in &axes {
            r = r * axis.rotation()?;
        }
        Ok(Self {
            axes,
            r: r.into_inner(),
        })
    }

    /// Wraps an explicit rotation matrix.
    ///
    /// # Errors
    /// Returns an error if `r` is not a proper rotation.
    pub fn from_matrix(r: Matrix3<f64>) -> Result<Self> {
        check_rotation(&r)?;
        Ok(Self {
            axes: Vec::new(),
            r,
        })
    }

    /// Single counter-clockwise rotation about the vertical (y) axis.
    #[must_use]
    pub fn omega(angle_deg: f64) -> Self {
        let axis = GoniometerAxis::new("omega", [0.0, 1.0, 0.0], angle_deg);
        let r = Rotation3::from_axis_angle(&Vector3::y_axis(), angle_deg.to_radians());
        Self {
            axes: vec![axis],
            r: r.into_inner(),
        }
    }

    /// Rotation matrix `R`.
    #[must_use]
    pub fn r(&self) -> &Matrix3<f64> {
        &self.r
    }

    /// Axes the matrix was built from (empty for explicit matrices).
    #[must_use]
    pub fn axes(&self) -> &[GoniometerAxis] {
        &self.axes
    }

    /// Returns true if the rotation is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        (self.r - Matrix3::identity()).abs().max() < 1e-12
    }
}

impl TryFrom<GoniometerRecord> for Goniometer {
    type Error = Error;

    fn try_from(record: GoniometerRecord) -> Result<Self> {
        match (record.axes.is_empty(), record.matrix) {
            (false, _) => Self::from_axes(record.axes),
            (true, Some(rows)) => Self::from_matrix(matrix_from_rows(rows)),
            (true, None) => Ok(Self::identity()),
        }
    }
}

impl From<Goniometer> for GoniometerRecord {
    fn from(g: Goniometer) -> Self {
        let r = g.r;
        Self {
            matrix: Some([
                [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
                [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
                [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
            ]),
            axes: g.axes,
        }
    }
}
