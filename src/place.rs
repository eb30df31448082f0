//! Rigid transforms for particle placement.
//!
//! A [`Place`] is a rotation followed by a shift, the unit in which every
//! particle position, instance transform and marker coordinate in this
//! crate is expressed. Composition reads right-to-left:
//! `origin * translation * rotation` applies the rotation first.

use glam::{DMat3, DVec3};
use std::ops::Mul;

/// A rigid transform: `p ↦ rotation * p + shift`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Place {
    rotation: DMat3,
    shift: DVec3,
}

impl Place {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        shift: DVec3::ZERO,
    };

    /// A pure translation.
    #[must_use]
    pub fn from_translation(shift: DVec3) -> Self {
        Self {
            rotation: DMat3::IDENTITY,
            shift,
        }
    }

    /// A pure rotation about the global origin.
    #[must_use]
    pub fn from_rotation(rotation: DMat3) -> Self {
        Self {
            rotation,
            shift: DVec3::ZERO,
        }
    }

    /// A rotation of `degrees` about `axis` through the global origin.
    #[must_use]
    pub fn from_axis_angle(axis: DVec3, degrees: f64) -> Self {
        Self::from_rotation(DMat3::from_axis_angle(axis, degrees.to_radians()))
    }

    /// The rotational part.
    #[must_use]
    pub fn rotation(&self) -> DMat3 {
        self.rotation
    }

    /// The translational part.
    #[must_use]
    pub fn translation(&self) -> DVec3 {
        self.shift
    }

    /// This transform with its translational part removed.
    #[must_use]
    pub fn zero_translation(&self) -> Self {
        Self {
            rotation: self.rotation,
            shift: DVec3::ZERO,
        }
    }

    /// The inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv = self.rotation.inverse();
        Self {
            rotation: inv,
            shift: -(inv * self.shift),
        }
    }

    /// Whether this is (exactly) the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rotation == DMat3::IDENTITY && self.shift == DVec3::ZERO
    }

    /// Apply the transform to a point.
    #[must_use]
    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.rotation * p + self.shift
    }

    /// Element-wise approximate equality, for reconciliation checks and
    /// tests.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.rotation.abs_diff_eq(other.rotation, epsilon)
            && self.shift.abs_diff_eq(other.shift, epsilon)
    }
}

impl Default for Place {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Place {
    type Output = Self;

    /// `(a * b)(p) = a(b(p))`.
    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            shift: self.rotation * rhs.shift + self.shift,
        }
    }
}
