//! Pluggable Euler-angle conventions.
//!
//! Every particle file format stores orientation as three angles around a
//! fixed axis sequence, but the sequences and sign conventions differ.
//! An [`EulerRotation`] converts between a rotation matrix and the three
//! angles of one convention; each format picks its implementation. Angle
//! conventions are never interchangeable — converting between formats goes
//! through the matrix (see [`crate::data::ParticleData::from_particle_data`]).
//!
//! The gimbal-lock fallback at the axis-2 singularity is part of each
//! convention's contract, including which angle absorbs the residual
//! rotation; the two implementations here intentionally do not share it.

use glam::{DMat3, DVec3};

use crate::place::Place;

/// One of the three Cartesian unit axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

impl Axis {
    /// The unit vector along this axis.
    #[must_use]
    pub fn unit(self) -> DVec3 {
        match self {
            Self::X => DVec3::X,
            Self::Y => DVec3::Y,
            Self::Z => DVec3::Z,
        }
    }
}

/// Matrix element by `(row, column)`, matching the published decomposition
/// formulas (glam stores columns).
fn elem(m: &DMat3, row: usize, col: usize) -> f64 {
    m.col(col)[row]
}

/// Conversion between a rotation matrix and three Euler angles (degrees)
/// around a fixed axis sequence.
pub trait EulerRotation {
    /// Stable name of this convention, used by session snapshots.
    fn convention_name(&self) -> &'static str;

    /// The rotation axes for angles 1, 2 and 3, in application order.
    fn axes(&self) -> [Axis; 3];

    /// Whether the stored angles describe the inverse rotation; if so,
    /// [`EulerRotation::as_place`] negates all three before composing.
    fn inverted(&self) -> bool {
        false
    }

    /// Decompose a rotation matrix into `[ang_1, ang_2, ang_3]` degrees.
    ///
    /// At the axis-2 singularity the result follows this convention's
    /// documented fallback rather than raising or returning NaN.
    fn rot_from_matrix(&self, matrix: &DMat3) -> [f64; 3];

    /// Compose the three elemental rotations (`R3 * R2 * R1`), honoring
    /// the inversion flag.
    fn as_place(&self, angles: [f64; 3]) -> Place {
        let [a1, a2, a3] = if self.inverted() {
            [-angles[0], -angles[1], -angles[2]]
        } else {
            angles
        };
        let [x1, x2, x3] = self.axes();
        Place::from_axis_angle(x3.unit(), a3)
            * Place::from_axis_angle(x2.unit(), a2)
            * Place::from_axis_angle(x1.unit(), a1)
    }
}

// ---------------------------------------------------------------------------
// Z-X-Z (motive-list / tab-separated convention)
// ---------------------------------------------------------------------------

/// Z-X-Z convention (`phi`, `the`, `psi`), no inversion.
///
/// Singularity: for `m22 > 0.9999` (second angle near zero) `phi` is set
/// to zero and the full in-plane rotation is attributed to `psi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZxzConvention;

/// Shared instance of the Z-X-Z convention.
pub static ZXZ: ZxzConvention = ZxzConvention;

impl EulerRotation for ZxzConvention {
    fn convention_name(&self) -> &'static str {
        "zxz"
    }

    fn axes(&self) -> [Axis; 3] {
        [Axis::Z, Axis::X, Axis::Z]
    }

    fn rot_from_matrix(&self, matrix: &DMat3) -> [f64; 3] {
        let m22 = elem(matrix, 2, 2);

        // 1 - m22² can drift below zero for a numerically imperfect
        // rotation matrix; arccos/sqrt inputs must stay in range.
        let sin_theta = (1.0 - m22 * m22).max(0.0).sqrt();
        let the = sin_theta.atan2(m22).to_degrees();

        if m22 > 0.9999 {
            let m00 = elem(matrix, 0, 0).clamp(-1.0, 1.0);
            let psi = -elem(matrix, 0, 1).signum() * m00.acos().to_degrees();
            [0.0, the, psi]
        } else {
            let phi = elem(matrix, 2, 0).atan2(elem(matrix, 2, 1)).to_degrees();
            let psi = elem(matrix, 0, 2).atan2(-elem(matrix, 1, 2)).to_degrees();
            [phi, the, psi]
        }
    }
}

// ---------------------------------------------------------------------------
// Inverted Z-Y-Z (STAR convention)
// ---------------------------------------------------------------------------

/// Single-precision epsilon; the reference decomposition tests against the
/// f32 grid even though the math runs in f64.
const EPSILON: f64 = f32::EPSILON as f64;
const EPSILON16: f64 = 16.0 * EPSILON;

/// Inverted Z-Y-Z convention (`rot`, `tilt`, `psi`).
///
/// Singularity: when `sqrt(m02² + m12²) ≤ 16ε`, `rot` is zero, `tilt`
/// snaps to 0° or 180° by the sign of `m22`, and `psi` absorbs the
/// in-plane rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelionConvention;

/// Shared instance of the inverted Z-Y-Z convention.
pub static ZYZ_INVERTED: RelionConvention = RelionConvention;

impl RelionConvention {
    fn abs_sb(matrix: &DMat3) -> Option<f64> {
        let m02 = elem(matrix, 0, 2);
        let m12 = elem(matrix, 1, 2);
        let abs_sb = (m02 * m02 + m12 * m12).sqrt();
        (abs_sb > EPSILON16).then_some(abs_sb)
    }

    /// Sign of sin(tilt), recovered from the third angle.
    fn sign_sb(matrix: &DMat3) -> f64 {
        let m02 = elem(matrix, 0, 2);
        let m12 = elem(matrix, 1, 2);
        let psi = m12.atan2(-m02);

        if psi.sin().abs() < EPSILON {
            (-m02 / psi.cos()).signum()
        } else if psi.sin() > 0.0 {
            m12.signum()
        } else {
            -m12.signum()
        }
    }
}

impl EulerRotation for RelionConvention {
    fn convention_name(&self) -> &'static str {
        "zyz-inverted"
    }

    fn axes(&self) -> [Axis; 3] {
        [Axis::Z, Axis::Y, Axis::Z]
    }

    fn inverted(&self) -> bool {
        true
    }

    fn rot_from_matrix(&self, matrix: &DMat3) -> [f64; 3] {
        let m22 = elem(matrix, 2, 2);

        if let Some(abs_sb) = Self::abs_sb(matrix) {
            let rot = elem(matrix, 2, 1).atan2(elem(matrix, 2, 0));
            let tilt = (Self::sign_sb(matrix) * abs_sb).atan2(m22);
            let psi = elem(matrix, 1, 2).atan2(-elem(matrix, 0, 2));
            [rot.to_degrees(), tilt.to_degrees(), psi.to_degrees()]
        } else if m22.signum() > 0.0 {
            let psi = (-elem(matrix, 1, 0)).atan2(elem(matrix, 0, 0));
            [0.0, 0.0, psi.to_degrees()]
        } else {
            let psi = elem(matrix, 1, 0).atan2(-elem(matrix, 0, 0));
            [0.0, 180.0, psi.to_degrees()]
        }
    }
}

/// Look up a convention by its stable name (see
/// [`EulerRotation::convention_name`]).
#[must_use]
pub fn convention_by_name(name: &str) -> Option<&'static dyn EulerRotation> {
    match name {
        "zxz" => Some(&ZXZ),
        "zyz-inverted" => Some(&ZYZ_INVERTED),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_place_eq(a: &Place, b: &Place, eps: f64) {
        assert!(
            a.approx_eq(b, eps),
            "places differ:\n{a:?}\nvs\n{b:?}"
        );
    }

    fn conventions() -> [&'static dyn EulerRotation; 2] {
        [&ZXZ, &ZYZ_INVERTED]
    }

    #[test]
    fn round_trip_away_from_singularity() {
        let grid_1 = [-150.0, -60.0, 0.0, 45.0, 120.0, 179.0];
        let grid_2 = [5.0, 30.0, 90.0, 135.0, 175.0];
        for conv in conventions() {
            for &a1 in &grid_1 {
                for &a2 in &grid_2 {
                    for &a3 in &grid_1 {
                        let place = conv.as_place([a1, a2, a3]);
                        let angles = conv.rot_from_matrix(&place.rotation());
                        let round = conv.as_place(angles);
                        assert_place_eq(&place, &round, 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn round_trip_recovers_angles_in_range() {
        for conv in conventions() {
            let angles = [25.0, 70.0, -140.0];
            let place = conv.as_place(angles);
            let got = conv.rot_from_matrix(&place.rotation());
            for (a, b) in angles.iter().zip(got.iter()) {
                approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn zxz_singularity_attributes_rotation_to_psi() {
        // Second angle zero: in-plane rotation of 70° split across the two
        // z angles must come back entirely on psi, reproducing the matrix.
        let place = ZXZ.as_place([30.0, 0.0, 40.0]);
        let angles = ZXZ.rot_from_matrix(&place.rotation());
        assert_eq!(angles[0], 0.0);
        // The second angle may pick up ~1e-7 degrees of float noise from
        // the m22 ≈ 1 sqrt; the reconstruction inherits it.
        approx::assert_abs_diff_eq!(angles[1], 0.0, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(angles[2].abs(), 70.0, epsilon = 1e-9);
        assert_place_eq(&place, &ZXZ.as_place(angles), 1e-6);
    }

    #[test]
    fn zyz_singularity_at_zero_and_pi() {
        for tilt in [0.0, 180.0] {
            let place = ZYZ_INVERTED.as_place([20.0, tilt, 35.0]);
            let angles = ZYZ_INVERTED.rot_from_matrix(&place.rotation());
            assert_eq!(angles[0], 0.0);
            approx::assert_abs_diff_eq!(angles[1], tilt, epsilon = 1e-6);
            assert_place_eq(&place, &ZYZ_INVERTED.as_place(angles), 1e-9);
        }
    }

    #[test]
    fn no_jump_near_the_singular_point() {
        // Matrices infinitesimally off the singular point must still
        // reproduce themselves through a round trip. Inside a fallback
        // branch the reconstruction error is bounded by the (tiny) second
        // angle itself, hence the looser tolerance.
        for conv in conventions() {
            for &a2 in &[1e-3, 0.9, 179.1] {
                let place = conv.as_place([15.0, a2, -80.0]);
                let round = conv.as_place(conv.rot_from_matrix(&place.rotation()));
                assert_place_eq(&place, &round, 1e-4);
            }
        }
    }
}
