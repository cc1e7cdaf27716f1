//! Magnetometer measurement model and its observation Jacobian
//!
//! h(x) = C(q_c)^T * m_earth + b,  q_c = q_z(psi) * q
//!
//! q is the body to earth attitude from the primary filter, q_z(psi) a
//! rotation by the yaw offset psi about the earth down axis, m_earth the
//! expected earth field (NED) and b the magnetometer bias.

use super::{Matrix3x3, UnitQuaternion, Vector3, N_STATES, YAW_INDEX};
use crate::covariance::CalibrationState;

/// Per-cycle linearisation point. Built once per sample, then queried per
/// axis by the sequential update.
#[derive(Clone, Copy, Debug)]
pub struct MagModel {
    /// Predicted magnetometer reading in body axes
    pub predicted: Vector3,
    /// d(predicted)/d(yaw offset) for each body axis
    d_yaw: Vector3,
}

impl MagModel {
    pub fn new(state: &CalibrationState, attitude: &UnitQuaternion<f64>, mag_earth: &Vector3) -> Self {
        let q_corrected = yaw_correction(state.yaw_offset) * attitude;
        let predicted = q_corrected.inverse_transform_vector(mag_earth) + state.bias;

        let r_to_earth = attitude.to_rotation_matrix();
        let d_yaw = yaw_partial(r_to_earth.matrix(), state.yaw_offset, mag_earth);

        Self { predicted, d_yaw }
    }

    /// Observation Jacobian row of one body axis over
    /// [bias_x, bias_y, bias_z, yaw_offset].
    pub fn jacobian(&self, axis: usize) -> [f64; N_STATES] {
        let mut h = [0.0; N_STATES];
        h[axis] = 1.0;
        h[YAW_INDEX] = self.d_yaw[axis];
        h
    }
}

/// Pure rotation about the earth down axis.
pub fn yaw_correction(yaw_offset: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(0.0, 0.0, yaw_offset)
}

/// Closed form of d/dpsi [ C^T * Rz(psi)^T * m ].
///
/// Rz(psi)^T m = [ c*mn + s*me, -s*mn + c*me, md ], so its derivative is
/// [ -s*mn + c*me, -c*mn - s*me, 0 ] and only the first two columns of C^T
/// contribute.
fn yaw_partial(r_to_earth: &Matrix3x3, yaw_offset: f64, mag_earth: &Vector3) -> Vector3 {
    let (s, c) = yaw_offset.sin_cos();
    let mn = mag_earth[0];
    let me = mag_earth[1];

    let dn = -s * mn + c * me;
    let de = -c * mn - s * me;

    Vector3::new(
        r_to_earth[(0, 0)] * dn + r_to_earth[(1, 0)] * de,
        r_to_earth[(0, 1)] * dn + r_to_earth[(1, 1)] * de,
        r_to_earth[(0, 2)] * dn + r_to_earth[(1, 2)] * de,
    )
}
