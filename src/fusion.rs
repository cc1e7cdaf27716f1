//! Sequential (one axis at a time) Kalman update of the calibration filter
//!
//! Axis noises are uncorrelated, so X, Y and Z are fused as three scalar
//! measurements against the same state and covariance, in that order.

use std::f64::consts::PI;

use super::{Vector3, N_STATES};
use crate::covariance::{CalibrationState, MagCalCovariance};
use crate::error::FusionError;
use crate::model::MagModel;

/// Largest innovation applied to the state [field units]
pub const INNOVATION_LIMIT: f64 = 0.5;

/// Bias estimate limit [field units]
pub const BIAS_LIMIT: f64 = 0.5;

/// Yaw offset limit [rad]. A hard clamp, not an angle wrap.
pub const YAW_OFFSET_LIMIT: f64 = PI;

/// Result of one scalar update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisUpdate {
    /// Innovation after clamping to +-INNOVATION_LIMIT
    pub innovation: f64,
    pub innovation_variance: f64,
    pub gain: [f64; N_STATES],
}

/// Fuses all three axes of one magnetometer sample.
///
/// On a fault the remaining axes are not processed; corrections already made
/// by earlier axes stay in place.
pub fn fuse_sample(
    state: &mut CalibrationState,
    cov: &mut MagCalCovariance,
    model: &MagModel,
    measured: &Vector3,
    noise_var: f64,
) -> Result<[AxisUpdate; 3], FusionError> {
    let mut updates = [AxisUpdate {
        innovation: 0.0,
        innovation_variance: 0.0,
        gain: [0.0; N_STATES],
    }; 3];

    for axis in 0..3 {
        let h = model.jacobian(axis);
        let innovation = model.predicted[axis] - measured[axis];
        updates[axis] = fuse_axis(state, cov, axis, &h, innovation, noise_var)?;
    }
    Ok(updates)
}

/// Scalar Kalman update for a single axis.
///
/// * h: observation Jacobian row
/// * innovation: predicted - measured
/// * noise_var: measurement noise variance
pub fn fuse_axis(
    state: &mut CalibrationState,
    cov: &mut MagCalCovariance,
    axis: usize,
    h: &[f64; N_STATES],
    innovation: f64,
    noise_var: f64,
) -> Result<AxisUpdate, FusionError> {
    let p = cov.matrix_mut();

    // PH and the innovation variance H P H^T + R
    let mut ph = [0.0; N_STATES];
    let mut innovation_variance = noise_var;
    for row in 0..N_STATES {
        for col in 0..N_STATES {
            ph[row] += p[(row, col)] * h[col];
        }
        innovation_variance += h[row] * ph[row];
    }

    // a negative H P H^T means P is no longer positive semi-definite
    if innovation_variance.is_nan() || innovation_variance < noise_var {
        return Err(FusionError::IndefiniteCovariance {
            axis,
            innovation_variance,
        });
    }

    let mut gain = [0.0; N_STATES];
    for row in 0..N_STATES {
        gain[row] = ph[row] / innovation_variance;
    }

    // P <- P - K (H P)
    let mut hp = [0.0; N_STATES];
    for col in 0..N_STATES {
        for k in 0..N_STATES {
            hp[col] += h[k] * p[(k, col)];
        }
    }
    for row in 0..N_STATES {
        for col in 0..N_STATES {
            p[(row, col)] -= gain[row] * hp[col];
        }
    }
    cov.symmetrize();

    let innovation = innovation.clamp(-INNOVATION_LIMIT, INNOVATION_LIMIT);
    state.correct(&gain, innovation);
    constrain(state);

    Ok(AxisUpdate {
        innovation,
        innovation_variance,
        gain,
    })
}

/// Clamps the estimates to physically plausible values.
pub fn constrain(state: &mut CalibrationState) {
    for i in 0..3 {
        state.bias[i] = state.bias[i].clamp(-BIAS_LIMIT, BIAS_LIMIT);
    }
    state.yaw_offset = state.yaw_offset.clamp(-YAW_OFFSET_LIMIT, YAW_OFFSET_LIMIT);
}
