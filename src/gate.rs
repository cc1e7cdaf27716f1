//! Decides when the calibration filter is allowed to fuse.
//!
//! The bias and yaw offset are only separable while the vehicle turns about
//! an axis close to vertical, so fusion is gated on yaw rate and tilt with
//! hysteresis, and throttled to once per 10 degrees of heading change.

use std::f64::consts::PI;

use log::debug;

use super::{Matrix3x3, UnitQuaternion, Vector3};
use crate::diagnostics::SkipReason;

/// Yaw rate above which an inactive gate switches on [rad/s]
pub const YAW_RATE_ENABLE: f64 = 10.0 * PI / 180.0;

/// Yaw rate below which an active gate switches off [rad/s]
pub const YAW_RATE_DISABLE: f64 = 5.0 * PI / 180.0;

/// Minimum heading change between two fusions [rad]
pub const YAW_DELTA_MIN: f64 = 10.0 * PI / 180.0;

/// Smallest usable IMU integration interval [s]
pub const MIN_DELTA_ANG_DT: f64 = 1e-4;

/// cos(45 deg): the body z axis must be within 45 deg of down
const TILT_COS_LIMIT: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GateState {
    active: bool,
    yaw_last: f64, // heading at the last accepted cycle [rad]
}

impl GateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn yaw_last(&self) -> f64 {
        self.yaw_last
    }

    /// Updates the hysteresis flag from one IMU interval.
    ///
    /// * r_to_earth: body to earth (NED) rotation
    /// * corrected_delta_ang: delta angle with the gyro bias removed [rad]
    pub fn update_activity(
        &mut self,
        r_to_earth: &Matrix3x3,
        corrected_delta_ang: &Vector3,
        delta_ang_dt: f64,
    ) -> Result<(), SkipReason> {
        if delta_ang_dt.is_nan() || delta_ang_dt <= MIN_DELTA_ANG_DT {
            return Err(SkipReason::InvalidDt);
        }

        let yaw_rate = r_to_earth.row(2).transpose().dot(corrected_delta_ang) / delta_ang_dt;
        let tilt_ok = r_to_earth[(2, 2)] > TILT_COS_LIMIT;

        if !self.active && yaw_rate.abs() > YAW_RATE_ENABLE && tilt_ok {
            self.active = true;
            debug!("mag cal gate on, yaw rate {:.1} deg/s", yaw_rate.to_degrees());
        } else if self.active && (yaw_rate.abs() < YAW_RATE_DISABLE || !tilt_ok) {
            self.active = false;
            debug!(
                "mag cal gate off, yaw rate {:.1} deg/s, tilt ok {}",
                yaw_rate.to_degrees(),
                tilt_ok
            );
        }
        Ok(())
    }

    /// Accepts the cycle only if the primary filter leaves the magnetometer
    /// alone, the gate is on and the heading moved far enough since the last
    /// accepted cycle. The heading reference is updated on acceptance only.
    pub fn admit(&mut self, attitude: &UnitQuaternion<f64>, mag_in_use: bool) -> Result<(), SkipReason> {
        if mag_in_use {
            return Err(SkipReason::Suppressed);
        }
        if !self.active {
            return Err(SkipReason::Inactive);
        }

        let (_, _, yaw) = attitude.euler_angles();
        if wrap_pi(yaw - self.yaw_last).abs() < YAW_DELTA_MIN {
            return Err(SkipReason::InsufficientYawChange);
        }
        self.yaw_last = yaw;
        Ok(())
    }
}

/// Wraps an angle difference into [-pi, pi].
pub fn wrap_pi(angle: f64) -> f64 {
    if angle > PI {
        angle - 2.0 * PI
    } else if angle < -PI {
        angle + 2.0 * PI
    } else {
        angle
    }
}
