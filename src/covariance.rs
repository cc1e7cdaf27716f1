//! Error covariance and state of the calibration filter

use serde::Serialize;

use super::{Matrix4x4, Vector3, Vector4, N_STATES, YAW_INDEX};

/// Prior variance of each bias axis [field units^2]
pub const BIAS_VAR_INIT: f64 = 0.25;

/// Prior variance of the yaw offset [rad^2]
pub const YAW_VAR_INIT: f64 = 1.0;

/// Yaw offset random walk [rad/s]
pub const YAW_PROCESS_NOISE: f64 = 0.5 * std::f64::consts::PI / 180.0;

/// Lower bound applied to every variance after an update
pub const MIN_VARIANCE: f64 = 1e-12;

/// Bias and yaw offset estimates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CalibrationState {
    pub bias: Vector3,   // [field units]
    pub yaw_offset: f64, // [rad]
}

impl CalibrationState {
    pub fn zero() -> Self {
        Self {
            bias: Vector3::zeros(),
            yaw_offset: 0.0,
        }
    }

    /// Applies `-gain * innovation` to every state.
    pub(crate) fn correct(&mut self, gain: &[f64; N_STATES], innovation: f64) {
        for i in 0..3 {
            self.bias[i] -= gain[i] * innovation;
        }
        self.yaw_offset -= gain[YAW_INDEX] * innovation;
    }
}

/// 4x4 error covariance over [bias_x, bias_y, bias_z, yaw_offset].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MagCalCovariance {
    p: Matrix4x4,
}

impl MagCalCovariance {
    pub fn new() -> Self {
        Self { p: Self::prior() }
    }

    /// Wraps an arbitrary matrix. Used to seed the filter from a saved state
    /// and to inject corrupted covariances in tests.
    pub fn from_matrix(p: Matrix4x4) -> Self {
        Self { p }
    }

    fn prior() -> Matrix4x4 {
        Matrix4x4::from_diagonal(&Vector4::new(
            BIAS_VAR_INIT,
            BIAS_VAR_INIT,
            BIAS_VAR_INIT,
            YAW_VAR_INIT,
        ))
    }

    pub fn matrix(&self) -> &Matrix4x4 {
        &self.p
    }

    pub(crate) fn matrix_mut(&mut self) -> &mut Matrix4x4 {
        &mut self.p
    }

    pub fn variances(&self) -> [f64; N_STATES] {
        [self.p[(0, 0)], self.p[(1, 1)], self.p[(2, 2)], self.p[(3, 3)]]
    }

    /// Back to the diagonal prior. The state vector is left alone.
    pub fn reset(&mut self) {
        self.p = Self::prior();
    }

    /// Grows the yaw offset variance for `dt` seconds of drift. Bias states
    /// are treated as constant.
    pub fn add_yaw_process_noise(&mut self, dt: f64) {
        let sigma = dt * YAW_PROCESS_NOISE;
        self.p[(YAW_INDEX, YAW_INDEX)] += sigma * sigma;
    }

    /// Averages each off-diagonal pair and floors the diagonal.
    pub fn symmetrize(&mut self) {
        for row in 0..N_STATES {
            for col in 0..row {
                let tmp = (self.p[(row, col)] + self.p[(col, row)]) / 2.0;
                self.p[(row, col)] = tmp;
                self.p[(col, row)] = tmp;
            }
        }
        for i in 0..N_STATES {
            self.p[(i, i)] = self.p[(i, i)].max(MIN_VARIANCE);
        }
    }
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::zero()
    }
}

impl Default for MagCalCovariance {
    fn default() -> Self {
        Self::new()
    }
}
