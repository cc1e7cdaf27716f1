//! Yaw-offset and magnetometer-bias estimator.
//!
//! A 4-state Kalman filter (3-axis magnetometer bias + residual yaw offset)
//! that runs beside a primary attitude estimator. It fuses the three
//! magnetometer axes sequentially whenever the vehicle is yawing fast enough
//! while roughly level, and stays idle while the primary filter is fusing the
//! magnetometer itself.
//!
//! Frames: the attitude quaternion rotates body vectors into the local
//! North-East-Down earth frame.

pub use nalgebra::{SMatrix, SVector, UnitQuaternion};

pub type Vector3 = SVector<f64, 3>;
pub type Vector4 = SVector<f64, 4>;
pub type Matrix3x3 = SMatrix<f64, 3, 3>;
pub type Matrix4x4 = SMatrix<f64, 4, 4>;

/// Number of error states: bias X, Y, Z and yaw offset
pub const N_STATES: usize = 4;

/// Index of the yaw offset in the state vector
pub const YAW_INDEX: usize = 3;

pub mod calibrator;
pub mod covariance;
pub mod diagnostics;
pub mod earth_field;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod model;
pub mod params;
pub mod replay;
pub mod validation;

pub use calibrator::{ImuSample, MagBiasCalibrator, MagSample, VehicleState};
pub use covariance::{CalibrationState, MagCalCovariance};
pub use diagnostics::{FusionOutcome, FusionRecord, HealthCounters, SkipReason};
pub use earth_field::{ConstantField, EarthField, GeoMagField};
pub use error::{FusionError, MagCalError};
pub use params::MagCalParams;
