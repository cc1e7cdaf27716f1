use std::io;

use thiserror::Error;

/// Fault raised inside a fusion cycle. Never fatal: the calibrator resets the
/// covariance and carries on with the next sample.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum FusionError {
    #[error("innovation variance {innovation_variance} on axis {axis} is below the measurement noise, covariance is indefinite")]
    IndefiniteCovariance { axis: usize, innovation_variance: f64 },
}

/// Errors from loading parameters and sample logs.
#[derive(Error, Debug)]
pub enum MagCalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid parameter file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, MagCalError>;
