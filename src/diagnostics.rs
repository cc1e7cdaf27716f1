//! Per-cycle outcomes and health counters for observers of the filter

use serde::Serialize;

use crate::covariance::CalibrationState;

/// Why a cycle did nothing. None of these are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// IMU integration interval not strictly positive
    InvalidDt,
    /// The primary filter is fusing the magnetometer
    Suppressed,
    /// Not yawing fast enough, or too tilted
    Inactive,
    /// Heading moved less than 10 deg since the last accepted cycle
    InsufficientYawChange,
}

/// Snapshot of one completed fusion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FusionRecord {
    pub time_us: u64,
    /// Clamped innovations, X Y Z
    pub innovations: [f64; 3],
    pub innovation_variances: [f64; 3],
    pub state: CalibrationState,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum FusionOutcome {
    Skipped(SkipReason),
    /// First use or stale filter: covariance and state re-initialised
    Reset,
    Fused(FusionRecord),
    /// Numerical fault on `axis`: covariance reset, remaining axes dropped
    Faulted { axis: usize },
}

impl FusionOutcome {
    pub fn is_fused(&self) -> bool {
        matches!(self, FusionOutcome::Fused(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounters {
    pub fusions: u64,
    pub full_resets: u64,
    pub fault_resets: u64,
}
