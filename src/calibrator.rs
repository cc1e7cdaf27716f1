//! Magnetometer bias and yaw offset calibration filter.
//!
//! One call to [`MagBiasCalibrator::fuse`] per time-aligned IMU and
//! magnetometer sample pair. A cycle runs through independent checks in a
//! fixed order:
//!
//! 1. IMU interval valid, update the activity gate
//! 2. primary filter not using the magnetometer, gate active, heading moved
//! 3. first use or more than 20 s since the last fusion: full reset, stop
//! 4. yaw offset process noise
//! 5. sequential X, Y, Z update
//!
//! Skips leave the state and covariance untouched. A numerical fault during
//! the update resets the covariance only and drops the rest of the sample.

use log::{debug, info, warn};

use super::{UnitQuaternion, Vector3};
use crate::covariance::{CalibrationState, MagCalCovariance};
use crate::diagnostics::{FusionOutcome, FusionRecord, HealthCounters, SkipReason};
use crate::earth_field::EarthField;
use crate::error::FusionError;
use crate::fusion;
use crate::gate::GateState;
use crate::model::MagModel;
use crate::params::MagCalParams;

/// Time without a fusion after which the filter starts over [us]
pub const STALE_TIMEOUT_US: u64 = 20_000_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuSample {
    pub time_us: u64,
    /// Integrated body rates over the sample interval [rad]
    pub delta_ang: Vector3,
    pub delta_ang_dt: f64, // [s]
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MagSample {
    pub mag: Vector3, // [field units]
}

/// What the primary estimator knows about the vehicle at the sample time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleState {
    /// Body to earth (NED) attitude
    pub attitude: UnitQuaternion<f64>,
    /// Gyro bias over one IMU interval [rad]
    pub gyro_bias: Vector3,
    /// The primary filter is fusing the magnetometer itself
    pub mag_in_use: bool,
}

pub struct MagBiasCalibrator {
    params: MagCalParams,
    state: CalibrationState,
    cov: MagCalCovariance,
    gate: GateState,
    last_fused_us: Option<u64>,
    health: HealthCounters,
}

impl MagBiasCalibrator {
    pub fn new(params: MagCalParams) -> Self {
        Self {
            params,
            state: CalibrationState::zero(),
            cov: MagCalCovariance::new(),
            gate: GateState::new(),
            last_fused_us: None,
            health: HealthCounters::default(),
        }
    }

    pub fn params(&self) -> &MagCalParams {
        &self.params
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn bias(&self) -> Vector3 {
        self.state.bias
    }

    pub fn yaw_offset(&self) -> f64 {
        self.state.yaw_offset
    }

    pub fn covariance(&self) -> &MagCalCovariance {
        &self.cov
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    pub fn last_fused_us(&self) -> Option<u64> {
        self.last_fused_us
    }

    pub fn health(&self) -> &HealthCounters {
        &self.health
    }

    /// Runs one calibration cycle.
    pub fn fuse<F: EarthField>(
        &mut self,
        imu: &ImuSample,
        mag: &MagSample,
        vehicle: &VehicleState,
        earth: &F,
    ) -> FusionOutcome {
        if let Err(reason) = self.admit(imu, vehicle) {
            return FusionOutcome::Skipped(reason);
        }

        let dt = match self.last_fused_us {
            Some(last) if imu.time_us.saturating_sub(last) <= STALE_TIMEOUT_US => {
                imu.time_us.saturating_sub(last) as f64 * 1e-6
            }
            _ => {
                self.reset(imu.time_us);
                return FusionOutcome::Reset;
            }
        };
        self.cov.add_yaw_process_noise(dt);

        let mag_earth = earth.field_ned(imu.time_us);
        let model = MagModel::new(&self.state, &vehicle.attitude, &mag_earth);

        match fusion::fuse_sample(
            &mut self.state,
            &mut self.cov,
            &model,
            &mag.mag,
            self.params.noise_variance(),
        ) {
            Ok(updates) => {
                self.last_fused_us = Some(imu.time_us);
                self.health.fusions += 1;

                let record = FusionRecord {
                    time_us: imu.time_us,
                    innovations: updates.map(|u| u.innovation),
                    innovation_variances: updates.map(|u| u.innovation_variance),
                    state: self.state,
                };
                debug!(
                    "states = {:.3},{:.3},{:.3} , {:.3}, innov = {:.3},{:.3},{:.3}",
                    self.state.bias[0],
                    self.state.bias[1],
                    self.state.bias[2],
                    self.state.yaw_offset,
                    record.innovations[0],
                    record.innovations[1],
                    record.innovations[2],
                );
                FusionOutcome::Fused(record)
            }
            Err(err) => self.handle_fault(err),
        }
    }

    fn admit(&mut self, imu: &ImuSample, vehicle: &VehicleState) -> Result<(), SkipReason> {
        let corrected_delta_ang = imu.delta_ang - vehicle.gyro_bias;
        let r_to_earth = vehicle.attitude.to_rotation_matrix();

        self.gate
            .update_activity(r_to_earth.matrix(), &corrected_delta_ang, imu.delta_ang_dt)?;
        self.gate.admit(&vehicle.attitude, vehicle.mag_in_use)
    }

    fn reset(&mut self, time_us: u64) {
        match self.last_fused_us {
            None => info!("mag cal filter initialised"),
            Some(last) => info!(
                "mag cal filter reset after {:.1} s without fusion",
                time_us.saturating_sub(last) as f64 * 1e-6
            ),
        }
        self.cov.reset();
        self.state = CalibrationState::zero();
        self.last_fused_us = Some(time_us);
        self.health.full_resets += 1;
    }

    fn handle_fault(&mut self, err: FusionError) -> FusionOutcome {
        warn!("mag cal fusion numerical error - covariance reset: {}", err);
        self.cov.reset();
        self.health.fault_resets += 1;

        match err {
            FusionError::IndefiniteCovariance { axis, .. } => FusionOutcome::Faulted { axis },
        }
    }
}

impl Default for MagBiasCalibrator {
    fn default() -> Self {
        Self::new(MagCalParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earth_field::GeoMagField;
    use crate::replay::{synthetic_yaw_manoeuvre, LogSample, Manoeuvre};
    use crate::{Matrix4x4, Vector4};
    use approx::assert_relative_eq;

    fn field() -> GeoMagField {
        GeoMagField::from_degrees(0.5, 60.0, 5.0)
    }

    fn manoeuvre(true_bias: Vector3, duration: f64) -> Vec<LogSample> {
        synthetic_yaw_manoeuvre(&Manoeuvre {
            duration,
            dt: 0.01,
            yaw_rate: 30f64.to_radians(),
            field: field().to_ned(),
            true_bias,
            ..Manoeuvre::default()
        })
    }

    fn run(cal: &mut MagBiasCalibrator, samples: &[LogSample]) -> Vec<FusionOutcome> {
        samples
            .iter()
            .map(|s| cal.fuse(&s.imu, &s.mag, &s.vehicle, &field()))
            .collect()
    }

    fn prior() -> Matrix4x4 {
        Matrix4x4::from_diagonal(&Vector4::new(0.25, 0.25, 0.25, 1.0))
    }

    /// Runs until the filter has fused at least once.
    fn warmed_up() -> (MagBiasCalibrator, Vec<LogSample>) {
        let samples = manoeuvre(Vector3::new(0.1, -0.05, 0.02), 2.0);
        let mut cal = MagBiasCalibrator::default();
        run(&mut cal, &samples);
        assert!(cal.health().fusions > 0);
        (cal, samples)
    }

    #[test]
    fn test_skips_leave_state_untouched() {
        let (mut cal, samples) = warmed_up();
        let state = *cal.state();
        let cov = *cal.covariance();
        let last = samples[samples.len() - 1];

        let mut bad_dt = last.imu;
        bad_dt.time_us += 400_000;
        bad_dt.delta_ang_dt = 0.0;
        assert_eq!(
            cal.fuse(&bad_dt, &last.mag, &last.vehicle, &field()),
            FusionOutcome::Skipped(SkipReason::InvalidDt)
        );

        let mut suppressed = last.vehicle;
        suppressed.mag_in_use = true;
        suppressed.attitude = UnitQuaternion::from_euler_angles(0.0, 0.0, 2.0) * last.vehicle.attitude;
        let mut imu = last.imu;
        imu.time_us += 400_000;
        assert_eq!(
            cal.fuse(&imu, &last.mag, &suppressed, &field()),
            FusionOutcome::Skipped(SkipReason::Suppressed)
        );

        assert_eq!(*cal.state(), state);
        assert_eq!(*cal.covariance(), cov);
    }

    #[test]
    fn test_first_admitted_cycle_resets() {
        let samples = manoeuvre(Vector3::new(0.1, -0.05, 0.02), 2.0);
        let mut cal = MagBiasCalibrator::default();
        let outcomes = run(&mut cal, &samples);

        let first = outcomes
            .iter()
            .position(|o| !matches!(o, FusionOutcome::Skipped(_)))
            .unwrap();
        assert_eq!(outcomes[first], FusionOutcome::Reset);
        assert_eq!(cal.health().full_resets, 1);

        let mut fresh = MagBiasCalibrator::default();
        run(&mut fresh, &samples[..=first]);
        assert_eq!(*fresh.covariance().matrix(), prior());
        assert_eq!(*fresh.state(), CalibrationState::zero());
        assert_eq!(fresh.last_fused_us(), Some(samples[first].imu.time_us));
    }

    #[test]
    fn test_stationary_never_activates() {
        let mut cal = MagBiasCalibrator::default();
        let vehicle = VehicleState {
            attitude: UnitQuaternion::identity(),
            gyro_bias: Vector3::zeros(),
            mag_in_use: false,
        };
        let mag = MagSample {
            mag: field().to_ned(),
        };

        for i in 0..5000u64 {
            let imu = ImuSample {
                time_us: 1_000 + i * 4_000,
                delta_ang: Vector3::zeros(),
                delta_ang_dt: 0.004,
            };
            let outcome = cal.fuse(&imu, &mag, &vehicle, &field());
            assert_eq!(outcome, FusionOutcome::Skipped(SkipReason::Inactive));
        }
        assert!(!cal.is_active());
        assert_eq!(*cal.state(), CalibrationState::zero());
        assert_eq!(*cal.covariance().matrix(), prior());
    }

    #[test]
    fn test_converges_to_true_bias() {
        let true_bias = Vector3::new(0.1, -0.05, 0.02);
        let samples = manoeuvre(true_bias, 60.0);
        let mut cal = MagBiasCalibrator::default();
        let outcomes = run(&mut cal, &samples);

        assert!(outcomes.iter().filter(|o| o.is_fused()).count() > 100);
        assert_eq!(cal.health().fault_resets, 0);
        assert_relative_eq!(cal.bias(), true_bias, epsilon = 0.01);
        assert_relative_eq!(cal.yaw_offset(), 0.0, epsilon = 1f64.to_radians());
    }

    #[test]
    fn test_recovers_yaw_offset() {
        // the primary filter's heading is 5 deg short of the truth
        let offset = 5f64.to_radians();
        let samples = synthetic_yaw_manoeuvre(&Manoeuvre {
            duration: 60.0,
            dt: 0.01,
            yaw_rate: -30f64.to_radians(),
            field: field().to_ned(),
            true_bias: Vector3::new(-0.08, 0.03, 0.0),
            true_yaw_offset: offset,
            ..Manoeuvre::default()
        });
        let mut cal = MagBiasCalibrator::default();
        run(&mut cal, &samples);

        assert_relative_eq!(cal.yaw_offset(), offset, epsilon = 0.5f64.to_radians());
        assert_relative_eq!(cal.bias(), Vector3::new(-0.08, 0.03, 0.0), epsilon = 0.01);
    }

    #[test]
    fn test_fused_covariance_is_symmetric() {
        let samples = manoeuvre(Vector3::new(0.1, -0.05, 0.02), 20.0);
        let mut cal = MagBiasCalibrator::default();
        for s in &samples {
            if cal.fuse(&s.imu, &s.mag, &s.vehicle, &field()).is_fused() {
                let p = cal.covariance().matrix();
                assert_eq!(*p, p.transpose());
                for i in 0..4 {
                    assert!(p[(i, i)] >= 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_idle_gap_resets() {
        let (mut cal, samples) = warmed_up();
        assert_ne!(*cal.state(), CalibrationState::zero());
        let resets = cal.health().full_resets;

        // same manoeuvre, resumed 25 s later
        let mut outcome = None;
        for s in &samples {
            let mut imu = s.imu;
            imu.time_us += 25_000_000;
            let o = cal.fuse(&imu, &s.mag, &s.vehicle, &field());
            if !matches!(o, FusionOutcome::Skipped(_)) {
                outcome = Some(o);
                break;
            }
        }

        assert_eq!(outcome, Some(FusionOutcome::Reset));
        assert_eq!(cal.health().full_resets, resets + 1);
        assert_eq!(*cal.covariance().matrix(), prior());
        assert_eq!(*cal.state(), CalibrationState::zero());
    }

    #[test]
    fn test_fault_resets_covariance_only() {
        let (mut cal, samples) = warmed_up();
        let last_fused = cal.last_fused_us();

        let mut corrupted = prior();
        corrupted[(0, 0)] = -1.0;
        cal.cov = MagCalCovariance::from_matrix(corrupted);
        let state = *cal.state();

        let mut outcome = None;
        for s in &samples {
            let mut imu = s.imu;
            imu.time_us += 3_000_000;
            let o = cal.fuse(&imu, &s.mag, &s.vehicle, &field());
            if !matches!(o, FusionOutcome::Skipped(_)) {
                outcome = Some(o);
                break;
            }
        }

        assert_eq!(outcome, Some(FusionOutcome::Faulted { axis: 0 }));
        assert_eq!(cal.health().fault_resets, 1);
        assert_eq!(*cal.covariance().matrix(), prior());
        assert_eq!(*cal.state(), state);
        assert_eq!(cal.last_fused_us(), last_fused);
    }

    #[test]
    fn test_large_disturbance_is_bounded() {
        let samples = manoeuvre(Vector3::new(0.1, -0.05, 0.02), 10.0);
        let mut cal = MagBiasCalibrator::default();
        for s in &samples {
            // magnetometer swamped by a nearby current
            let mag = MagSample {
                mag: s.mag.mag + Vector3::new(40.0, -40.0, 40.0),
            };
            let before = *cal.state();
            if let FusionOutcome::Fused(record) = cal.fuse(&s.imu, &mag, &s.vehicle, &field()) {
                for innov in record.innovations {
                    assert!(innov.abs() <= fusion::INNOVATION_LIMIT);
                }
                for i in 0..3 {
                    assert!((record.state.bias[i] - before.bias[i]).abs() <= 3.0 * fusion::INNOVATION_LIMIT);
                }
            }
            for i in 0..3 {
                assert!(cal.bias()[i].abs() <= fusion::BIAS_LIMIT);
            }
            assert!(cal.yaw_offset().abs() <= fusion::YAW_OFFSET_LIMIT);
        }
    }
}
