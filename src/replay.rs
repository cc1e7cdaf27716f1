//! Offline replay: sample logs in, estimates out.
//!
//! Sample log columns (one header line):
//! `time_us,dax,day,daz,dt,qw,qx,qy,qz,gbx,gby,gbz,mx,my,mz,mag_in_use`

use std::io::{BufRead, Write};

use nalgebra::Quaternion;

use super::{UnitQuaternion, Vector3};
use crate::calibrator::{ImuSample, MagBiasCalibrator, MagSample, VehicleState};
use crate::error::{MagCalError, Result};
use crate::gate::wrap_pi;
use crate::model::yaw_correction;

const N_COLUMNS: usize = 16;

pub const RESULT_HEADER: &str = "time_us,b_x,b_y,b_z,yaw_offset,P00,P11,P22,P33";

/// One time-aligned IMU, magnetometer and vehicle state record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogSample {
    pub imu: ImuSample,
    pub mag: MagSample,
    pub vehicle: VehicleState,
}

/// Reads a sample log. Blank lines are ignored.
pub fn load_csv<R: BufRead>(reader: R) -> Result<Vec<LogSample>> {
    let mut samples = Vec::new();
    for (idx, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        samples.push(parse_line(&line).map_err(|reason| MagCalError::Parse {
            line: idx + 1,
            reason,
        })?);
    }
    Ok(samples)
}

fn parse_line(line: &str) -> std::result::Result<LogSample, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != N_COLUMNS {
        return Err(format!("expected {} columns, found {}", N_COLUMNS, fields.len()));
    }

    let time_us = fields[0]
        .parse::<u64>()
        .map_err(|e| format!("time_us '{}': {}", fields[0], e))?;
    let mut vals = [0.0; N_COLUMNS - 2];
    for (i, val) in vals.iter_mut().enumerate() {
        let txt = fields[i + 1];
        *val = txt.parse().map_err(|e| format!("column {} '{}': {}", i + 2, txt, e))?;
    }
    let mag_in_use = match fields[N_COLUMNS - 1] {
        "1" | "true" => true,
        "0" | "false" => false,
        other => return Err(format!("mag_in_use '{}' is not a boolean", other)),
    };

    let quat = Quaternion::new(vals[4], vals[5], vals[6], vals[7]);
    if quat.norm() < 1e-6 {
        return Err("degenerate attitude quaternion".to_string());
    }

    Ok(LogSample {
        imu: ImuSample {
            time_us,
            delta_ang: Vector3::new(vals[0], vals[1], vals[2]),
            delta_ang_dt: vals[3],
        },
        mag: MagSample {
            mag: Vector3::new(vals[11], vals[12], vals[13]),
        },
        vehicle: VehicleState {
            attitude: UnitQuaternion::from_quaternion(quat),
            gyro_bias: Vector3::new(vals[8], vals[9], vals[10]),
            mag_in_use,
        },
    })
}

/// Writes the sample log format read by [`load_csv`].
pub fn write_samples<W: Write>(writer: &mut W, samples: &[LogSample]) -> Result<()> {
    writeln!(writer, "time_us,dax,day,daz,dt,qw,qx,qy,qz,gbx,gby,gbz,mx,my,mz,mag_in_use")?;
    for s in samples {
        let q = s.vehicle.attitude.quaternion();
        let d = &s.imu.delta_ang;
        let g = &s.vehicle.gyro_bias;
        let m = &s.mag.mag;
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            s.imu.time_us,
            d[0], d[1], d[2],
            s.imu.delta_ang_dt,
            q.w, q.i, q.j, q.k,
            g[0], g[1], g[2],
            m[0], m[1], m[2],
            s.vehicle.mag_in_use as u8,
        )?;
    }
    Ok(())
}

/// Appends the current estimate as one row of the result CSV.
pub fn write_result_row<W: Write>(writer: &mut W, time_us: u64, cal: &MagBiasCalibrator) -> Result<()> {
    let b = cal.bias();
    let var = cal.covariance().variances();
    writeln!(
        writer,
        "{},{},{},{},{},{},{},{},{}",
        time_us, b[0], b[1], b[2], cal.yaw_offset(), var[0], var[1], var[2], var[3]
    )?;
    Ok(())
}

/// Constant-rate turn about the earth down axis at a fixed tilt.
#[derive(Clone, Debug, PartialEq)]
pub struct Manoeuvre {
    pub start_time_us: u64,
    pub duration: f64,    // [s]
    pub dt: f64,          // IMU interval [s]
    pub yaw_rate: f64,    // [rad/s]
    pub roll: f64,        // [rad]
    pub pitch: f64,       // [rad]
    pub field: Vector3,   // earth field, NED
    pub true_bias: Vector3,
    /// True heading minus the heading reported by the primary filter [rad]
    pub true_yaw_offset: f64,
    pub gyro_bias: Vector3, // [rad] per IMU interval
}

impl Default for Manoeuvre {
    fn default() -> Self {
        Self {
            start_time_us: 1_000_000,
            duration: 60.0,
            dt: 0.004,
            yaw_rate: 30f64.to_radians(),
            roll: 0.0,
            pitch: 0.0,
            field: Vector3::new(0.21, 0.02, 0.43),
            true_bias: Vector3::new(0.1, -0.05, 0.02),
            true_yaw_offset: 0.0,
            gyro_bias: Vector3::zeros(),
        }
    }
}

/// Noise-free samples of a vehicle flying `m`.
pub fn synthetic_yaw_manoeuvre(m: &Manoeuvre) -> Vec<LogSample> {
    let n = (m.duration / m.dt).round() as u64;
    let dt_us = (m.dt * 1e6).round() as u64;
    let down_delta = Vector3::new(0.0, 0.0, m.yaw_rate * m.dt);

    (0..n)
        .map(|i| {
            let yaw = wrap_pi((i as f64 * m.dt * m.yaw_rate) % (2.0 * std::f64::consts::PI));
            let attitude = UnitQuaternion::from_euler_angles(m.roll, m.pitch, yaw);
            let truth = yaw_correction(m.true_yaw_offset) * attitude;

            LogSample {
                imu: ImuSample {
                    time_us: m.start_time_us + i * dt_us,
                    delta_ang: attitude.inverse_transform_vector(&down_delta) + m.gyro_bias,
                    delta_ang_dt: m.dt,
                },
                mag: MagSample {
                    mag: truth.inverse_transform_vector(&m.field) + m.true_bias,
                },
                vehicle: VehicleState {
                    attitude,
                    gyro_bias: m.gyro_bias,
                    mag_in_use: false,
                },
            }
        })
        .collect()
}
