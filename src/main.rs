//! Replays a sample log (or a synthetic yaw manoeuvre) through the
//! magnetometer bias / yaw offset filter and writes the estimates as CSV.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use yaw_mag_bias::replay::{self, LogSample, Manoeuvre};
use yaw_mag_bias::validation::sphere_fit;
use yaw_mag_bias::{FusionOutcome, GeoMagField, MagBiasCalibrator, MagCalParams, Vector3};

#[derive(Parser, Debug)]
#[command(version, about = "Magnetometer bias and yaw offset estimation replay")]
struct Args {
    /// Sample log CSV. A synthetic 30 deg/s level turn is used when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// JSON parameter file
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Result CSV, one row per fused sample
    #[arg(short, long, default_value = "./result_mag_cal.csv")]
    output: PathBuf,

    /// Earth field total intensity [Gauss]
    #[arg(long, default_value_t = 0.5)]
    field_strength: f64,

    /// Earth field inclination [deg]
    #[arg(long, default_value_t = 60.0)]
    inclination_deg: f64,

    /// Earth field declination [deg]
    #[arg(long, default_value_t = 0.0)]
    declination_deg: f64,

    /// Bias of the synthetic magnetometer, "x,y,z"
    #[arg(long, default_value = "0.1,-0.05,0.02", allow_hyphen_values = true)]
    true_bias: String,

    /// Synthetic manoeuvre length [s]
    #[arg(long, default_value_t = 60.0)]
    duration: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let params = match &args.params {
        Some(path) => MagCalParams::from_json_file(path)
            .with_context(|| format!("loading parameters from {}", path.display()))?,
        None => MagCalParams::default(),
    };
    let field = GeoMagField::from_degrees(args.field_strength, args.inclination_deg, args.declination_deg);

    let samples = match &args.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            replay::load_csv(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let true_bias = parse_vector(&args.true_bias)?;
            info!("no input log, replaying a synthetic turn with bias {:?}", true_bias.as_slice());
            replay::synthetic_yaw_manoeuvre(&Manoeuvre {
                duration: args.duration,
                field: field.to_ned(),
                true_bias,
                ..Manoeuvre::default()
            })
        }
    };
    info!("{} samples, mag noise {}", samples.len(), params.mag_noise);

    let mut cal = MagBiasCalibrator::new(params);
    let mut writer = BufWriter::new(
        File::create(&args.output).with_context(|| format!("creating {}", args.output.display()))?,
    );
    writeln!(writer, "{}", replay::RESULT_HEADER)?;
    for s in &samples {
        if let FusionOutcome::Fused(record) = cal.fuse(&s.imu, &s.mag, &s.vehicle, &field) {
            replay::write_result_row(&mut writer, record.time_us, &cal)?;
        }
    }
    writer.flush()?;

    print_summary(&cal, &samples);
    Ok(())
}

fn print_summary(cal: &MagBiasCalibrator, samples: &[LogSample]) {
    let health = cal.health();
    println!("--- Filter estimate ---");
    println!("fusions: {}, full resets: {}, fault resets: {}", health.fusions, health.full_resets, health.fault_resets);
    let b = cal.bias();
    let var = cal.covariance().variances();
    println!(
        "bias: [{:.4}, {:.4}, {:.4}] +- [{:.4}, {:.4}, {:.4}]",
        b[0], b[1], b[2], var[0].sqrt(), var[1].sqrt(), var[2].sqrt()
    );
    println!(
        "yaw offset: {:.2} deg +- {:.2} deg",
        cal.yaw_offset().to_degrees(),
        var[3].sqrt().to_degrees()
    );

    // a single-axis turn only sweeps a cone, so this is often unavailable
    let raw: Vec<Vector3> = samples.iter().map(|s| s.mag.mag).collect();
    println!("--- Sphere fit of raw samples ---");
    match sphere_fit(&raw) {
        Some(fit) => println!(
            "center: [{:.4}, {:.4}, {:.4}], radius: {:.4}",
            fit.center[0], fit.center[1], fit.center[2], fit.radius
        ),
        None => println!("not enough attitude coverage for a sphere fit"),
    }
}

fn parse_vector(txt: &str) -> Result<Vector3> {
    let vals = txt
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid vector '{}'", txt))?;
    if vals.len() != 3 {
        bail!("expected 3 components in '{}', found {}", txt, vals.len());
    }
    Ok(Vector3::new(vals[0], vals[1], vals[2]))
}
