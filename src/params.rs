use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tuning loaded from the vehicle configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagCalParams {
    /// 1-sigma magnetometer noise per axis [field units]
    pub mag_noise: f64,
}

impl Default for MagCalParams {
    fn default() -> Self {
        Self { mag_noise: 5.0e-2 }
    }
}

impl MagCalParams {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let txt = fs::read_to_string(path)?;
        Self::from_json_str(&txt)
    }

    /// Measurement noise variance, with negative settings treated as zero
    pub fn noise_variance(&self) -> f64 {
        let noise = self.mag_noise.max(0.0);
        noise * noise
    }
}
