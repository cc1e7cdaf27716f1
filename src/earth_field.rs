//! Expected earth magnetic field in the local NED frame

use super::Vector3;

/// Source of the expected earth field. Implementations must be deterministic:
/// the same query returns the same vector.
pub trait EarthField {
    fn field_ned(&self, time_us: u64) -> Vector3;
}

/// Fixed field vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantField(pub Vector3);

impl EarthField for ConstantField {
    fn field_ned(&self, _time_us: u64) -> Vector3 {
        self.0
    }
}

/// Field described by total intensity, inclination (positive down) and
/// declination (positive east of true north).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoMagField {
    pub strength: f64,    // [field units]
    pub inclination: f64, // [rad]
    pub declination: f64, // [rad]
}

impl GeoMagField {
    pub fn from_degrees(strength: f64, inclination_deg: f64, declination_deg: f64) -> Self {
        Self {
            strength,
            inclination: inclination_deg.to_radians(),
            declination: declination_deg.to_radians(),
        }
    }

    pub fn to_ned(&self) -> Vector3 {
        let horizontal = self.strength * self.inclination.cos();
        Vector3::new(
            horizontal * self.declination.cos(),
            horizontal * self.declination.sin(),
            self.strength * self.inclination.sin(),
        )
    }
}

impl EarthField for GeoMagField {
    fn field_ned(&self, _time_us: u64) -> Vector3 {
        self.to_ned()
    }
}

impl<F: EarthField + ?Sized> EarthField for &F {
    fn field_ned(&self, time_us: u64) -> Vector3 {
        (**self).field_ned(time_us)
    }
}
