//! Attitude-independent bias reference for replay summaries.
//!
//! A least-squares sphere fit of raw magnetometer samples. The fitted centre
//! is the hard-iron bias; it needs the samples to cover a good part of the
//! sphere, so it only serves as a cross-check on the filter estimate.

use super::{Matrix4x4, Vector3, Vector4};

/// Smallest accepted ratio of singular values of the normal equations
const SINGULAR_RATIO: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereFit {
    pub center: Vector3,
    pub radius: f64,
}

/// Fits |m - c| = r.
///
/// Expanding gives the linear model x^2 + y^2 + z^2 + a x + b y + c z + d = 0,
/// solved through its normal equations. Returns `None` for degenerate point
/// sets (fewer than 4 points, or all on one plane).
pub fn sphere_fit(samples: &[Vector3]) -> Option<SphereFit> {
    if samples.len() < 4 {
        return None;
    }

    let mut a = Matrix4x4::zeros();
    let mut b = Vector4::zeros();
    for m in samples {
        let row = Vector4::new(m[0], m[1], m[2], 1.0);
        let sq = m.norm_squared();
        for i in 0..4 {
            // upper triangle only, mirrored below
            for j in i..4 {
                a[(i, j)] += row[i] * row[j];
            }
            b[i] -= row[i] * sq;
        }
    }
    for i in 1..4 {
        for j in 0..i {
            a[(i, j)] = a[(j, i)];
        }
    }

    // a turn about a single axis leaves the normal equations rank deficient
    let sv = a.singular_values();
    if sv.min() <= SINGULAR_RATIO * sv.max() {
        return None;
    }

    let x = a.lu().solve(&b)?;
    let center = -0.5 * Vector3::new(x[0], x[1], x[2]);
    let r_sq = center.norm_squared() - x[3];
    if r_sq.is_nan() || r_sq <= 0.0 {
        return None;
    }

    Some(SphereFit {
        center,
        radius: r_sq.sqrt(),
    })
}
