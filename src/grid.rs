//! Sampling grid generation
//!
//! Points are laid out by walking `i * step` meters north from the origin and
//! then `j * step` meters east, using great-circle destination math on a
//! spherical Earth. The output is a pure function of its inputs: resuming a job
//! depends on regenerating bit-identical coordinates.
//!
//! # Coordinate System
//!
//! - Latitude: degrees north (-90 to 90)
//! - Longitude: degrees east (-180 to 180)
//! - Bearing: degrees true (0 = north, 90 = east)
//! - Distance: meters

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::types::{Coordinate, GridPoint};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const DEG_TO_RAD: f64 = PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

/// Bearing of the row axis (north)
const NORTH: f64 = 0.0;
/// Bearing of the column axis (east)
const EAST: f64 = 90.0;

/// Project a position along a great circle.
///
/// Returns the point reached by travelling `distance_m` meters from `start`
/// on the initial bearing `bearing_deg`. Longitude is normalized to
/// `[-180, 180]`.
///
/// # Example
///
/// ```
/// use pano_dl::grid::destination;
/// use pano_dl::Coordinate;
///
/// // One degree of latitude is ~111.2 km
/// let p = destination(Coordinate::new(0.0, 0.0), 0.0, 111_195.0);
/// assert!((p.latitude() - 1.0).abs() < 1e-3);
/// assert!(p.longitude().abs() < 1e-9);
/// ```
pub fn destination(start: Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let lat1 = start.latitude() * DEG_TO_RAD;
    let lon1 = start.longitude() * DEG_TO_RAD;
    let bearing = bearing_deg * DEG_TO_RAD;
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_d = angular_distance.sin();
    let cos_d = angular_distance.cos();

    let lat2 = (sin_lat1 * cos_d + cos_lat1 * sin_d * bearing.cos()).asin();
    let lon2 = lon1 + (bearing.sin() * sin_d * cos_lat1).atan2(cos_d - sin_lat1 * lat2.sin());

    let mut lon2 = lon2 * RAD_TO_DEG;
    if lon2 > 180.0 {
        lon2 -= 360.0;
    } else if lon2 < -180.0 {
        lon2 += 360.0;
    }

    Coordinate::new(lat2 * RAD_TO_DEG, lon2)
}

/// Inclusive index range for `steps` steps centered on zero.
///
/// Odd counts put the extra index on the negative side: 3 steps give `-2..=1`.
fn centered_range(steps: i64) -> std::ops::RangeInclusive<i64> {
    (-steps).div_euclid(2)..=steps.div_euclid(2)
}

/// Number of whole steps that fit in `extent_m`.
fn step_count(extent_m: f64, step_m: f64) -> i64 {
    (extent_m / step_m).floor() as i64
}

/// Generate the sampling grid for a job.
///
/// Rows (`i`, north) are the outer loop and columns (`j`, east) the inner one.
/// The result has `(width/step + 1) * (height/step + 1)` points; a step at
/// least as large as both dimensions yields the origin alone.
pub fn generate_grid(
    origin: Coordinate,
    width_m: f64,
    height_m: f64,
    step_m: f64,
) -> Result<Vec<GridPoint>> {
    if !(step_m.is_finite() && step_m > 0.0) {
        return Err(Error::InvalidJob(format!(
            "step must be a positive number of meters, got {step_m}"
        )));
    }
    if !(width_m.is_finite() && width_m >= 0.0 && height_m.is_finite() && height_m >= 0.0) {
        return Err(Error::InvalidJob(format!(
            "grid dimensions must be non-negative, got {width_m} x {height_m}"
        )));
    }
    if !origin.is_valid() {
        return Err(Error::InvalidJob(format!(
            "origin {origin:?} is not a valid coordinate"
        )));
    }

    let width_steps = step_count(width_m, step_m);
    let height_steps = step_count(height_m, step_m);
    let total = width_steps
        .checked_add(1)
        .zip(height_steps.checked_add(1))
        .and_then(|(cols, rows)| cols.checked_mul(rows))
        .and_then(|total| usize::try_from(total).ok())
        .ok_or_else(|| {
            Error::InvalidJob(format!(
                "grid of {width_m} x {height_m} m with {step_m} m steps has too many points"
            ))
        })?;

    tracing::debug!(
        width_steps,
        height_steps,
        total_points = total,
        step_m,
        "Generating search grid"
    );

    let mut points = Vec::with_capacity(total);
    for i in centered_range(height_steps) {
        let row_origin = destination(origin, NORTH, i as f64 * step_m);
        for j in centered_range(width_steps) {
            let point = destination(row_origin, EAST, j as f64 * step_m);
            points.push(GridPoint {
                latitude: point.latitude(),
                longitude: point.longitude(),
                row_index: i,
                col_index: j,
            });
        }
    }

    Ok(points)
}
