//! Great-circle navigation math
//!
//! Pure, stateless functions on a spherical earth. All angles are in
//! radians unless a name says otherwise; bearings are measured clockwise
//! from true north.
//!
//! Line intersection is done with 3-D unit vectors instead of a planar
//! projection so that it keeps working near the poles and across the
//! date line:
//!
//! ```text
//!   mark1 ──────────── mark2        n_line  = mark1 × mark2
//!               ╲                   n_track = boat × waypoint
//!                ╲ heading          L       = n_line × n_track
//!                 ╲                 crossing = ±L (nearest the waypoint)
//!                 boat
//! ```

use nalgebra::Vector3;
use std::f64::consts::{PI, TAU};

use crate::error::NavError;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Knots to meters per second
pub const KNOTS_TO_MPS: f64 = 0.514444;

/// How far ahead of the boat the heading waypoint is projected when
/// building the boat's great circle
pub const HEADING_PROJECTION_M: f64 = 5000.0;

// Below this magnitude a cross product is treated as zero
const COLINEAR_EPSILON: f64 = 1e-12;

/// Initial great-circle bearing from point 1 to point 2, in `[0, 2π)`.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlon = lon2 - lon1;
    let x = lat2.cos() * dlon.sin();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let b = x.atan2(y).rem_euclid(TAU);
    // rem_euclid can round a tiny negative up to exactly TAU
    if b >= TAU {
        0.0
    } else {
        b
    }
}

/// Haversine great-circle distance in meters on the mean earth sphere.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    distance_with_radius(lat1, lon1, lat2, lon2, EARTH_RADIUS_M)
}

/// Haversine great-circle distance for an arbitrary sphere radius.
pub fn distance_with_radius(lat1: f64, lon1: f64, lat2: f64, lon2: f64, radius: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    // a can creep past 1.0 for near-antipodal points
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();
    radius * c
}

/// Signed minimal angular difference `a - b`, in `(-π, π]`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    if d > PI {
        d - TAU
    } else {
        d
    }
}

/// Point reached by travelling `distance_m` from a start point along an
/// initial bearing.
pub fn destination(lat: f64, lon: f64, bearing: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat.sin() * delta.cos() + lat.cos() * delta.sin() * bearing.cos()).asin();
    let lon2 = lon
        + (bearing.sin() * delta.sin() * lat.cos()).atan2(delta.cos() - lat.sin() * lat2.sin());

    (lat2, normalize_longitude(lon2))
}

/// Wrap a longitude into `(-π, π]`.
pub fn normalize_longitude(lon: f64) -> f64 {
    angle_diff(lon, 0.0)
}

/// Unit vector on the sphere for a latitude/longitude pair.
pub fn to_unit_vector(lat: f64, lon: f64) -> Vector3<f64> {
    Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
}

/// Latitude/longitude of a (not necessarily unit) vector.
pub fn from_vector(v: &Vector3<f64>) -> (f64, f64) {
    let lat = v.z.atan2((v.x * v.x + v.y * v.y).sqrt());
    let lon = v.y.atan2(v.x);
    (lat, lon)
}

/// Unit normal of the plane holding the great circle through two points.
pub fn great_circle_normal(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<Vector3<f64>, NavError> {
    let n = to_unit_vector(lat1, lon1).cross(&to_unit_vector(lat2, lon2));
    let magnitude = n.norm();
    if !magnitude.is_finite() {
        return Err(NavError::NonFinite("great circle normal"));
    }
    if magnitude < COLINEAR_EPSILON {
        return Err(NavError::UndefinedCircle);
    }
    Ok(n / magnitude)
}

/// Point where the great circle leaving the boat along its heading crosses
/// the great circle through the two marks.
///
/// Of the two antipodal intersections, the one nearer to a waypoint
/// projected [`HEADING_PROJECTION_M`] ahead of the boat is returned.
///
/// # Errors
///
/// [`NavError::UndefinedCircle`] when the marks coincide,
/// [`NavError::ParallelPlanes`] when the boat is travelling along the
/// marks' great circle.
pub fn intersection_point(
    boat_lat: f64,
    boat_lon: f64,
    boat_heading: f64,
    mark1_lat: f64,
    mark1_lon: f64,
    mark2_lat: f64,
    mark2_lon: f64,
) -> Result<(f64, f64), NavError> {
    let (wp_lat, wp_lon) = destination(boat_lat, boat_lon, boat_heading, HEADING_PROJECTION_M);

    let n_line = great_circle_normal(mark1_lat, mark1_lon, mark2_lat, mark2_lon)?;
    let n_track = great_circle_normal(boat_lat, boat_lon, wp_lat, wp_lon)?;

    let l = n_line.cross(&n_track);
    let magnitude = l.norm();
    if !magnitude.is_finite() {
        return Err(NavError::NonFinite("intersection line"));
    }
    if magnitude < COLINEAR_EPSILON {
        return Err(NavError::ParallelPlanes);
    }

    let (lat1, lon1) = from_vector(&l);
    let (lat2, lon2) = from_vector(&(-l));

    let d1 = distance(wp_lat, wp_lon, lat1, lon1);
    let d2 = distance(wp_lat, wp_lon, lat2, lon2);

    if d1 <= d2 {
        Ok((lat1, lon1))
    } else {
        Ok((lat2, lon2))
    }
}
