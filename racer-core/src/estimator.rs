//! Line-Crossing Estimator
//!
//! Turns the latest fix and a defined start line into seconds-to-cross and
//! where along the line the crossing would happen.
//!
//! The boat's heading ray is tested against the bearings to both marks:
//!
//! ```text
//!        port ●━━━━━━━━━━━━━━━━● starboard
//!              ╲      ↑       ╱
//!    port_bearing╲    │heading╱stbd_bearing
//!                 ╲   │     ╱
//!                    boat
//! ```
//!
//! The crossing is only computed exactly when the heading lies between the
//! two bearings. Anything else (wrong side of the line, heading outside the
//! marks, degenerate geometry) falls back to the time to the nearer mark.

use serde::{Deserialize, Serialize};

use crate::fix::GpsFix;
use crate::line::StartLine;
use crate::navigation::{angle_diff, bearing, distance, intersection_point, KNOTS_TO_MPS};

/// Floor applied to the speed so a stopped boat never divides by zero
pub const MIN_SPEED_KNOTS: f64 = 1e-5;

/// Beyond this many seconds the estimate is shown as "far"
pub const FAR_SECONDS: f64 = 3600.0;

/// How the estimate was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrossingMethod {
    /// The heading ray crosses the line between the marks
    Intersection,
    /// Heading misses the line; time to the nearer mark
    NearestMark,
    /// Geometry could not be solved; time to the nearer mark, low confidence
    Degenerate,
}

/// Result of one estimation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossingEstimate {
    /// Seconds until crossing. Negative when the boat is already on the
    /// course side of the line.
    pub seconds: f64,
    /// Crossing position, 0 = port mark, 100 = starboard mark
    pub percent_along: f64,
    /// Distance used for the estimate
    pub distance_m: f64,
    pub method: CrossingMethod,
}

impl CrossingEstimate {
    pub fn is_confident(&self) -> bool {
        self.method == CrossingMethod::Intersection
    }
}

/// Estimate time to cross `line` on the fix's current course and speed.
pub fn estimate(fix: &GpsFix, line: &StartLine) -> CrossingEstimate {
    let speed_mps = fix.speed_knots.max(MIN_SPEED_KNOTS) * KNOTS_TO_MPS;

    let (boat_lat, boat_lon) = (fix.latitude_rad, fix.longitude_rad);
    let (stbd_lat, stbd_lon) = (line.starboard.latitude_rad, line.starboard.longitude_rad);
    let (port_lat, port_lon) = (line.port.latitude_rad, line.port.longitude_rad);

    let stbd_bearing = bearing(boat_lat, boat_lon, stbd_lat, stbd_lon);
    let port_bearing = bearing(boat_lat, boat_lon, port_lat, port_lon);

    let side = angle_diff(stbd_bearing, port_bearing);
    if side <= 0.0 {
        log::trace!("Boat is on the course side of the line");
        return nearest_mark(fix, line, speed_mps, CrossingMethod::NearestMark, -1.0);
    }

    let d_stbd = angle_diff(stbd_bearing, fix.heading_rad);
    let d_port = angle_diff(fix.heading_rad, port_bearing);
    if d_stbd <= 0.0 || d_port <= 0.0 {
        log::trace!("Heading does not cross the line between the marks");
        return nearest_mark(fix, line, speed_mps, CrossingMethod::NearestMark, 1.0);
    }

    if line.length_m <= f64::EPSILON {
        return nearest_mark(fix, line, speed_mps, CrossingMethod::Degenerate, 1.0);
    }

    match intersection_point(
        boat_lat,
        boat_lon,
        fix.heading_rad,
        stbd_lat,
        stbd_lon,
        port_lat,
        port_lon,
    ) {
        Ok((cross_lat, cross_lon)) => {
            let distance_m = distance(boat_lat, boat_lon, cross_lat, cross_lon);
            let from_port = distance(port_lat, port_lon, cross_lat, cross_lon);
            let percent_along = (from_port / line.length_m * 100.0).clamp(0.0, 100.0);

            CrossingEstimate {
                seconds: distance_m / speed_mps,
                percent_along,
                distance_m,
                method: CrossingMethod::Intersection,
            }
        }
        Err(e) => {
            log::debug!("Line intersection failed: {}", e);
            nearest_mark(fix, line, speed_mps, CrossingMethod::Degenerate, 1.0)
        }
    }
}

fn nearest_mark(
    fix: &GpsFix,
    line: &StartLine,
    speed_mps: f64,
    method: CrossingMethod,
    sign: f64,
) -> CrossingEstimate {
    let stbd = distance(
        fix.latitude_rad,
        fix.longitude_rad,
        line.starboard.latitude_rad,
        line.starboard.longitude_rad,
    );
    let port = distance(
        fix.latitude_rad,
        fix.longitude_rad,
        line.port.latitude_rad,
        line.port.longitude_rad,
    );

    let (distance_m, percent_along) = if stbd < port {
        (stbd, 100.0)
    } else {
        (port, 0.0)
    };

    CrossingEstimate {
        seconds: sign * distance_m / speed_mps,
        percent_along,
        distance_m,
        method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::GpsModel;
    use crate::line::{MarkSide, StartLineModel};

    const STBD: (f64, f64) = (-34.957042, 138.500800);
    const PORT: (f64, f64) = (-34.957486, 138.500038);
    const BOAT: (f64, f64) = (-34.958274, 138.501184);

    fn line() -> StartLine {
        let mut gps = GpsModel::new();
        let mut model = StartLineModel::new();
        model.set_mark(MarkSide::Starboard, gps.update_fix(STBD.0, STBD.1, 0.0, 0.0));
        model.set_mark(MarkSide::Port, gps.update_fix(PORT.0, PORT.1, 0.0, 0.0));
        *model.line().unwrap()
    }

    fn fix(lat: f64, lon: f64, heading: f64, knots: f64) -> GpsFix {
        *GpsModel::new().update_fix(lat, lon, heading, knots)
    }

    /// Local flat-earth projection around the boat, meters east/north
    fn local(lat: f64, lon: f64) -> (f64, f64) {
        let m_per_deg = crate::navigation::EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        let x = (lon - BOAT.1) * m_per_deg * BOAT.0.to_radians().cos();
        let y = (lat - BOAT.0) * m_per_deg;
        (x, y)
    }

    /// Planar ray/segment intersection distance, independent of the
    /// great-circle code
    fn reference_distance(heading_deg: f64) -> f64 {
        let (sx, sy) = local(STBD.0, STBD.1);
        let (px, py) = local(PORT.0, PORT.1);
        let (dx, dy) = (heading_deg.to_radians().sin(), heading_deg.to_radians().cos());

        // boat at origin: t * d = p + u * (s - p)
        let (ex, ey) = (sx - px, sy - py);
        let denom = dx * ey - dy * ex;
        let t = (px * ey - py * ex) / denom;
        assert!(t > 0.0);
        t
    }

    #[test]
    fn test_seconds_to_cross_matches_reference() {
        let line = line();
        let estimate = estimate(&fix(BOAT.0, BOAT.1, 325.0, 5.0), &line);

        assert_eq!(estimate.method, CrossingMethod::Intersection);
        let expected = reference_distance(325.0) / (5.0 * KNOTS_TO_MPS);
        assert!(
            (estimate.seconds - expected).abs() < 1.0,
            "{} vs {}",
            estimate.seconds,
            expected
        );
        assert!(estimate.percent_along > 0.0 && estimate.percent_along < 100.0);
    }

    #[test]
    fn test_seconds_scale_with_speed() {
        let line = line();
        for knots in (1..20).step_by(2) {
            let knots = knots as f64;
            let estimate = estimate(&fix(BOAT.0, BOAT.1, 325.0, knots), &line);
            let expected = reference_distance(325.0) / (knots * KNOTS_TO_MPS);
            assert!((estimate.seconds - expected).abs() < 1.0);
        }
    }

    #[test]
    fn test_heading_away_uses_nearest_mark() {
        let line = line();
        let f = fix(BOAT.0, BOAT.1, 145.0, 10.0);
        let estimate = estimate(&f, &line);

        assert_eq!(estimate.method, CrossingMethod::NearestMark);
        assert!(!estimate.is_confident());
        assert!(estimate.seconds > 0.0);

        let to_stbd = distance(
            f.latitude_rad,
            f.longitude_rad,
            STBD.0.to_radians(),
            STBD.1.to_radians(),
        );
        let to_port = distance(
            f.latitude_rad,
            f.longitude_rad,
            PORT.0.to_radians(),
            PORT.1.to_radians(),
        );
        let nearest = to_stbd.min(to_port);
        assert!((estimate.distance_m - nearest).abs() < 1e-6);
        assert!((estimate.seconds - nearest / (10.0 * KNOTS_TO_MPS)).abs() < 1e-6);
        let expected_percent = if to_stbd < to_port { 100.0 } else { 0.0 };
        assert_eq!(estimate.percent_along, expected_percent);
    }

    #[test]
    fn test_heading_outside_marks() {
        // right of the committee boat, then left of the pin. The pin is
        // the nearer mark from this position either way.
        for heading in [355.0, 290.0] {
            let estimate = estimate(&fix(BOAT.0, BOAT.1, heading, 10.0), &line());
            assert_eq!(estimate.method, CrossingMethod::NearestMark);
            assert_eq!(estimate.percent_along, 0.0);
        }
    }

    #[test]
    fn test_nearer_starboard_mark_gives_full_percent() {
        // just below the committee boat, pointing away
        let estimate = estimate(&fix(-34.957300, 138.500900, 150.0, 6.0), &line());
        assert_eq!(estimate.method, CrossingMethod::NearestMark);
        assert_eq!(estimate.percent_along, 100.0);
    }

    #[test]
    fn test_course_side_is_negative() {
        // north of the line, already over
        let estimate = estimate(&fix(-34.956500, 138.500400, 180.0, 4.0), &line());
        assert_eq!(estimate.method, CrossingMethod::NearestMark);
        assert!(estimate.seconds < 0.0);
    }

    #[test]
    fn test_stopped_boat_does_not_divide_by_zero() {
        let estimate = estimate(&fix(BOAT.0, BOAT.1, 325.0, 0.0), &line());
        assert!(estimate.seconds.is_finite());
        assert!(estimate.seconds > FAR_SECONDS);
    }

    #[test]
    fn test_zero_length_line_falls_back() {
        let mut gps = GpsModel::new();
        let mut model = StartLineModel::new();
        model.set_mark(MarkSide::Starboard, gps.update_fix(STBD.0, STBD.1, 0.0, 0.0));
        model.set_mark(MarkSide::Port, gps.update_fix(STBD.0, STBD.1, 0.0, 0.0));
        let line = *model.line().unwrap();

        let estimate = estimate(&fix(BOAT.0, BOAT.1, 345.0, 5.0), &line);
        assert_ne!(estimate.method, CrossingMethod::Intersection);
        assert!(estimate.seconds.is_finite());
    }

    #[test]
    fn test_unsolvable_intersection_is_degenerate() {
        // passes the between-the-marks check (NaN compares false) and then
        // fails inside the great-circle solution
        let mut f = fix(BOAT.0, BOAT.1, 325.0, 5.0);
        f.heading_rad = f64::NAN;
        let line = line();

        let estimate = estimate(&f, &line);
        assert_eq!(estimate.method, CrossingMethod::Degenerate);
        assert!(estimate.seconds.is_finite() && estimate.seconds > 0.0);

        let to_port = distance(
            f.latitude_rad,
            f.longitude_rad,
            PORT.0.to_radians(),
            PORT.1.to_radians(),
        );
        let to_stbd = distance(
            f.latitude_rad,
            f.longitude_rad,
            STBD.0.to_radians(),
            STBD.1.to_radians(),
        );
        assert!((estimate.distance_m - to_port.min(to_stbd)).abs() < 1e-6);
    }
}
