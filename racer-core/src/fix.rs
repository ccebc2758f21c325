//! GPS Fix Model
//!
//! Holds the most recent validated fix. Older fixes are discarded; the only
//! state carried from one fix to the next is the heading unwrap
//! accumulator, which keeps `unwrapped_heading_rad` continuous when the
//! course swings through north.

use serde::{Deserialize, Serialize};

use crate::navigation::angle_diff;

/// A single accepted fix. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub latitude_rad: f64,
    pub longitude_rad: f64,
    /// Course over ground in `[0, 2π)`
    pub heading_rad: f64,
    /// Course over ground in `[0, 360)`
    pub heading_deg: f64,
    pub speed_knots: f64,
    /// Heading accumulated without wrapping; may leave `[0, 2π)`
    pub unwrapped_heading_rad: f64,
}

impl GpsFix {
    pub fn latitude_deg(&self) -> f64 {
        self.latitude_rad.to_degrees()
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_rad.to_degrees()
    }
}

/// Continuous heading accumulator.
///
/// Each new raw heading is folded in as `prev + wrap(raw - prev)`, so the
/// step between consecutive values never exceeds π.
#[derive(Debug, Clone, Default)]
pub struct HeadingUnwrapper {
    last: Option<f64>,
}

impl HeadingUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a raw heading (radians) into the accumulator and return the
    /// unwrapped value.
    pub fn unwrap(&mut self, raw: f64) -> f64 {
        let unwrapped = match self.last {
            None => raw,
            Some(prev) => prev + angle_diff(raw, prev),
        };
        self.last = Some(unwrapped);
        unwrapped
    }
}

/// Latest fix plus the unwrap accumulator. One instance per session.
#[derive(Debug, Clone, Default)]
pub struct GpsModel {
    latest: Option<GpsFix>,
    unwrapper: HeadingUnwrapper,
    fix_count: u64,
}

impl GpsModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a validated fix. Inputs are degrees and knots, as delivered by
    /// the NMEA layer.
    pub fn update_fix(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        heading_deg: f64,
        speed_knots: f64,
    ) -> &GpsFix {
        let heading_deg = heading_deg.rem_euclid(360.0);
        let heading_rad = heading_deg.to_radians();
        let unwrapped_heading_rad = self.unwrapper.unwrap(heading_rad);

        self.fix_count += 1;
        self.latest.insert(GpsFix {
            latitude_rad: latitude_deg.to_radians(),
            longitude_rad: longitude_deg.to_radians(),
            heading_rad,
            heading_deg,
            speed_knots: speed_knots.max(0.0),
            unwrapped_heading_rad,
        })
    }

    pub fn latest(&self) -> Option<&GpsFix> {
        self.latest.as_ref()
    }

    /// Number of fixes accepted this session
    pub fn fix_count(&self) -> u64 {
        self.fix_count
    }
}
