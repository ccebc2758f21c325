//! Start Line Model
//!
//! Two marks captured from the boat's own position: the starboard end
//! (usually the committee boat) and the port end (the pin). The derived
//! [`StartLine`] only exists while both are set and is rebuilt whenever
//! either mark moves.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::fix::GpsFix;
use crate::navigation::{bearing, distance};

/// Which end of the start line a mark defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkSide {
    Starboard,
    Port,
}

impl MarkSide {
    fn flag(&self) -> MarksSet {
        match self {
            MarkSide::Starboard => MarksSet::STARBOARD,
            MarkSide::Port => MarksSet::PORT,
        }
    }
}

impl fmt::Display for MarkSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkSide::Starboard => write!(f, "starboard"),
            MarkSide::Port => write!(f, "port"),
        }
    }
}

impl FromStr for MarkSide {
    type Err = String;

    /// Accepts the sailing names and the committee-boat / pin aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starboard" | "stbd" | "boat" => Ok(MarkSide::Starboard),
            "port" | "pin" => Ok(MarkSide::Port),
            _ => Err(format!("Unknown mark '{}'", s)),
        }
    }
}

bitflags! {
    /// Marks placed so far
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MarksSet: u8 {
        const STARBOARD = 0b01;
        const PORT = 0b10;
        const BOTH = Self::STARBOARD.bits() | Self::PORT.bits();
    }
}

/// A captured mark position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub side: MarkSide,
    pub latitude_rad: f64,
    pub longitude_rad: f64,
}

/// A fully defined start line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLine {
    pub starboard: Mark,
    pub port: Mark,
    /// Bearing from the starboard mark to the port mark
    pub heading_rad: f64,
    pub length_m: f64,
}

impl StartLine {
    pub fn new(starboard: Mark, port: Mark) -> Self {
        let heading_rad = bearing(
            starboard.latitude_rad,
            starboard.longitude_rad,
            port.latitude_rad,
            port.longitude_rad,
        );
        let length_m = distance(
            starboard.latitude_rad,
            starboard.longitude_rad,
            port.latitude_rad,
            port.longitude_rad,
        );
        StartLine {
            starboard,
            port,
            heading_rad,
            length_m,
        }
    }
}

/// Owner of both marks and the derived line
#[derive(Debug, Clone, Default)]
pub struct StartLineModel {
    starboard: Option<Mark>,
    port: Option<Mark>,
    line: Option<StartLine>,
    /// Bumped on every change so displays can tell a re-laid line apart
    revision: u64,
}

impl StartLineModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the fix position as one end of the line.
    ///
    /// Returns the line if both ends are now set.
    pub fn set_mark(&mut self, side: MarkSide, fix: &GpsFix) -> Option<&StartLine> {
        let mark = Mark {
            side,
            latitude_rad: fix.latitude_rad,
            longitude_rad: fix.longitude_rad,
        };
        match side {
            MarkSide::Starboard => self.starboard = Some(mark),
            MarkSide::Port => self.port = Some(mark),
        }
        self.revision += 1;

        self.line = match (self.starboard, self.port) {
            (Some(starboard), Some(port)) => Some(StartLine::new(starboard, port)),
            _ => None,
        };
        if let Some(line) = &self.line {
            log::info!(
                "Start line set: length {:.0} m, heading {:.0}°",
                line.length_m,
                line.heading_rad.to_degrees()
            );
        }
        self.line.as_ref()
    }

    /// Remove both marks
    pub fn clear(&mut self) {
        self.starboard = None;
        self.port = None;
        self.line = None;
        self.revision += 1;
    }

    pub fn line(&self) -> Option<&StartLine> {
        self.line.as_ref()
    }

    pub fn mark(&self, side: MarkSide) -> Option<&Mark> {
        match side {
            MarkSide::Starboard => self.starboard.as_ref(),
            MarkSide::Port => self.port.as_ref(),
        }
    }

    pub fn marks_set(&self) -> MarksSet {
        let mut set = MarksSet::empty();
        for side in [MarkSide::Starboard, MarkSide::Port] {
            if self.mark(side).is_some() {
                set |= side.flag();
            }
        }
        set
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::GpsModel;

    const STBD: (f64, f64) = (-34.957042, 138.500800);
    const PORT: (f64, f64) = (-34.957486, 138.500038);

    #[test]
    fn test_line_needs_both_marks() {
        let mut gps = GpsModel::new();
        let mut model = StartLineModel::new();

        let fix = *gps.update_fix(STBD.0, STBD.1, 0.0, 0.0);
        assert!(model.set_mark(MarkSide::Starboard, &fix).is_none());
        assert_eq!(model.marks_set(), MarksSet::STARBOARD);

        let fix = *gps.update_fix(PORT.0, PORT.1, 0.0, 0.0);
        let line = *model.set_mark(MarkSide::Port, &fix).unwrap();
        assert_eq!(model.marks_set(), MarksSet::BOTH);

        // roughly 85 m to the south-west
        assert!(line.length_m > 80.0 && line.length_m < 90.0);
        let heading = line.heading_rad.to_degrees();
        assert!(heading > 230.0 && heading < 250.0, "heading {}", heading);
    }

    #[test]
    fn test_reset_mark_recomputes_line() {
        let mut gps = GpsModel::new();
        let mut model = StartLineModel::new();

        model.set_mark(MarkSide::Starboard, gps.update_fix(STBD.0, STBD.1, 0.0, 0.0));
        model.set_mark(MarkSide::Port, gps.update_fix(PORT.0, PORT.1, 0.0, 0.0));
        let first = *model.line().unwrap();
        let revision = model.revision();

        // re-lay the pin further out
        model.set_mark(MarkSide::Port, gps.update_fix(-34.957930, 138.499276, 0.0, 0.0));
        let second = *model.line().unwrap();

        assert!(second.length_m > first.length_m * 1.5);
        assert!(model.revision() > revision);
    }

    #[test]
    fn test_clear() {
        let mut gps = GpsModel::new();
        let mut model = StartLineModel::new();
        model.set_mark(MarkSide::Starboard, gps.update_fix(STBD.0, STBD.1, 0.0, 0.0));
        model.set_mark(MarkSide::Port, gps.update_fix(PORT.0, PORT.1, 0.0, 0.0));

        model.clear();
        assert!(model.line().is_none());
        assert_eq!(model.marks_set(), MarksSet::empty());
    }

    #[test]
    fn test_mark_side_parse() {
        assert_eq!("boat".parse::<MarkSide>(), Ok(MarkSide::Starboard));
        assert_eq!("Pin".parse::<MarkSide>(), Ok(MarkSide::Port));
        assert_eq!("starboard".parse::<MarkSide>(), Ok(MarkSide::Starboard));
        assert!("middle".parse::<MarkSide>().is_err());
    }
}
