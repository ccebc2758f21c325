//! Read-only view of the engine for displays.
//!
//! Everything here is derived; building a [`Projection`] never changes the
//! engine. Formatting follows the cockpit display conventions: speed to a
//! tenth of a knot, heading to the degree, times as `m:ss`.

use serde::Serialize;

use crate::engine::{ConfirmTicket, RaceEngine};
use crate::estimator::{CrossingMethod, FAR_SECONDS};
use crate::line::MarksSet;
use crate::race::RaceState;

/// Shown in place of a time too far out to be meaningful
pub const FAR_SENTINEL: &str = "~";

/// Shown when there is no value yet
pub const NO_VALUE: &str = "--";

pub fn format_speed(knots: f64) -> String {
    format!("{:.1}", knots)
}

pub fn format_heading(degrees: f64) -> String {
    format!("{:.0}", degrees.round().rem_euclid(360.0))
}

/// `m:ss`, truncated to the whole second, with a leading `-` when negative
pub fn format_mmss(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total = seconds.abs().trunc() as u64;
    format!("{}{}:{:02}", sign, total / 60, total % 60)
}

/// Like [`format_mmss`], but anything beyond an hour is [`FAR_SENTINEL`]
pub fn format_time_to_line(seconds: f64) -> String {
    if !seconds.is_finite() || seconds.abs() > FAR_SECONDS {
        FAR_SENTINEL.to_string()
    } else {
        format_mmss(seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixView {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed_knots: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineView {
    pub starboard_set: bool,
    pub port_set: bool,
    pub revision: u64,
    pub length_m: Option<f64>,
    /// `m:ss`, `-m:ss` or `~`
    pub time_to_line: String,
    pub seconds: Option<f64>,
    /// 0 at the port mark, 100 at the starboard mark
    pub percent: Option<f64>,
    pub method: Option<CrossingMethod>,
    /// Time to line minus time to gun, only while counting down.
    /// Negative means the boat would be over early.
    pub margin: Option<String>,
    pub margin_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub version: u64,
    pub timestamp: f64,
    pub state: RaceState,
    pub speed: String,
    pub heading: String,
    pub fix: Option<FixView>,
    pub line: LineView,
    pub countdown: Option<String>,
    pub countdown_seconds: Option<f64>,
    pub elapsed_minutes: Option<u64>,
    pub clock_minute_epoch: Option<f64>,
    pub sequence_presets: Vec<u32>,
    pub pending: Vec<ConfirmTicket>,
}

impl Projection {
    pub fn new(engine: &RaceEngine, now: f64) -> Self {
        let fix = engine.fix();
        let estimate = engine.estimate();
        let timer = engine.timer();
        let marks = engine.line().marks_set();

        let margin_seconds = match (estimate, timer.remaining(now)) {
            (Some(estimate), Some(remaining)) if timer.state() == RaceState::Sequence => {
                Some(estimate.seconds - remaining)
            }
            _ => None,
        };

        let line = LineView {
            starboard_set: marks.contains(MarksSet::STARBOARD),
            port_set: marks.contains(MarksSet::PORT),
            revision: engine.line().revision(),
            length_m: engine.line().line().map(|l| l.length_m),
            time_to_line: estimate
                .map(|e| format_time_to_line(e.seconds))
                .unwrap_or_else(|| NO_VALUE.to_string()),
            seconds: estimate.map(|e| e.seconds),
            percent: estimate.map(|e| e.percent_along),
            method: estimate.map(|e| e.method),
            margin: margin_seconds.map(format_time_to_line),
            margin_seconds,
        };

        Projection {
            version: engine.version(),
            timestamp: now,
            state: engine.state(),
            speed: fix
                .map(|f| format_speed(f.speed_knots))
                .unwrap_or_else(|| NO_VALUE.to_string()),
            heading: fix
                .map(|f| format_heading(f.heading_deg))
                .unwrap_or_else(|| NO_VALUE.to_string()),
            fix: fix.map(|f| FixView {
                latitude: f.latitude_deg(),
                longitude: f.longitude_deg(),
                heading: f.heading_deg,
                speed_knots: f.speed_knots,
            }),
            line,
            countdown: timer.countdown().map(format_mmss),
            countdown_seconds: timer.countdown(),
            elapsed_minutes: timer.elapsed_minutes(),
            clock_minute_epoch: timer.clock_minute_epoch(),
            sequence_presets: engine.settings().sequence_presets.clone(),
            pending: engine.pending_requests().into_iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Action, EngineSettings};
    use crate::line::MarkSide;

    const T0: f64 = 1_700_000_000.0;

    #[test]
    fn test_format_mmss() {
        assert_eq!(format_mmss(0.0), "0:00");
        assert_eq!(format_mmss(59.9), "0:59");
        assert_eq!(format_mmss(61.0), "1:01");
        assert_eq!(format_mmss(600.0), "10:00");
        assert_eq!(format_mmss(-5.5), "-0:05");
        assert_eq!(format_mmss(-125.0), "-2:05");
    }

    #[test]
    fn test_format_time_to_line_far() {
        assert_eq!(format_time_to_line(3600.0), "60:00");
        assert_eq!(format_time_to_line(3600.5), FAR_SENTINEL);
        assert_eq!(format_time_to_line(-4000.0), FAR_SENTINEL);
        assert_eq!(format_time_to_line(f64::INFINITY), FAR_SENTINEL);
    }

    #[test]
    fn test_format_speed_and_heading() {
        assert_eq!(format_speed(5.04), "5.0");
        assert_eq!(format_speed(0.0), "0.0");
        assert_eq!(format_heading(325.4), "325");
        assert_eq!(format_heading(359.7), "0");
    }

    #[test]
    fn test_empty_projection() {
        let engine = RaceEngine::new(EngineSettings::default(), T0);
        let projection = Projection::new(&engine, T0);

        assert_eq!(projection.state, RaceState::Setup);
        assert_eq!(projection.speed, NO_VALUE);
        assert_eq!(projection.line.time_to_line, NO_VALUE);
        assert!(projection.clock_minute_epoch.is_some());
        assert!(projection.countdown.is_none());
    }

    #[test]
    fn test_margin_during_sequence() {
        let mut engine = RaceEngine::new(EngineSettings::default(), T0);
        engine.update_fix(-34.957042, 138.500800, 0.0, 0.0);
        engine.handle(Action::SetMark { side: MarkSide::Starboard }, false, T0);
        engine.update_fix(-34.957486, 138.500038, 0.0, 0.0);
        engine.handle(Action::SetMark { side: MarkSide::Port }, false, T0);
        let seconds = engine
            .update_fix(-34.958274, 138.501184, 325.0, 5.0)
            .map(|e| e.seconds)
            .unwrap();

        // no margin outside the sequence
        assert!(Projection::new(&engine, T0).line.margin.is_none());

        engine.handle(Action::PushOff, false, T0);
        engine.handle(Action::PushOff, true, T0);
        engine.handle(Action::StartSequence { seconds: 60.0 }, false, T0);
        engine.handle(Action::StartSequence { seconds: 60.0 }, true, T0);

        let projection = Projection::new(&engine, T0);
        assert_eq!(projection.state, RaceState::Sequence);
        assert_eq!(projection.countdown.as_deref(), Some("1:00"));

        let remaining = engine.timer().remaining(T0).unwrap();
        let margin = projection.line.margin_seconds.unwrap();
        assert!((margin - (seconds - remaining)).abs() < 1e-9);
        assert_eq!(projection.line.margin, Some(format_time_to_line(margin)));
        assert!(projection.line.starboard_set && projection.line.port_set);
        assert_eq!(projection.speed, "5.0");
        assert_eq!(projection.heading, "325");
    }

    #[test]
    fn test_pending_requests_are_listed() {
        let mut engine = RaceEngine::new(EngineSettings::default(), T0);
        engine.handle(Action::PushOff, false, T0);

        let projection = Projection::new(&engine, T0 + 1.0);
        assert_eq!(projection.pending.len(), 1);

        let json = serde_json::to_value(&projection).unwrap();
        assert_eq!(json["pending"][0]["action"], "push-off");
        assert_eq!(json["state"], "setup");
    }
}
