//! Race Timing State Machine
//!
//! Owns the Setup → Idle → Sequence → Race → Idle lifecycle and the one
//! ticker that drives the displays.
//!
//! ```text
//!  ┌───────┐ push_off ┌──────┐ start_sequence ┌──────────┐  remaining = 0  ┌──────┐
//!  │ Setup │─────────►│ Idle │───────────────►│ Sequence │────────────────►│ Race │
//!  └───────┘          └──────┘                └──────────┘  (or bump/sync) └──────┘
//!   clock tick          ▲  clock tick           1 s tick                      │ 1 min tick
//!                       └──────────────────────── finish ─────────────────────┘
//! ```
//!
//! All deadlines are absolute epoch seconds anchored to the sequence's
//! `start_epoch` (or the gun, once racing), never "sleep one second" steps,
//! so time lost to confirmation dialogs or a slow scheduler is recovered on
//! the next tick instead of accumulating.
//!
//! There is at most one [`Ticker`]. Arming a new one replaces the previous,
//! and a tick that arrives for a replaced ticker is ignored, which is how a
//! stale countdown is kept from publishing after a transition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Rejection;

/// Window before a minute boundary in which `sync` is ignored
pub const SYNC_MASK_SECONDS: f64 = 10.0;

/// Remaining time at or below this is the gun
const GUN_EPSILON: f64 = 1e-6;

/// Half a second of grace when picking the first countdown deadline, so a
/// deadline that is about to pass is skipped rather than fired late
const FIRST_TICK_GRACE: f64 = 0.5;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceState {
    /// Marks being laid, boat not yet racing
    #[default]
    Setup,
    /// Waiting for the start sequence
    Idle,
    /// Counting down to the gun
    Sequence,
    /// After the gun
    Race,
}

impl fmt::Display for RaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceState::Setup => write!(f, "setup"),
            RaceState::Idle => write!(f, "idle"),
            RaceState::Sequence => write!(f, "sequence"),
            RaceState::Race => write!(f, "race"),
        }
    }
}

/// The running countdown. Exists only in `Sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceTimer {
    pub start_epoch: f64,
    pub duration_seconds: f64,
}

impl SequenceTimer {
    pub fn gun_epoch(&self) -> f64 {
        self.start_epoch + self.duration_seconds
    }

    pub fn remaining(&self, now: f64) -> f64 {
        self.gun_epoch() - now
    }
}

// =============================================================================
// Ticker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerKind {
    /// Minute boundaries for the time-of-day display
    Clock,
    /// Whole seconds to the gun
    Sequence,
    /// Whole minutes since the gun
    Race,
}

/// The single armed wake-up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub id: u64,
    pub kind: TickerKind,
    /// Absolute epoch seconds
    pub deadline: f64,
}

/// Values published to the displays
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TickEvent {
    Clock { minute_epoch: f64 },
    Countdown { remaining: f64 },
    Gun { gun_epoch: f64 },
    RaceElapsed { minutes: u64 },
}

// =============================================================================
// Race Timer
// =============================================================================

#[derive(Debug, Clone)]
pub struct RaceTimer {
    state: RaceState,
    sequence: Option<SequenceTimer>,
    gun_epoch: Option<f64>,
    ticker: Option<Ticker>,
    next_ticker_id: u64,
    sync_mask_seconds: f64,

    // last published values
    countdown: Option<f64>,
    elapsed_minutes: Option<u64>,
    clock_minute_epoch: Option<f64>,
}

impl Default for RaceTimer {
    fn default() -> Self {
        Self::new(SYNC_MASK_SECONDS)
    }
}

impl RaceTimer {
    pub fn new(sync_mask_seconds: f64) -> Self {
        RaceTimer {
            state: RaceState::Setup,
            sequence: None,
            gun_epoch: None,
            ticker: None,
            next_ticker_id: 0,
            sync_mask_seconds,
            countdown: None,
            elapsed_minutes: None,
            clock_minute_epoch: None,
        }
    }

    /// Arm the time-of-day clock for the initial Setup state
    pub fn start(&mut self, now: f64) -> Vec<TickEvent> {
        self.arm_clock(now)
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn sequence(&self) -> Option<&SequenceTimer> {
        self.sequence.as_ref()
    }

    pub fn gun_epoch(&self) -> Option<f64> {
        self.gun_epoch
    }

    pub fn active_ticker(&self) -> Option<&Ticker> {
        self.ticker.as_ref()
    }

    /// Exact time to the gun, if counting down
    pub fn remaining(&self, now: f64) -> Option<f64> {
        self.sequence.map(|s| s.remaining(now))
    }

    /// Last countdown value published by the ticker
    pub fn countdown(&self) -> Option<f64> {
        self.countdown
    }

    pub fn elapsed_minutes(&self) -> Option<u64> {
        self.elapsed_minutes
    }

    pub fn clock_minute_epoch(&self) -> Option<f64> {
        self.clock_minute_epoch
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Setup → Idle
    pub fn push_off(&mut self, now: f64) -> Result<Vec<TickEvent>, Rejection> {
        self.require(RaceState::Setup, "push-off")?;
        self.transition(RaceState::Idle);
        Ok(self.arm_clock(now))
    }

    /// Idle → Sequence. `start_epoch` is when the sequence was requested,
    /// which may be some seconds before `now` if it had to be confirmed.
    pub fn start_sequence(
        &mut self,
        start_epoch: f64,
        duration_seconds: f64,
        now: f64,
    ) -> Result<Vec<TickEvent>, Rejection> {
        self.require(RaceState::Idle, "start-sequence")?;
        if !(duration_seconds > 0.0 && duration_seconds.is_finite()) {
            return Err(Rejection::InvalidDuration(duration_seconds));
        }

        self.clock_minute_epoch = None;
        self.sequence = Some(SequenceTimer {
            start_epoch,
            duration_seconds,
        });
        self.transition(RaceState::Sequence);
        log::info!(
            "Sequence of {} s anchored at {:.3}, gun at {:.3}",
            duration_seconds,
            start_epoch,
            start_epoch + duration_seconds
        );
        Ok(self.arm_sequence(now))
    }

    /// Add `delta` seconds to the countdown. Refused if it would leave
    /// negative time; reaching zero fires the gun.
    pub fn bump(&mut self, delta: f64, now: f64) -> Result<Vec<TickEvent>, Rejection> {
        self.require(RaceState::Sequence, "bump")?;
        let Some(mut sequence) = self.sequence else {
            return Err(self.invalid("bump"));
        };

        let before = sequence.remaining(now);
        let after = before + delta;
        if after < -GUN_EPSILON {
            log::warn!(
                "Bump {:+} s rejected: remaining {:.1} s would become {:.1} s",
                delta,
                before,
                after
            );
            return Err(Rejection::WouldGoNegative {
                delta,
                remaining: before,
            });
        }

        sequence.duration_seconds += delta;
        self.sequence = Some(sequence);
        log::info!(
            "Bump {:+} s accepted: remaining {:.1} s -> {:.1} s",
            delta,
            before,
            after
        );

        if after <= GUN_EPSILON {
            Ok(self.enter_race(sequence.gun_epoch(), now))
        } else {
            Ok(self.arm_sequence(now))
        }
    }

    /// Snap the gun back to the minute boundary just passed, unless that
    /// boundary is within the mask window.
    pub fn sync(&mut self, now: f64) -> Result<Vec<TickEvent>, Rejection> {
        self.require(RaceState::Sequence, "sync")?;
        let Some(mut sequence) = self.sequence else {
            return Err(self.invalid("sync"));
        };

        let before = sequence.remaining(now);
        let fraction = before.rem_euclid(60.0);
        if fraction > 60.0 - self.sync_mask_seconds {
            log::info!(
                "Sync ignored: remaining {:.1} s is within {} s of a minute",
                before,
                self.sync_mask_seconds
            );
            return Err(Rejection::SyncMasked { remaining: before });
        }

        sequence.start_epoch -= fraction;
        self.sequence = Some(sequence);
        let after = sequence.remaining(now);
        log::info!("Sync: remaining {:.1} s -> {:.1} s", before, after);

        if after <= GUN_EPSILON {
            Ok(self.enter_race(sequence.gun_epoch(), now))
        } else {
            Ok(self.arm_sequence(now))
        }
    }

    /// Race → Idle
    pub fn finish(&mut self, now: f64) -> Result<Vec<TickEvent>, Rejection> {
        self.require(RaceState::Race, "finish")?;
        self.gun_epoch = None;
        self.elapsed_minutes = None;
        self.transition(RaceState::Idle);
        Ok(self.arm_clock(now))
    }

    // -------------------------------------------------------------------------
    // Ticking
    // -------------------------------------------------------------------------

    /// The wall clock was stepped by `offset` seconds and `now` is already on
    /// the new clock. A running sequence or race moves with it, so the time
    /// remaining and the race minutes are unchanged. The time-of-day ticker
    /// is re-armed on the new clock.
    pub fn clock_stepped(&mut self, offset: f64, now: f64) -> Vec<TickEvent> {
        if let Some(sequence) = self.sequence.as_mut() {
            sequence.start_epoch += offset;
        }
        if let Some(gun_epoch) = self.gun_epoch.as_mut() {
            *gun_epoch += offset;
        }
        if self.state != RaceState::Setup && self.state != RaceState::Idle {
            log::info!("Clock stepped {:+.3} s, {} timing carried over", offset, self.state);
        }

        match self.ticker {
            Some(Ticker {
                kind: TickerKind::Clock,
                ..
            }) => self.arm_clock(now),
            Some(ticker) => {
                self.arm(ticker.kind, ticker.deadline + offset);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Handle an expired ticker. Ticks for a ticker that has since been
    /// replaced produce nothing.
    pub fn on_tick(&mut self, id: u64, now: f64) -> Vec<TickEvent> {
        let ticker = match self.ticker {
            Some(ticker) if ticker.id == id => ticker,
            _ => {
                log::trace!("Ignoring stale tick {}", id);
                return Vec::new();
            }
        };
        let now = now.max(ticker.deadline);

        match ticker.kind {
            TickerKind::Clock => self.arm_clock(now),
            TickerKind::Sequence => self.tick_sequence(ticker.deadline, now),
            TickerKind::Race => self.arm_race(now),
        }
    }

    fn tick_sequence(&mut self, deadline: f64, now: f64) -> Vec<TickEvent> {
        let Some(sequence) = self.sequence else {
            self.ticker = None;
            return Vec::new();
        };
        let gun = sequence.gun_epoch();

        // catch up on any whole seconds slept through
        let skipped = (now - deadline).floor().max(0.0);
        let deadline = (deadline + skipped).min(gun);
        let remaining = gun - deadline;

        if remaining <= GUN_EPSILON {
            return self.enter_race(gun, now);
        }

        self.countdown = Some(remaining);
        let next = (deadline + 1.0).min(gun);
        self.arm(TickerKind::Sequence, next);
        vec![TickEvent::Countdown { remaining }]
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn require(&self, state: RaceState, action: &'static str) -> Result<(), Rejection> {
        if self.state == state {
            Ok(())
        } else {
            let rejection = self.invalid(action);
            log::warn!("{}", rejection);
            Err(rejection)
        }
    }

    fn invalid(&self, action: &'static str) -> Rejection {
        Rejection::InvalidState {
            action,
            state: self.state,
        }
    }

    fn transition(&mut self, to: RaceState) {
        log::info!("Race state {} -> {}", self.state, to);
        self.state = to;
    }

    fn arm(&mut self, kind: TickerKind, deadline: f64) {
        self.next_ticker_id += 1;
        if let Some(old) = self.ticker {
            if old.kind != kind {
                log::debug!("Cancelling {:?} ticker {}", old.kind, old.id);
            }
        }
        self.ticker = Some(Ticker {
            id: self.next_ticker_id,
            kind,
            deadline,
        });
    }

    /// Publish the current minute and arm the next boundary
    fn arm_clock(&mut self, now: f64) -> Vec<TickEvent> {
        let minute_epoch = (now / 60.0).floor() * 60.0;
        self.clock_minute_epoch = Some(minute_epoch);
        self.arm(TickerKind::Clock, minute_epoch + 60.0);
        vec![TickEvent::Clock { minute_epoch }]
    }

    /// Publish the second just passed and arm the next whole second after
    /// `start_epoch`
    fn arm_sequence(&mut self, now: f64) -> Vec<TickEvent> {
        let Some(sequence) = self.sequence else {
            return Vec::new();
        };
        let gun = sequence.gun_epoch();
        if gun - now <= GUN_EPSILON {
            return self.enter_race(gun, now);
        }

        let k = (now + FIRST_TICK_GRACE - sequence.start_epoch).ceil().max(1.0);
        let shown = (sequence.duration_seconds - (k - 1.0)).max(0.0);
        let deadline = (sequence.start_epoch + k).min(gun);

        self.countdown = Some(shown);
        self.arm(TickerKind::Sequence, deadline);
        vec![TickEvent::Countdown { remaining: shown }]
    }

    fn enter_race(&mut self, gun_epoch: f64, now: f64) -> Vec<TickEvent> {
        self.sequence = None;
        self.countdown = None;
        self.gun_epoch = Some(gun_epoch);
        self.transition(RaceState::Race);
        log::info!("Gun at {:.3}", gun_epoch);

        let mut events = vec![TickEvent::Gun { gun_epoch }];
        events.extend(self.arm_race(now));
        events
    }

    /// Publish elapsed minutes and arm the next minute after the gun
    fn arm_race(&mut self, now: f64) -> Vec<TickEvent> {
        let Some(gun) = self.gun_epoch else {
            self.ticker = None;
            return Vec::new();
        };
        let minutes = ((now - gun) / 60.0 + GUN_EPSILON).floor().max(0.0);
        self.elapsed_minutes = Some(minutes as u64);
        self.arm(TickerKind::Race, gun + (minutes + 1.0) * 60.0);
        vec![TickEvent::RaceElapsed {
            minutes: minutes as u64,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_700_000_000.0;

    fn idle() -> RaceTimer {
        let mut timer = RaceTimer::default();
        timer.start(T0);
        timer.push_off(T0).unwrap();
        timer
    }

    fn fire(timer: &mut RaceTimer) -> Vec<TickEvent> {
        let ticker = *timer.active_ticker().unwrap();
        timer.on_tick(ticker.id, ticker.deadline)
    }

    #[test]
    fn test_push_off() {
        let mut timer = RaceTimer::default();
        timer.start(T0 + 12.0);
        assert_eq!(timer.state(), RaceState::Setup);
        assert_eq!(timer.active_ticker().unwrap().kind, TickerKind::Clock);

        timer.push_off(T0 + 12.0).unwrap();
        assert_eq!(timer.state(), RaceState::Idle);
        assert!(matches!(
            timer.push_off(T0 + 13.0),
            Err(Rejection::InvalidState { .. })
        ));
    }

    #[test]
    fn test_clock_ticks_on_minute_boundaries() {
        let mut timer = RaceTimer::default();
        let events = timer.start(T0 + 75.0);
        let minute = (T0 / 60.0).floor() * 60.0;
        // T0 is not a whole minute, so work from what the timer reports
        let TickEvent::Clock { minute_epoch } = events[0] else {
            panic!("expected clock event");
        };
        assert_eq!(minute_epoch % 60.0, 0.0);
        assert!(minute_epoch >= minute);

        let ticker = *timer.active_ticker().unwrap();
        assert_eq!(ticker.deadline, minute_epoch + 60.0);
        let events = timer.on_tick(ticker.id, ticker.deadline);
        assert_eq!(
            events,
            vec![TickEvent::Clock {
                minute_epoch: minute_epoch + 60.0
            }]
        );
    }

    #[test]
    fn test_countdown_runs_to_gun() {
        let mut timer = idle();
        let events = timer.start_sequence(T0, 60.0, T0).unwrap();
        assert_eq!(events, vec![TickEvent::Countdown { remaining: 60.0 }]);
        assert_eq!(timer.active_ticker().unwrap().deadline, T0 + 1.0);

        let mut shown = Vec::new();
        while timer.state() == RaceState::Sequence {
            for event in fire(&mut timer) {
                if let TickEvent::Countdown { remaining } = event {
                    shown.push(remaining);
                }
            }
        }

        let expected: Vec<f64> = (1..60).rev().map(|s| s as f64).collect();
        assert_eq!(shown, expected);
        assert_eq!(timer.state(), RaceState::Race);
        assert_eq!(timer.gun_epoch(), Some(T0 + 60.0));
        assert!(timer.sequence().is_none());
        assert_eq!(timer.active_ticker().unwrap().kind, TickerKind::Race);
    }

    #[test]
    fn test_gun_needs_no_confirmation() {
        let mut timer = idle();
        timer.start_sequence(T0, 2.0, T0).unwrap();
        fire(&mut timer);
        let events = fire(&mut timer);
        assert_eq!(events[0], TickEvent::Gun { gun_epoch: T0 + 2.0 });
        assert_eq!(timer.state(), RaceState::Race);
    }

    #[test]
    fn test_bump_past_zero_is_rejected() {
        let mut timer = idle();
        timer.start_sequence(T0, 60.0, T0).unwrap();

        let result = timer.bump(-300.0, T0 + 0.2);
        assert!(matches!(result, Err(Rejection::WouldGoNegative { .. })));
        assert_eq!(timer.state(), RaceState::Sequence);
        assert!((timer.remaining(T0 + 0.2).unwrap() - 59.8).abs() < 1e-6);
    }

    #[test]
    fn test_bump_adjusts_remaining() {
        let mut timer = idle();
        timer.start_sequence(T0, 60.0, T0).unwrap();

        timer.bump(60.0, T0 + 10.0).unwrap();
        assert!((timer.remaining(T0 + 10.0).unwrap() - 110.0).abs() < 1e-9);
        assert_eq!(timer.countdown(), Some(110.0));

        timer.bump(-60.0, T0 + 10.0).unwrap();
        assert!((timer.remaining(T0 + 10.0).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_bump_to_zero_starts_race() {
        let mut timer = idle();
        timer.start_sequence(T0, 60.0, T0).unwrap();

        let events = timer.bump(-50.0, T0 + 10.0).unwrap();
        assert_eq!(events[0], TickEvent::Gun { gun_epoch: T0 + 10.0 });
        assert_eq!(timer.state(), RaceState::Race);
    }

    #[test]
    fn test_bump_replaces_ticker() {
        let mut timer = idle();
        timer.start_sequence(T0, 60.0, T0).unwrap();
        let old = *timer.active_ticker().unwrap();

        timer.bump(30.0, T0 + 0.3).unwrap();
        assert_ne!(timer.active_ticker().unwrap().id, old.id);
        assert!(timer.on_tick(old.id, old.deadline).is_empty());
    }

    #[test]
    fn test_sync_masked_near_minute() {
        let mut timer = idle();
        timer.start_sequence(T0, 120.0, T0).unwrap();

        // 117 s left: just past the 2:00 boundary
        let result = timer.sync(T0 + 3.0);
        assert!(matches!(result, Err(Rejection::SyncMasked { .. })));
        assert!((timer.remaining(T0 + 3.0).unwrap() - 117.0).abs() < 1e-9);
    }

    #[test]
    fn test_sync_snaps_to_minute() {
        let mut timer = idle();
        timer.start_sequence(T0, 120.0, T0).unwrap();

        timer.sync(T0 + 10.0).unwrap();
        assert!((timer.remaining(T0 + 10.0).unwrap() - 60.0).abs() < 1e-9);
        assert!((timer.sequence().unwrap().gun_epoch() - (T0 + 70.0)).abs() < 1e-9);
    }

    #[test]
    fn test_sync_inside_last_minute_fires_gun() {
        let mut timer = idle();
        timer.start_sequence(T0, 30.0, T0).unwrap();

        timer.sync(T0).unwrap();
        assert_eq!(timer.state(), RaceState::Race);
    }

    #[test]
    fn test_confirmed_start_keeps_first_tap_anchor() {
        let mut timer = idle();
        // requested at T0 - 0.3, confirmed 3.3 s later
        let events = timer.start_sequence(T0 - 0.3, 60.0, T0 + 3.0).unwrap();

        assert_eq!(events, vec![TickEvent::Countdown { remaining: 57.0 }]);
        let ticker = *timer.active_ticker().unwrap();
        assert!((ticker.deadline - (T0 + 3.7)).abs() < 1e-6);

        let events = timer.on_tick(ticker.id, ticker.deadline);
        assert_eq!(events, vec![TickEvent::Countdown { remaining: 56.0 }]);
    }

    #[test]
    fn test_late_tick_catches_up() {
        let mut timer = idle();
        timer.start_sequence(T0, 60.0, T0).unwrap();
        let ticker = *timer.active_ticker().unwrap();

        // woke 5.3 s late
        let events = timer.on_tick(ticker.id, ticker.deadline + 5.3);
        assert_eq!(events, vec![TickEvent::Countdown { remaining: 54.0 }]);
        assert_eq!(timer.active_ticker().unwrap().deadline, T0 + 7.0);
    }

    #[test]
    fn test_expired_sequence_goes_straight_to_race() {
        let mut timer = idle();
        let events = timer.start_sequence(T0, 5.0, T0 + 8.0).unwrap();
        assert_eq!(events[0], TickEvent::Gun { gun_epoch: T0 + 5.0 });
        assert_eq!(timer.state(), RaceState::Race);
        assert_eq!(timer.elapsed_minutes(), Some(0));
    }

    #[test]
    fn test_race_elapsed_minutes() {
        let mut timer = idle();
        timer.start_sequence(T0, 1.0, T0).unwrap();
        fire(&mut timer);
        assert_eq!(timer.state(), RaceState::Race);

        let ticker = *timer.active_ticker().unwrap();
        assert_eq!(ticker.deadline, T0 + 61.0);
        assert_eq!(
            timer.on_tick(ticker.id, ticker.deadline),
            vec![TickEvent::RaceElapsed { minutes: 1 }]
        );
        assert_eq!(timer.active_ticker().unwrap().deadline, T0 + 121.0);
    }

    #[test]
    fn test_finish_only_in_race() {
        let mut timer = idle();
        assert!(matches!(
            timer.finish(T0),
            Err(Rejection::InvalidState {
                state: RaceState::Idle,
                ..
            })
        ));

        timer.start_sequence(T0, 1.0, T0).unwrap();
        fire(&mut timer);
        timer.finish(T0 + 30.0).unwrap();
        assert_eq!(timer.state(), RaceState::Idle);
        assert_eq!(timer.gun_epoch(), None);
        assert_eq!(timer.active_ticker().unwrap().kind, TickerKind::Clock);
    }

    #[test]
    fn test_sequence_actions_need_sequence_state() {
        let mut timer = idle();
        assert!(timer.bump(10.0, T0).is_err());
        assert!(timer.sync(T0).is_err());
        assert!(matches!(
            timer.start_sequence(T0, 0.0, T0),
            Err(Rejection::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_clock_step_rearms_time_of_day() {
        let mut timer = idle();
        let old = timer.active_ticker().unwrap().id;

        // clock stepped back an hour
        let events = timer.clock_stepped(-3600.0, T0 - 3600.0);
        assert_eq!(events.len(), 1);
        let ticker = *timer.active_ticker().unwrap();
        assert_ne!(ticker.id, old);
        assert_eq!(ticker.kind, TickerKind::Clock);
        assert!(ticker.deadline <= T0 - 3600.0 + 60.0);
        assert!(timer.on_tick(old, T0).is_empty());
    }

    #[test]
    fn test_clock_step_keeps_countdown() {
        let mut timer = idle();
        timer.start_sequence(T0, 300.0, T0).unwrap();
        let before = *timer.active_ticker().unwrap();

        // an hour ahead, ten seconds into the sequence
        let now = T0 + 10.0 + 3600.0;
        assert!(timer.clock_stepped(3600.0, now).is_empty());

        assert_eq!(timer.state(), RaceState::Sequence);
        assert!((timer.remaining(now).unwrap() - 290.0).abs() < 1e-6);
        let ticker = *timer.active_ticker().unwrap();
        assert_eq!(ticker.kind, TickerKind::Sequence);
        assert!((ticker.deadline - (before.deadline + 3600.0)).abs() < 1e-6);

        // the next tick is an ordinary countdown second, not the gun
        let events = timer.on_tick(ticker.id, ticker.deadline);
        assert_eq!(timer.state(), RaceState::Sequence);
        assert!(matches!(events[..], [TickEvent::Countdown { .. }]));
        assert!(timer.on_tick(before.id, now).is_empty());
    }

    #[test]
    fn test_clock_step_keeps_race_minutes() {
        let mut timer = idle();
        timer.start_sequence(T0, 1.0, T0).unwrap();
        fire(&mut timer);
        let gun = timer.gun_epoch().unwrap();

        timer.clock_stepped(-100.0, gun + 30.0 - 100.0);
        assert!((timer.gun_epoch().unwrap() - (gun - 100.0)).abs() < 1e-6);
        let ticker = *timer.active_ticker().unwrap();
        assert_eq!(ticker.kind, TickerKind::Race);
        assert!((ticker.deadline - (gun - 100.0 + 60.0)).abs() < 1e-6);
        assert_eq!(timer.elapsed_minutes(), Some(0));
    }
}
