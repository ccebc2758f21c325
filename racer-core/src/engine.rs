//! The single state aggregate.
//!
//! [`RaceEngine`] owns the GPS model, the start line, the latest crossing
//! estimate, the race timer and the confirmation gate. Whoever holds it is
//! the only writer; everything else reads projections.
//!
//! ```text
//!   update_fix ──► GpsModel ──► (line set?) ──► estimator ──► estimate
//!
//!   handle(action) ──► ConfirmationGate ──► RaceTimer / StartLineModel
//!
//!   tick(id) ──► RaceTimer::on_tick ──► TickEvent
//! ```

use serde::{Deserialize, Serialize};

use crate::confirm::{ActionKind, ConfirmRequest, ConfirmationGate, GateOutcome};
use crate::error::{Rejection, SettingsError};
use crate::estimator::{estimate, CrossingEstimate};
use crate::fix::{GpsFix, GpsModel};
use crate::line::{MarkSide, StartLineModel};
use crate::race::{RaceState, RaceTimer, TickEvent, Ticker, SYNC_MASK_SECONDS};

// =============================================================================
// Settings
// =============================================================================

/// Confirmations needed after the first tap, per action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationSettings {
    pub push_off: u8,
    pub start_sequence: u8,
    pub bump: u8,
    pub sync: u8,
    pub clear_marks: u8,
    pub finish: u8,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        ConfirmationSettings {
            push_off: 1,
            start_sequence: 1,
            bump: 1,
            sync: 1,
            clear_marks: 1,
            finish: 2,
        }
    }
}

impl ConfirmationSettings {
    pub fn count(&self, kind: ActionKind) -> u8 {
        match kind {
            ActionKind::PushOff => self.push_off,
            ActionKind::StartSequence => self.start_sequence,
            ActionKind::Bump => self.bump,
            ActionKind::Sync => self.sync,
            ActionKind::ClearMarks => self.clear_marks,
            ActionKind::Finish => self.finish,
        }
    }

    fn all(&self) -> [(ActionKind, u8); 6] {
        [
            ActionKind::PushOff,
            ActionKind::StartSequence,
            ActionKind::Bump,
            ActionKind::Sync,
            ActionKind::ClearMarks,
            ActionKind::Finish,
        ]
        .map(|kind| (kind, self.count(kind)))
    }
}

/// Tunables, loaded from the config file by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub confirm_timeout_seconds: f64,
    pub sync_mask_seconds: f64,
    /// Subtracted from the first tap's time when anchoring a sequence
    pub latency_offset_seconds: f64,
    pub confirmations: ConfirmationSettings,
    /// Countdown lengths offered in Idle
    pub sequence_presets: Vec<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            confirm_timeout_seconds: crate::confirm::CONFIRM_TIMEOUT_SECONDS,
            sync_mask_seconds: SYNC_MASK_SECONDS,
            latency_offset_seconds: 0.3,
            confirmations: ConfirmationSettings::default(),
            sequence_presets: vec![600, 300, 240, 60],
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (kind, count) in self.confirmations.all() {
            if !(1..=2).contains(&count) {
                return Err(SettingsError::InvalidConfirmations {
                    action: kind.to_string(),
                    count,
                });
            }
        }

        let positive = [
            ("confirm_timeout_seconds", self.confirm_timeout_seconds),
            ("sync_mask_seconds", self.sync_mask_seconds),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SettingsError::InvalidValue { name, value });
            }
        }
        if self.sync_mask_seconds >= 60.0 {
            return Err(SettingsError::InvalidValue {
                name: "sync_mask_seconds",
                value: self.sync_mask_seconds,
            });
        }
        if !(self.latency_offset_seconds.is_finite() && self.latency_offset_seconds >= 0.0) {
            return Err(SettingsError::InvalidValue {
                name: "latency_offset_seconds",
                value: self.latency_offset_seconds,
            });
        }

        if self.sequence_presets.iter().any(|&p| p == 0) {
            return Err(SettingsError::EmptyPreset);
        }
        Ok(())
    }
}

// =============================================================================
// Actions
// =============================================================================

/// User actions, as received from the outside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    PushOff,
    StartSequence { seconds: f64 },
    /// `seconds: 0` means sync
    Bump { seconds: f64 },
    Sync,
    Finish,
    SetMark { side: MarkSide },
    ClearMarks,
}

/// What a gated action will do once confirmed. Fixed at the first tap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionPayload {
    PushOff,
    #[serde(rename_all = "camelCase")]
    StartSequence {
        start_epoch: f64,
        duration_seconds: f64,
    },
    Bump {
        delta: f64,
    },
    Sync,
    Finish,
    ClearMarks,
}

impl ActionPayload {
    fn shift_time(&mut self, offset: f64) {
        if let ActionPayload::StartSequence { start_epoch, .. } = self {
            *start_epoch += offset;
        }
    }
}

pub type ConfirmTicket = ConfirmRequest<ActionPayload>;

/// Result of handling an action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ActionOutcome {
    Applied,
    Pending { ticket: ConfirmTicket },
    Expired,
    Rejected { reason: String },
}

impl From<Rejection> for ActionOutcome {
    fn from(rejection: Rejection) -> Self {
        ActionOutcome::Rejected {
            reason: rejection.to_string(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct RaceEngine {
    settings: EngineSettings,
    gps: GpsModel,
    line: StartLineModel,
    estimate: Option<CrossingEstimate>,
    timer: RaceTimer,
    gate: ConfirmationGate<ActionPayload>,
    /// Bumped on every observable change
    version: u64,
}

impl RaceEngine {
    pub fn new(settings: EngineSettings, now: f64) -> Self {
        let mut gate = ConfirmationGate::new(settings.confirm_timeout_seconds);
        for (kind, count) in settings.confirmations.all() {
            gate.register(kind, count);
        }
        let mut timer = RaceTimer::new(settings.sync_mask_seconds);
        timer.start(now);

        RaceEngine {
            settings,
            gps: GpsModel::new(),
            line: StartLineModel::new(),
            estimate: None,
            timer,
            gate,
            version: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> RaceState {
        self.timer.state()
    }

    pub fn fix(&self) -> Option<&GpsFix> {
        self.gps.latest()
    }

    pub fn line(&self) -> &StartLineModel {
        &self.line
    }

    pub fn estimate(&self) -> Option<&CrossingEstimate> {
        self.estimate.as_ref()
    }

    pub fn timer(&self) -> &RaceTimer {
        &self.timer
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn pending_requests(&self) -> Vec<&ConfirmTicket> {
        self.gate.pending_requests()
    }

    /// Accept a validated fix. The estimate is current when this returns.
    pub fn update_fix(
        &mut self,
        latitude_deg: f64,
        longitude_deg: f64,
        heading_deg: f64,
        speed_knots: f64,
    ) -> Option<&CrossingEstimate> {
        self.gps
            .update_fix(latitude_deg, longitude_deg, heading_deg, speed_knots);
        self.recompute();
        self.version += 1;
        self.estimate.as_ref()
    }

    fn recompute(&mut self) {
        self.estimate = match (self.gps.latest(), self.line.line()) {
            (Some(fix), Some(line)) => Some(estimate(fix, line)),
            _ => None,
        };
    }

    /// Route an action through the confirmation gate. With `confirm` false
    /// this is the first tap; with `confirm` true it counts against the
    /// pending request of the same kind.
    pub fn handle(&mut self, action: Action, confirm: bool, now: f64) -> ActionOutcome {
        self.expire_confirmations(now);

        let (kind, payload) = match action {
            Action::SetMark { side } => return self.set_mark(side),
            Action::PushOff => (ActionKind::PushOff, ActionPayload::PushOff),
            Action::StartSequence { seconds } => (
                ActionKind::StartSequence,
                ActionPayload::StartSequence {
                    start_epoch: now - self.settings.latency_offset_seconds,
                    duration_seconds: seconds,
                },
            ),
            // a zero bump is a sync, gated as one
            Action::Bump { seconds } if seconds == 0.0 => (ActionKind::Sync, ActionPayload::Sync),
            Action::Bump { seconds } => (ActionKind::Bump, ActionPayload::Bump { delta: seconds }),
            Action::Sync => (ActionKind::Sync, ActionPayload::Sync),
            Action::Finish => (ActionKind::Finish, ActionPayload::Finish),
            Action::ClearMarks => (ActionKind::ClearMarks, ActionPayload::ClearMarks),
        };

        if let Err(rejection) = self.check_allowed(kind) {
            log::info!("Rejected {}: {}", kind, rejection);
            return rejection.into();
        }

        let outcome = if confirm {
            self.gate.confirm(kind, now)
        } else {
            self.gate.submit(kind, payload, now)
        };
        self.version += 1;

        match outcome {
            GateOutcome::Applied(payload) => self.apply(payload, now),
            GateOutcome::PendingConfirmation(ticket) => {
                log::debug!(
                    "{} waiting for {} more confirmation(s)",
                    kind,
                    ticket.confirmations_left()
                );
                ActionOutcome::Pending { ticket }
            }
            GateOutcome::Expired => {
                log::debug!("Confirmation for {} had nothing to confirm", kind);
                ActionOutcome::Expired
            }
        }
    }

    fn check_allowed(&self, kind: ActionKind) -> Result<(), Rejection> {
        let required = match kind {
            ActionKind::PushOff => RaceState::Setup,
            ActionKind::StartSequence => RaceState::Idle,
            ActionKind::Bump | ActionKind::Sync => RaceState::Sequence,
            ActionKind::Finish => RaceState::Race,
            ActionKind::ClearMarks => return Ok(()),
        };
        let state = self.state();
        if state == required {
            Ok(())
        } else {
            Err(Rejection::InvalidState {
                action: kind.as_str(),
                state,
            })
        }
    }

    fn apply(&mut self, payload: ActionPayload, now: f64) -> ActionOutcome {
        let result = match payload {
            ActionPayload::PushOff => self.timer.push_off(now),
            ActionPayload::StartSequence {
                start_epoch,
                duration_seconds,
            } => self.timer.start_sequence(start_epoch, duration_seconds, now),
            ActionPayload::Bump { delta } => self.timer.bump(delta, now),
            ActionPayload::Sync => self.timer.sync(now),
            ActionPayload::Finish => self.timer.finish(now),
            ActionPayload::ClearMarks => {
                self.line.clear();
                self.estimate = None;
                log::info!("Start line cleared");
                Ok(Vec::new())
            }
        };
        self.version += 1;

        match result {
            Ok(_) => ActionOutcome::Applied,
            Err(rejection) => {
                log::info!("Rejected {:?}: {}", payload, rejection);
                rejection.into()
            }
        }
    }

    fn set_mark(&mut self, side: MarkSide) -> ActionOutcome {
        let Some(fix) = self.gps.latest() else {
            let rejection = Rejection::NoFix(side);
            log::info!("{}", rejection);
            return rejection.into();
        };
        let fix = *fix;
        self.line.set_mark(side, &fix);
        self.recompute();
        self.version += 1;
        ActionOutcome::Applied
    }

    // -------------------------------------------------------------------------
    // Scheduling hooks
    // -------------------------------------------------------------------------

    pub fn active_ticker(&self) -> Option<Ticker> {
        self.timer.active_ticker().copied()
    }

    /// Deliver a ticker deadline. Stale ids are ignored.
    pub fn tick(&mut self, id: u64, now: f64) -> Vec<TickEvent> {
        let events = self.timer.on_tick(id, now);
        if !events.is_empty() {
            self.version += 1;
        }
        events
    }

    /// The wall clock was stepped by `offset` seconds (GPS time adopted).
    /// Every epoch the engine holds moves with it: the countdown, the gun
    /// and pending confirmations keep their remaining time.
    pub fn clock_adjusted(&mut self, offset: f64, now: f64) -> Vec<TickEvent> {
        for request in self.gate.pending_requests_mut() {
            request.shift_time(offset);
            request.payload.shift_time(offset);
        }
        let events = self.timer.clock_stepped(offset, now);
        self.version += 1;
        events
    }

    pub fn next_confirmation_expiry(&self) -> Option<f64> {
        self.gate.next_expiry()
    }

    pub fn expire_confirmations(&mut self, now: f64) -> Vec<ActionKind> {
        let expired = self.gate.expire(now);
        if !expired.is_empty() {
            self.version += 1;
        }
        expired
    }
}
