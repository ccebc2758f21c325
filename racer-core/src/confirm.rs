//! Confirmation gate for state-changing actions.
//!
//! A tap on a bouncing boat is easy to get wrong, so actions that change the
//! race state are two-phase: the first submission only records a pending
//! request, and the action is applied once the required number of
//! confirmations has arrived before the request times out.
//!
//! ```text
//!   submit ──► Pending(0/2) ──confirm──► Pending(1/2) ──confirm──► Applied
//!                  │                          │
//!                  └──────── timeout ─────────┴──► (discarded, Expired)
//! ```
//!
//! Requests of different [`ActionKind`]s are independent. Submitting the same
//! kind again replaces whatever was pending for it.
//!
//! Time is passed in by the caller (seconds since the Unix epoch), there is
//! no clock in this module.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default time a request stays open
pub const CONFIRM_TIMEOUT_SECONDS: f64 = 5.0;

// =============================================================================
// Action kinds
// =============================================================================

/// Identifies which gated action a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    PushOff,
    StartSequence,
    Bump,
    Sync,
    Finish,
    ClearMarks,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PushOff => "push-off",
            ActionKind::StartSequence => "start-sequence",
            ActionKind::Bump => "bump",
            ActionKind::Sync => "sync",
            ActionKind::Finish => "finish",
            ActionKind::ClearMarks => "clear-marks",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Requests and outcomes
// =============================================================================

/// A pending request. Also handed back to the caller as the ticket it must
/// resubmit against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest<P> {
    pub action: ActionKind,
    pub created_at: f64,
    pub timeout_at: f64,
    pub confirmations_required: u8,
    pub confirmations_received: u8,
    /// Captured at submission; a later confirmation cannot change it
    pub payload: P,
}

impl<P> ConfirmRequest<P> {
    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.timeout_at
    }

    pub fn confirmations_left(&self) -> u8 {
        self.confirmations_required
            .saturating_sub(self.confirmations_received)
    }

    /// Move the request onto a clock that was stepped by `offset` seconds
    pub fn shift_time(&mut self, offset: f64) {
        self.created_at += offset;
        self.timeout_at += offset;
    }
}

/// Result of a submit or confirm
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome<P> {
    /// The action may be applied now with this payload
    Applied(P),
    /// Waiting for more confirmations
    PendingConfirmation(ConfirmRequest<P>),
    /// No live request to confirm; nothing happened
    Expired,
}

// =============================================================================
// Single gated action
// =============================================================================

/// One action kind with its confirmation count and pending request
#[derive(Debug, Clone)]
pub struct GatedAction<P> {
    kind: ActionKind,
    required_confirmations: u8,
    timeout_seconds: f64,
    pending: Option<ConfirmRequest<P>>,
}

impl<P: Clone> GatedAction<P> {
    pub fn new(kind: ActionKind, required_confirmations: u8, timeout_seconds: f64) -> Self {
        GatedAction {
            kind,
            required_confirmations,
            timeout_seconds,
            pending: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// First phase. With zero required confirmations the action passes
    /// straight through.
    pub fn submit(&mut self, payload: P, now: f64) -> GateOutcome<P> {
        if self.required_confirmations == 0 {
            self.pending = None;
            return GateOutcome::Applied(payload);
        }

        if self.pending.is_some() {
            log::debug!("Replacing pending {} request", self.kind);
        }
        let request = ConfirmRequest {
            action: self.kind,
            created_at: now,
            timeout_at: now + self.timeout_seconds,
            confirmations_required: self.required_confirmations,
            confirmations_received: 0,
            payload,
        };
        self.pending = Some(request.clone());
        GateOutcome::PendingConfirmation(request)
    }

    /// Second phase. Counts one confirmation against the live request.
    pub fn confirm(&mut self, now: f64) -> GateOutcome<P> {
        self.expire(now);

        let Some(request) = self.pending.as_mut() else {
            return GateOutcome::Expired;
        };

        request.confirmations_received += 1;
        if request.confirmations_received >= request.confirmations_required {
            match self.pending.take() {
                Some(request) => GateOutcome::Applied(request.payload),
                None => GateOutcome::Expired,
            }
        } else {
            GateOutcome::PendingConfirmation(request.clone())
        }
    }

    /// Drop the pending request if its timeout has passed. Returns true if
    /// one was dropped.
    pub fn expire(&mut self, now: f64) -> bool {
        match &self.pending {
            Some(request) if request.is_expired(now) => {
                log::info!(
                    "{} request expired after {}/{} confirmations",
                    self.kind,
                    request.confirmations_received,
                    request.confirmations_required
                );
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> Option<&ConfirmRequest<P>> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut ConfirmRequest<P>> {
        self.pending.as_mut()
    }
}

// =============================================================================
// Gate over all action kinds
// =============================================================================

/// Independent [`GatedAction`]s keyed by kind
#[derive(Debug, Clone)]
pub struct ConfirmationGate<P> {
    actions: HashMap<ActionKind, GatedAction<P>>,
    timeout_seconds: f64,
}

impl<P: Clone> ConfirmationGate<P> {
    pub fn new(timeout_seconds: f64) -> Self {
        ConfirmationGate {
            actions: HashMap::new(),
            timeout_seconds,
        }
    }

    /// Set the confirmation count for a kind. Drops any pending request of
    /// that kind.
    pub fn register(&mut self, kind: ActionKind, required_confirmations: u8) {
        self.actions.insert(
            kind,
            GatedAction::new(kind, required_confirmations, self.timeout_seconds),
        );
    }

    fn action(&mut self, kind: ActionKind) -> &mut GatedAction<P> {
        let timeout = self.timeout_seconds;
        // unregistered kinds default to one confirmation
        self.actions
            .entry(kind)
            .or_insert_with(|| GatedAction::new(kind, 1, timeout))
    }

    pub fn submit(&mut self, kind: ActionKind, payload: P, now: f64) -> GateOutcome<P> {
        self.action(kind).submit(payload, now)
    }

    pub fn confirm(&mut self, kind: ActionKind, now: f64) -> GateOutcome<P> {
        self.action(kind).confirm(now)
    }

    /// Drop every request whose timeout has passed, returning their kinds
    pub fn expire(&mut self, now: f64) -> Vec<ActionKind> {
        self.actions
            .values_mut()
            .filter_map(|action| action.expire(now).then(|| action.kind()))
            .collect()
    }

    /// Earliest timeout among pending requests
    pub fn next_expiry(&self) -> Option<f64> {
        self.actions
            .values()
            .filter_map(|action| action.pending().map(|r| r.timeout_at))
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn pending(&self, kind: ActionKind) -> Option<&ConfirmRequest<P>> {
        self.actions.get(&kind).and_then(|action| action.pending())
    }

    pub fn pending_requests_mut(&mut self) -> impl Iterator<Item = &mut ConfirmRequest<P>> {
        self.actions
            .values_mut()
            .filter_map(|action| action.pending_mut())
    }

    /// All pending requests, ordered by creation time
    pub fn pending_requests(&self) -> Vec<&ConfirmRequest<P>> {
        let mut requests: Vec<_> = self
            .actions
            .values()
            .filter_map(|action| action.pending())
            .collect();
        requests.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        requests
    }
}
