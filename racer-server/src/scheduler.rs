//! Event loop that owns the [`RaceEngine`].
//!
//! The scheduler is the only place the engine lives. GPS fixes, user actions
//! and snapshot requests arrive on one command channel; ticker deadlines and
//! confirmation expiries are slept on directly. Everything is handled on a
//! single task, so the engine never sees two things at once.
//!
//! ```text
//!   GpsReader ──Fix/Time─┐
//!   Web ──Action─────────┼──► mpsc ──┐
//!   Web ──Snapshot───────┘           ▼
//!                              ┌───────────┐   sleep_until(ticker deadline)
//!                              │ Scheduler │◄─ sleep_until(confirm expiry)
//!                              └───────────┘
//! ```
//!
//! Deadlines are absolute epochs from the engine, turned into tokio instants
//! through [`Clock::instant_for`], so a slow iteration never accumulates
//! drift. When GPS time steps the clock, the engine shifts its own epochs
//! by the same offset, so countdowns keep their remaining time.

use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_graceful_shutdown::SubsystemHandle;

use racer_core::{Action, ActionOutcome, Projection, RaceEngine, TickEvent};

use crate::clock::Clock;
use crate::gps::FixUpdate;
use crate::ServerError;

const COMMAND_QUEUE: usize = 64;
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub enum Command {
    Fix(FixUpdate),
    /// UTC from a sentence that had no usable fix
    Time(DateTime<Utc>),
    Action {
        action: Action,
        confirm: bool,
        reply: oneshot::Sender<ActionResponse>,
    },
    Snapshot {
        reply: oneshot::Sender<Projection>,
    },
}

/// Outcome of an action together with the state it left behind
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    pub projection: Projection,
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub async fn action(&self, action: Action, confirm: bool) -> Result<ActionResponse, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Action {
            action,
            confirm,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServerError::EngineGone)
    }

    pub async fn snapshot(&self) -> Result<Projection, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| ServerError::EngineGone)
    }

    pub async fn update_fix(&self, fix: FixUpdate) -> Result<(), ServerError> {
        self.send(Command::Fix(fix)).await
    }

    pub async fn gps_time(&self, time: DateTime<Utc>) -> Result<(), ServerError> {
        self.send(Command::Time(time)).await
    }

    async fn send(&self, command: Command) -> Result<(), ServerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServerError::EngineGone)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

pub struct Scheduler {
    engine: RaceEngine,
    clock: Clock,
    rx: mpsc::Receiver<Command>,
}

impl Scheduler {
    pub fn new(engine: RaceEngine, clock: Clock) -> (EngineHandle, Scheduler) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        (EngineHandle { tx }, Scheduler { engine, clock, rx })
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        self.run_until(subsys.on_shutdown_requested()).await
    }

    /// Run until `shutdown` completes or every handle is dropped
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<(), ServerError> {
        tokio::pin!(shutdown);
        info!("Scheduler started in state {}", self.engine.state());

        loop {
            let ticker = self.engine.active_ticker();
            let tick_at = ticker
                .map(|t| self.clock.instant_for(t.deadline))
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            let expiry_at = self
                .engine
                .next_confirmation_expiry()
                .map(|e| self.clock.instant_for(e))
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! { biased;
                _ = &mut shutdown => {
                    debug!("Scheduler: shutdown");
                    return Ok(());
                },
                _ = sleep_until(tick_at), if ticker.is_some() => {
                    if let Some(ticker) = ticker {
                        let events = self.engine.tick(ticker.id, self.clock.now());
                        log_events(&events);
                    }
                },
                _ = sleep_until(expiry_at) => {
                    for kind in self.engine.expire_confirmations(self.clock.now()) {
                        debug!("Confirmation for {} timed out", kind);
                    }
                },
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("Scheduler: all handles dropped");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Fix(fix) => {
                if let Some(time) = fix.timestamp {
                    self.adopt_gps_time(time);
                }
                let estimate = self.engine.update_fix(
                    fix.latitude_deg,
                    fix.longitude_deg,
                    fix.heading_deg,
                    fix.speed_knots,
                );
                if let Some(estimate) = estimate {
                    trace!(
                        "Line in {:.1} s at {:.0}% ({:?})",
                        estimate.seconds,
                        estimate.percent_along,
                        estimate.method
                    );
                }
            }
            Command::Action {
                action,
                confirm,
                reply,
            } => {
                let now = self.clock.now();
                let outcome = self.engine.handle(action, confirm, now);
                debug!("{:?} (confirm: {}) -> {:?}", action, confirm, outcome);
                let response = ActionResponse {
                    outcome,
                    projection: Projection::new(&self.engine, now),
                };
                if reply.send(response).is_err() {
                    debug!("Action caller went away before the reply");
                }
            }
            Command::Time(time) => self.adopt_gps_time(time),
            Command::Snapshot { reply } => {
                let _ = reply.send(Projection::new(&self.engine, self.clock.now()));
            }
        }
    }

    fn adopt_gps_time(&mut self, time: DateTime<Utc>) {
        if let Some(offset) = self.clock.apply_gps_time(time) {
            let events = self.engine.clock_adjusted(offset, self.clock.now());
            log_events(&events);
        }
    }
}

fn log_events(events: &[TickEvent]) {
    for event in events {
        match event {
            TickEvent::Gun { gun_epoch } => info!("Gun at {:.3}", gun_epoch),
            _ => debug!("{:?}", event),
        }
    }
}
