//! # Racer Core
//!
//! Platform-independent start-line navigation and race timing for a
//! sailboat's onboard start aid.
//!
//! This crate has **no I/O and no clock**. Every time-dependent call takes
//! `now` as seconds since the Unix epoch, so the whole state machine is
//! deterministic and can be driven from tests or from any event loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  racer-core (no tokio, no sockets, no clock)                │
//! │  ├── navigation/  (great-circle math)                       │
//! │  ├── fix/         (latest GPS fix, heading unwrap)          │
//! │  ├── line/        (starboard + port marks)                  │
//! │  ├── estimator/   (seconds to cross, percent along line)    │
//! │  ├── confirm/     (two-phase confirmation gate)             │
//! │  ├── race/        (Setup/Idle/Sequence/Race + ticker)       │
//! │  ├── engine/      (RaceEngine: the single state aggregate)  │
//! │  └── projection/  (formatted read-only view)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  racer-server           │
//!                 │  (tokio loop, NMEA, API)│
//!                 └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use racer_core::{Action, ActionOutcome, EngineSettings, RaceEngine, RaceState};
//!
//! let now = 1_700_000_000.0;
//! let mut engine = RaceEngine::new(EngineSettings::default(), now);
//!
//! // first tap only asks for confirmation
//! let outcome = engine.handle(Action::PushOff, false, now);
//! assert!(matches!(outcome, ActionOutcome::Pending { .. }));
//!
//! assert_eq!(engine.handle(Action::PushOff, true, now + 1.0), ActionOutcome::Applied);
//! assert_eq!(engine.state(), RaceState::Idle);
//! ```

pub mod confirm;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod fix;
pub mod line;
pub mod navigation;
pub mod projection;
pub mod race;

// Re-export commonly used types
pub use confirm::{ActionKind, ConfirmRequest, ConfirmationGate, GateOutcome, GatedAction};
pub use engine::{
    Action, ActionOutcome, ActionPayload, ConfirmTicket, ConfirmationSettings, EngineSettings,
    RaceEngine,
};
pub use error::{NavError, Rejection, SettingsError};
pub use estimator::{CrossingEstimate, CrossingMethod};
pub use fix::{GpsFix, GpsModel};
pub use line::{MarkSide, MarksSet, StartLine, StartLineModel};
pub use projection::Projection;
pub use race::{RaceState, RaceTimer, SequenceTimer, TickEvent, Ticker, TickerKind};
