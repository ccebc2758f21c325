//! Error and rejection types for navigation, settings and race actions

use thiserror::Error;

use crate::line::MarkSide;
use crate::race::RaceState;

/// Errors raised by the great-circle geometry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    /// The two great-circle planes are parallel (normals colinear), so no
    /// unique pair of intersection points exists
    #[error("Degenerate geometry: great circles are coincident or parallel")]
    ParallelPlanes,

    /// Two points defining a great circle coincide or are antipodal
    #[error("Degenerate geometry: points do not define a great circle")]
    UndefinedCircle,

    /// A computation produced a non-finite value
    #[error("Non-finite result in {0}")]
    NonFinite(&'static str),
}

/// Errors raised when validating engine settings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// Confirmation counts must be 1 or 2
    #[error("Invalid confirmation count {count} for '{action}': expected 1 or 2")]
    InvalidConfirmations { action: String, count: u8 },

    /// Timeouts and masks must be positive and finite
    #[error("Invalid value {value} for '{name}'")]
    InvalidValue { name: &'static str, value: f64 },

    /// A preset countdown of zero seconds
    #[error("Sequence preset must be at least one second")]
    EmptyPreset,
}

/// Reasons an action is refused. These are reported and logged, never
/// raised; the state is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("'{action}' is not valid in state {state}")]
    InvalidState {
        action: &'static str,
        state: RaceState,
    },

    #[error("Bump of {delta:+.0} s would leave {remaining:.1} s remaining")]
    WouldGoNegative { delta: f64, remaining: f64 },

    #[error("Sync ignored: {remaining:.1} s remaining is within the mask window")]
    SyncMasked { remaining: f64 },

    #[error("Sequence length must be positive, got {0} s")]
    InvalidDuration(f64),

    #[error("No GPS fix to place the {0} mark")]
    NoFix(MarkSide),
}
