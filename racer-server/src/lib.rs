//! # Racer Server
//!
//! Onboard start-line and race countdown server.
//!
//! This crate wraps [`racer_core`] in a tokio runtime that:
//! - Reads NMEA 0183 fixes from a UDP or TCP source
//! - Keeps a GPS-corrected monotonic wall clock
//! - Drives the race ticker at absolute deadlines
//! - Serves a REST API for the cockpit display
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    racer-server                         │
//! │  ┌─────────────┐  ┌─────────────┐                       │
//! │  │ REST API    │  │ GPS reader  │                       │
//! │  │ (axum)      │  │ (NMEA 0183) │                       │
//! │  └──────┬──────┘  └──────┬──────┘                       │
//! │         │  Command       │  Command::Fix                │
//! │         ▼                ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              Scheduler (single owner)               ││
//! │  │  - RaceEngine from racer-core                       ││
//! │  │  - sleeps until the next ticker / expiry deadline   ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is never shared: every reader and writer goes through the
//! scheduler's command channel, so fixes, ticks and actions are applied
//! one at a time in arrival order.
//!
//! ## Key Components
//!
//! - [`Session`] - Main application state container
//! - [`scheduler::Scheduler`] - Event loop that owns the engine
//! - [`scheduler::EngineHandle`] - Cloneable sender for commands
//! - [`gps::GpsReader`] - NMEA ingestion with reconnect backoff
//! - [`clock::Clock`] - Monotonic epoch clock with GPS correction
//!
//! ## REST API
//!
//! The server exposes a REST API (via the `web` module in `main.rs`):
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /api/state` | Current projection |
//! | `POST /api/push-off` | Setup to Idle |
//! | `POST /api/start` | Start the countdown |
//! | `POST /api/bump` | Adjust the countdown, `0` = sync |
//! | `POST /api/sync` | Snap to the minute |
//! | `POST /api/finish` | Race to Idle |
//! | `POST /api/line` | Set a mark at the boat's position |
//! | `DELETE /api/line` | Clear both marks |
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --port` - HTTP server port (default: 8080)
//! - `-g, --gps` - `udp-listen:ADDR:PORT`, `tcp:HOST:PORT` or `serial:PATH[:BAUD]`
//! - `-c, --config` - JSON settings file
//! - `-v` - Increase verbosity (use multiple times)

extern crate tokio;

use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use thiserror::Error;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use racer_core::{EngineSettings, RaceEngine, SettingsError};

pub mod clock;
pub mod config;
pub mod gps;
pub mod scheduler;

use clock::Clock;
use gps::{GpsReader, GpsSource};
use scheduler::{EngineHandle, Scheduler};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// GPS source, either
    /// - `udp-listen:ipv4-address:port` = listen on (broadcast) address at given port
    /// - `tcp:host:port` = connect to an NMEA multiplexer
    /// - `serial:path[:baud]` = read a serial port, 4800 baud if omitted
    #[arg(short, long)]
    pub gps: Option<GpsSource>,

    /// Settings file, defaults to config.json in the user config directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Keep the system clock, do not correct it from GPS time
    #[arg(long, default_value_t = false)]
    pub no_gps_time: bool,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Socket operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Invalid GPS source '{0}', expected udp-listen:ADDR:PORT, tcp:HOST:PORT or serial:PATH[:BAUD]")]
    GpsSource(String),

    #[error("Serial port failed: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Race engine is not running")]
    EngineGone,
}

pub struct SessionInner {
    pub args: Cli,
    pub clock: Clock,
    pub engine: EngineHandle,
}

#[derive(Clone)]
pub struct Session {
    pub inner: Arc<RwLock<SessionInner>>,
}

impl Session {
    pub fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, SessionInner>, PoisonError<RwLockReadGuard<'_, SessionInner>>>
    {
        self.inner.read()
    }

    /// Build the session and the scheduler that owns the engine, without
    /// starting anything
    pub fn new_base(args: Cli, settings: EngineSettings) -> (Self, Scheduler) {
        let clock = Clock::new(!args.no_gps_time);
        let engine = RaceEngine::new(settings, clock.now());
        let (handle, scheduler) = Scheduler::new(engine, clock.clone());

        let session = Session {
            inner: Arc::new(RwLock::new(SessionInner {
                args,
                clock,
                engine: handle,
            })),
        };
        (session, scheduler)
    }

    pub async fn new(subsystem: &SubsystemHandle, args: Cli, settings: EngineSettings) -> Self {
        let (session, scheduler) = Self::new_base(args, settings);

        subsystem.start(SubsystemBuilder::new("Scheduler", |subsys| {
            scheduler.run(subsys)
        }));

        if let Some(source) = session.args().gps {
            let reader = GpsReader::new(source, session.engine());
            subsystem.start(SubsystemBuilder::new("GPS", |subsys| reader.run(subsys)));
        } else {
            log::warn!("No GPS source configured, the start line cannot be set");
        }

        session
    }

    pub fn args(&self) -> Cli {
        let args = { self.read().unwrap().args.clone() };
        args
    }

    pub fn engine(&self) -> EngineHandle {
        self.read().unwrap().engine.clone()
    }

    pub fn clock(&self) -> Clock {
        self.read().unwrap().clock.clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}
