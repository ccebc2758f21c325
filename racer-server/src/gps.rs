//! NMEA 0183 fix ingestion.
//!
//! Lines arrive as UDP datagrams (one or more sentences each), as a TCP
//! stream from a multiplexer, or straight from the receiver on a serial
//! port. Sentence parsing and checksum validation is left to `nmea-parser`.
//! Active RMC sentences with a position become fixes; any other RMC still
//! carries the receiver's UTC time, which is forwarded on its own.
//!
//! ```text
//!   UDP / TCP / serial ──► lines ──► NmeaParser ──► RMC, status A ──► Fix ──► scheduler
//!                                        │      └──► RMC, no fix ───► Time ─┘
//!                                        └──► anything else: dropped
//! ```

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use nmea_parser::{NmeaParser, ParsedMessage};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::scheduler::EngineHandle;
use crate::ServerError;

const MAX_LINE_LENGTH: usize = 1024;

/// NMEA 0183 standard rate
pub const DEFAULT_BAUD_RATE: u32 = 4800;

// =============================================================================
// Source address
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpsSource {
    /// Listen for datagrams on this address
    UdpListen(SocketAddr),
    /// Connect to `host:port`
    Tcp(String),
    /// Read a serial device, e.g. `/dev/serial0` at 9600 baud
    Serial { path: String, baud_rate: u32 },
}

impl FromStr for GpsSource {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ServerError::GpsSource(s.to_string());

        if let Some(addr) = s.strip_prefix("udp-listen:") {
            return addr.parse().map(GpsSource::UdpListen).map_err(|_| bad());
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(bad)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(bad());
            }
            return Ok(GpsSource::Tcp(addr.to_string()));
        }
        if let Some(device) = s.strip_prefix("serial:") {
            // a trailing `:N` is the baud rate, anything else is the path
            let (path, baud_rate) = match device.rsplit_once(':') {
                Some((path, baud)) => match baud.parse::<u32>() {
                    Ok(baud_rate) if baud_rate > 0 => (path, baud_rate),
                    Ok(_) => return Err(bad()),
                    Err(_) => (device, DEFAULT_BAUD_RATE),
                },
                None => (device, DEFAULT_BAUD_RATE),
            };
            if path.is_empty() {
                return Err(bad());
            }
            return Ok(GpsSource::Serial {
                path: path.to_string(),
                baud_rate,
            });
        }
        Err(bad())
    }
}

impl fmt::Display for GpsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpsSource::UdpListen(addr) => write!(f, "udp-listen:{}", addr),
            GpsSource::Tcp(addr) => write!(f, "tcp:{}", addr),
            GpsSource::Serial { path, baud_rate } => write!(f, "serial:{}:{}", path, baud_rate),
        }
    }
}

// =============================================================================
// Fix extraction
// =============================================================================

/// A validated fix on its way to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct FixUpdate {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub heading_deg: f64,
    pub speed_knots: f64,
    /// UTC time from the sentence, if it had one
    pub timestamp: Option<DateTime<Utc>>,
}

/// What one sentence contributes
#[derive(Debug, Clone, PartialEq)]
pub enum GpsEvent {
    /// Active RMC with a position
    Fix(FixUpdate),
    /// RMC without a usable fix that still carries the receiver's UTC time.
    /// Receivers report time well before they have a position.
    Time(DateTime<Utc>),
}

/// Extract what a sentence offers, or `None` for anything but a
/// checksum-valid RMC.
pub fn parse_sentence(parser: &mut NmeaParser, sentence: &str) -> Option<GpsEvent> {
    let sentence = sentence.trim();
    if sentence.is_empty() {
        return None;
    }

    let rmc = match parser.parse_sentence(sentence) {
        Ok(ParsedMessage::Rmc(rmc)) => rmc,
        Ok(_) => return None,
        Err(e) => {
            trace!("Dropping sentence '{}': {:?}", sentence, e);
            return None;
        }
    };

    match (rmc.status_active, rmc.latitude, rmc.longitude) {
        (Some(true), Some(latitude_deg), Some(longitude_deg)) => Some(GpsEvent::Fix(FixUpdate {
            latitude_deg,
            longitude_deg,
            heading_deg: rmc.bearing.unwrap_or(0.0),
            speed_knots: rmc.sog_knots.unwrap_or(0.0),
            timestamp: rmc.timestamp,
        })),
        _ => {
            trace!("RMC without a fix: {}", sentence);
            rmc.timestamp.map(GpsEvent::Time)
        }
    }
}

/// Everything in a datagram, in order
pub fn parse_datagram(parser: &mut NmeaParser, data: &[u8]) -> Vec<GpsEvent> {
    String::from_utf8_lossy(data)
        .lines()
        .filter_map(|line| parse_sentence(parser, line))
        .collect()
}

// =============================================================================
// Link state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Active,
    Error,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Active => write!(f, "Active"),
            LinkState::Error => write!(f, "Error"),
        }
    }
}

/// Connection state and reconnect backoff for a TCP or serial source
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    failure_count: u32,
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Link {
    pub fn new() -> Self {
        Link {
            state: LinkState::Disconnected,
            failure_count: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn connecting(&mut self) {
        self.state = LinkState::Connecting;
    }

    pub fn connected(&mut self) {
        self.state = LinkState::Active;
        self.failure_count = 0;
    }

    pub fn error(&mut self) {
        self.state = LinkState::Error;
        self.failure_count = self.failure_count.saturating_add(1);
    }

    /// Delay before the next attempt: 1s, 2s, 4s, 8s, max 30s
    pub fn backoff(&self) -> Duration {
        let base_ms = 1000u64;
        let max_ms = 30000u64;
        let exponent = self.failure_count.saturating_sub(1).min(5);
        Duration::from_millis((base_ms << exponent).min(max_ms))
    }
}

// =============================================================================
// Reader
// =============================================================================

type LineSource = Box<dyn AsyncRead + Send + Unpin>;

pub struct GpsReader {
    source: GpsSource,
    engine: EngineHandle,
    parser: NmeaParser,
}

impl GpsReader {
    pub fn new(source: GpsSource, engine: EngineHandle) -> Self {
        GpsReader {
            source,
            engine,
            parser: NmeaParser::new(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        match self.source.clone() {
            GpsSource::UdpListen(addr) => self.run_udp(&subsys, addr).await,
            GpsSource::Tcp(_) | GpsSource::Serial { .. } => self.run_stream(&subsys).await,
        }
    }

    async fn forward(&self, event: GpsEvent) -> Result<(), ServerError> {
        match event {
            GpsEvent::Fix(fix) => self.engine.update_fix(fix).await,
            GpsEvent::Time(time) => self.engine.gps_time(time).await,
        }
    }

    async fn run_udp(&mut self, subsys: &SubsystemHandle, addr: SocketAddr) -> Result<(), ServerError> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        info!("GPS: listening for NMEA on udp {}", addr);

        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("GPS: shutdown");
                    return Ok(());
                },
                r = socket.recv_from(&mut buf) => {
                    let (len, from) = r?;
                    trace!("GPS: {} bytes from {}", len, from);
                    for event in parse_datagram(&mut self.parser, &buf[..len]) {
                        self.forward(event).await?;
                    }
                },
            }
        }
    }

    async fn open(&self) -> Result<LineSource, ServerError> {
        match &self.source {
            GpsSource::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr).await?)),
            GpsSource::Serial { path, baud_rate } => {
                let port = tokio_serial::new(path.as_str(), *baud_rate).open_native_async()?;
                Ok(Box::new(port))
            }
            GpsSource::UdpListen(_) => Err(ServerError::GpsSource(self.source.to_string())),
        }
    }

    /// TCP and serial sources: open, read lines until the stream ends or
    /// fails, back off, reopen.
    async fn run_stream(&mut self, subsys: &SubsystemHandle) -> Result<(), ServerError> {
        let mut link = Link::new();

        loop {
            link.connecting();
            let opened = tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                r = self.open() => r,
            };

            match opened {
                Ok(stream) => {
                    link.connected();
                    info!("GPS: connected to {}", self.source);
                    if self.read_stream(subsys, stream).await? {
                        return Ok(());
                    }
                    info!("GPS: disconnected from {}", self.source);
                    link.error();
                }
                Err(e) => {
                    link.error();
                    warn!("GPS: cannot open {}: {}", self.source, e);
                }
            }

            let delay = link.backoff();
            debug!("GPS: {}, retrying in {:?}", link.state(), delay);
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(()),
                _ = sleep(delay) => {},
            }
        }
    }

    /// Read lines until the stream ends. Returns true on shutdown.
    async fn read_stream(
        &mut self,
        subsys: &SubsystemHandle,
        stream: LineSource,
    ) -> Result<bool, ServerError> {
        let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => return Ok(true),
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        if let Some(event) = parse_sentence(&mut self.parser, &line) {
                            self.forward(event).await?;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("GPS: read error: {}", e);
                        return Ok(false);
                    }
                    None => return Ok(false),
                },
            }
        }
    }
}
