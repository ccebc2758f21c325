//! Epoch clock for the race timer.
//!
//! `now()` is the system time captured once at startup plus monotonic
//! elapsed time, so stepping the OS clock never moves a running countdown.
//! The first RMC sentence that carries a UTC time, with or without a fix,
//! sets a one-off offset, after which the countdown follows GPS time like
//! the committee boat's does. The caller moves any epochs it holds by the
//! returned offset.

use atomic_float::AtomicF64;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct ClockInner {
    epoch_at_start: f64,
    started: Instant,
    offset: AtomicF64,
    corrected: AtomicBool,
    use_gps_time: bool,
}

#[derive(Clone, Debug)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    pub fn new(use_gps_time: bool) -> Self {
        Self::with_epoch(epoch_seconds(Utc::now()), use_gps_time)
    }

    /// Clock that reads `epoch` right now
    pub fn with_epoch(epoch: f64, use_gps_time: bool) -> Self {
        Clock {
            inner: Arc::new(ClockInner {
                epoch_at_start: epoch,
                started: Instant::now(),
                offset: AtomicF64::new(0.0),
                corrected: AtomicBool::new(false),
                use_gps_time,
            }),
        }
    }

    /// Seconds since the Unix epoch
    pub fn now(&self) -> f64 {
        self.inner.epoch_at_start
            + self.inner.started.elapsed().as_secs_f64()
            + self.inner.offset.load(Ordering::Relaxed)
    }

    pub fn offset(&self) -> f64 {
        self.inner.offset.load(Ordering::Relaxed)
    }

    pub fn is_gps_corrected(&self) -> bool {
        self.inner.corrected.load(Ordering::Relaxed)
    }

    /// Adopt GPS time. Only the first call has any effect.
    ///
    /// Returns the offset if it was applied, so epochs taken on the old
    /// clock can be moved along with it.
    pub fn apply_gps_time(&self, gps_time: DateTime<Utc>) -> Option<f64> {
        if !self.inner.use_gps_time || self.inner.corrected.swap(true, Ordering::SeqCst) {
            return None;
        }

        let offset = epoch_seconds(gps_time) - self.now();
        self.inner.offset.store(offset, Ordering::Relaxed);
        log::info!(
            "Clock set from GPS time {}, offset {:+.3} s",
            gps_time.to_rfc3339(),
            offset
        );
        Some(offset)
    }

    /// The tokio instant at which `now()` will read `epoch`. Epochs in the
    /// past map to the start instant.
    pub fn instant_for(&self, epoch: f64) -> Instant {
        let since_start = epoch - self.offset() - self.inner.epoch_at_start;
        self.inner.started + Duration::from_secs_f64(since_start.max(0.0))
    }
}

pub fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}
