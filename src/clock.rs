//! Wall Clock
//!
//! Millisecond clock injected into the engine. The engine never reads system
//! time directly; production code uses [`SystemClock`], tests drive a
//! [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type Millis = i64;

/// Conversion constants
pub const MILLIS_PER_SEC: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SEC;

/// Convert an unsigned duration in ms, saturating at `Millis::MAX`.
#[inline]
pub fn millis_from_u64(ms: u64) -> Millis {
    Millis::try_from(ms).unwrap_or(Millis::MAX)
}

/// Source of "now" for every timestamp the engine records.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Real wall clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for deterministic tests and replays.
///
/// Unlike a simulation clock this one is allowed to move backwards via
/// [`ManualClock::set`], which is how clock-skew handling gets exercised.
#[derive(Debug, Default)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    #[inline]
    pub fn new(start: Millis) -> Self {
        Self {
            current: AtomicI64::new(start),
        }
    }

    /// Jump to an absolute time (may go backward).
    #[inline]
    pub fn set(&self, time: Millis) {
        self.current.store(time, Ordering::SeqCst);
    }

    /// Advance by a delta in milliseconds.
    #[inline]
    pub fn advance(&self, delta: Millis) {
        self.current.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ms(&self) -> Millis {
        self.current.load(Ordering::SeqCst)
    }
}

impl fmt::Display for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = self.now_ms();
        write!(f, "{}.{:03}s", now / MILLIS_PER_SEC, now % MILLIS_PER_SEC)
    }
}

/// Parse an ISO-8601 timestamp into milliseconds.
///
/// Accepts RFC 3339 (`2026-01-15T14:45:00Z`, with offset) and the naive form
/// servers often emit without a zone (`2026-01-15T14:45:00.123456`), which is
/// read as UTC.
pub fn parse_timestamp_ms(s: &str) -> Option<Millis> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Format milliseconds since epoch as RFC 3339 (UTC, millisecond precision).
pub fn format_timestamp_ms(ms: Millis) -> String {
    use chrono::TimeZone;
    match chrono::Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => {
            dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        }
        _ => ms.to_string(),
    }
}
