//! Derived statistics.
//!
//! Everything here is recomputed from the event store on each call. Nothing
//! is cached, so a metric can never drift from the events it describes.

use serde::Serialize;

use super::store::EventStore;
use crate::clock::{millis_from_u64, Millis, MILLIS_PER_SEC};

/// Point-in-time dashboard metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub total_events: usize,
    pub events_per_minute: usize,
    /// Rounded to the nearest ms. 0 when no event carries a latency.
    pub average_latency: u64,
    pub min_latency: u64,
    pub max_latency: u64,
    /// Events in the store that carry a latency.
    pub matched_events: usize,
    pub connection_uptime: u64,
    pub last_event_time: Option<Millis>,
}

impl Metrics {
    pub fn uptime_display(&self) -> String {
        format_uptime(self.connection_uptime)
    }
}

/// Compute metrics from the store at `now`.
///
/// `connected_at` is the start of the current uptime window (`None` if the
/// connection never opened). `rate_window_ms` is the trailing window used for
/// `events_per_minute`.
pub fn compute_metrics(
    store: &EventStore,
    connected_at: Option<Millis>,
    now: Millis,
    rate_window_ms: u64,
) -> Metrics {
    let threshold = now.saturating_sub(millis_from_u64(rate_window_ms));
    let events_per_minute = store.recent_since(threshold).count();

    let mut count = 0u64;
    let mut sum = 0u64;
    let mut min = u64::MAX;
    let mut max = 0u64;
    for latency in store.iter().filter_map(|e| e.latency_ms) {
        count += 1;
        sum = sum.saturating_add(latency);
        min = min.min(latency);
        max = max.max(latency);
    }

    let (average_latency, min_latency, max_latency) = if count > 0 {
        ((sum as f64 / count as f64).round() as u64, min, max)
    } else {
        (0, 0, 0)
    };

    Metrics {
        total_events: store.len(),
        events_per_minute,
        average_latency,
        min_latency,
        max_latency,
        matched_events: count as usize,
        connection_uptime: connected_at
            .map_or(0, |start| now.saturating_sub(start).max(0) as u64),
        last_event_time: store.latest().map(|e| e.received_at),
    }
}

/// Format a duration in ms as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_uptime(ms: u64) -> String {
    let seconds = ms / MILLIS_PER_SEC as u64;
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
