//! Pending-request correlation table.
//!
//! Every accepted send is parked here until its echo arrives or it ages out.
//! Two indexes:
//! - `by_text`: the most recent send of each exact message text (last writer
//!   wins, so an untagged reply always pairs with the newest matching send)
//! - `by_id`: every send carrying a correlation id
//!
//! A tagged send is reachable through both indexes; consuming it through
//! either removes it from both, so it is matched at most once.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::clock::{millis_from_u64, Millis};
use crate::config::ClockSkewPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub message: String,
    pub sent_at: Millis,
    pub correlation_id: Option<String>,
}

#[derive(Debug)]
pub struct PendingTable {
    by_text: HashMap<String, PendingSend>,
    by_id: HashMap<String, PendingSend>,
    skew_policy: ClockSkewPolicy,
}

impl PendingTable {
    pub fn new(skew_policy: ClockSkewPolicy) -> Self {
        Self {
            by_text: HashMap::with_capacity(64),
            by_id: HashMap::with_capacity(64),
            skew_policy,
        }
    }

    /// Record an untagged send. Overwrites a pending send with identical text.
    pub fn record_send(&mut self, message: &str, now: Millis) {
        self.insert_text(PendingSend {
            message: message.to_string(),
            sent_at: now,
            correlation_id: None,
        });
    }

    /// Record a send carrying an opaque correlation id.
    pub fn record_tagged_send(&mut self, message: &str, correlation_id: &str, now: Millis) {
        let send = PendingSend {
            message: message.to_string(),
            sent_at: now,
            correlation_id: Some(correlation_id.to_string()),
        };
        self.by_id.insert(correlation_id.to_string(), send.clone());
        self.insert_text(send);
    }

    /// Match a reply by text. Returns the round-trip latency, or `None` if no
    /// local send is pending for this text (e.g. a broadcast from another
    /// client) or the latency was discarded for clock skew.
    pub fn try_consume(&mut self, message: &str, now: Millis) -> Option<u64> {
        let send = self.by_text.remove(message)?;
        if let Some(id) = &send.correlation_id {
            self.by_id.remove(id);
        }
        self.latency(&send, now)
    }

    /// Match a reply by its echoed correlation id.
    pub fn try_consume_tagged(&mut self, correlation_id: &str, now: Millis) -> Option<u64> {
        let send = self.by_id.remove(correlation_id)?;
        let text_points_here = self
            .by_text
            .get(&send.message)
            .is_some_and(|p| p.correlation_id.as_deref() == Some(correlation_id));
        if text_points_here {
            self.by_text.remove(&send.message);
        }
        self.latency(&send, now)
    }

    /// Withdraw a send that never reached the wire. Returns `false` when it
    /// was already consumed or evicted.
    pub fn remove_send(&mut self, message: &str, correlation_id: Option<&str>) -> bool {
        match correlation_id {
            Some(id) => {
                if self.by_id.remove(id).is_none() {
                    return false;
                }
                let text_points_here = self
                    .by_text
                    .get(message)
                    .is_some_and(|p| p.correlation_id.as_deref() == Some(id));
                if text_points_here {
                    self.by_text.remove(message);
                }
                true
            }
            None => {
                let untagged = self
                    .by_text
                    .get(message)
                    .is_some_and(|p| p.correlation_id.is_none());
                untagged && self.by_text.remove(message).is_some()
            }
        }
    }

    /// Drop sends older than `max_age_ms`, replied or not. Returns how many
    /// distinct sends were evicted.
    pub fn evict_stale(&mut self, now: Millis, max_age_ms: u64) -> usize {
        let before = self.len();
        let max_age = millis_from_u64(max_age_ms);
        self.by_text.retain(|_, p| now.saturating_sub(p.sent_at) <= max_age);
        self.by_id.retain(|_, p| now.saturating_sub(p.sent_at) <= max_age);
        let evicted = before - self.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.len(), "Evicted stale pending sends");
        }
        evicted
    }

    /// Number of distinct pending sends.
    pub fn len(&self) -> usize {
        let untagged = self
            .by_text
            .values()
            .filter(|p| p.correlation_id.is_none())
            .count();
        self.by_id.len() + untagged
    }

    pub fn is_empty(&self) -> bool {
        self.by_text.is_empty() && self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_text.clear();
        self.by_id.clear();
    }

    fn insert_text(&mut self, send: PendingSend) {
        if let Some(prev) = self.by_text.insert(send.message.clone(), send) {
            debug!(
                text = %prev.message,
                previous_sent_at = prev.sent_at,
                "Duplicate pending text; newest send wins"
            );
        }
    }

    fn latency(&self, send: &PendingSend, now: Millis) -> Option<u64> {
        let raw = now.saturating_sub(send.sent_at);
        if raw >= 0 {
            return Some(raw as u64);
        }
        match self.skew_policy {
            ClockSkewPolicy::Discard => {
                warn!(raw_ms = raw, text = %send.message, "Reply precedes send; latency discarded");
                None
            }
            ClockSkewPolicy::ClampToZero => {
                warn!(raw_ms = raw, text = %send.message, "Reply precedes send; latency clamped to 0");
                Some(0)
            }
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new(ClockSkewPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_once() {
        let mut table = PendingTable::default();
        table.record_send("ping", 1_000);
        assert_eq!(table.try_consume("ping", 1_150), Some(150));
        assert_eq!(table.try_consume("ping", 1_200), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_message_is_not_a_reply() {
        let mut table = PendingTable::default();
        table.record_send("ping", 1_000);
        assert_eq!(table.try_consume("someone else", 1_100), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_text_newest_wins() {
        let mut table = PendingTable::default();
        table.record_send("ping", 1_000);
        table.record_send("ping", 1_400);
        assert_eq!(table.len(), 1);
        assert_eq!(table.try_consume("ping", 1_500), Some(100));
        assert_eq!(table.try_consume("ping", 1_600), None);
    }

    #[test]
    fn test_evict_stale_then_consume_misses() {
        let mut table = PendingTable::default();
        table.record_send("old", 0);
        table.record_send("fresh", 9_000);

        assert_eq!(table.evict_stale(10_001, 10_000), 1);
        assert_eq!(table.try_consume("old", 10_002), None);
        assert_eq!(table.try_consume("fresh", 10_002), Some(1_002));
    }

    #[test]
    fn test_evict_keeps_entry_at_exact_max_age() {
        let mut table = PendingTable::default();
        table.record_send("edge", 0);
        assert_eq!(table.evict_stale(10_000, 10_000), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_tagged_identical_texts_both_match() {
        let mut table = PendingTable::default();
        table.record_tagged_send("ping", "a", 1_000);
        table.record_tagged_send("ping", "b", 1_100);
        assert_eq!(table.len(), 2);

        assert_eq!(table.try_consume_tagged("a", 1_300), Some(300));
        assert_eq!(table.try_consume_tagged("b", 1_300), Some(200));
        assert_eq!(table.try_consume_tagged("a", 1_400), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_tagged_send_falls_back_to_text() {
        let mut table = PendingTable::default();
        table.record_tagged_send("ping", "a", 1_000);

        // Server did not echo the id.
        assert_eq!(table.try_consume("ping", 1_050), Some(50));
        // Consumed through the text index, so the id is gone too.
        assert_eq!(table.try_consume_tagged("a", 1_060), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_consume_by_id_keeps_newer_text_entry() {
        let mut table = PendingTable::default();
        table.record_tagged_send("ping", "a", 1_000);
        table.record_tagged_send("ping", "b", 1_100);

        assert_eq!(table.try_consume_tagged("a", 1_200), Some(200));
        // Text index still points at "b".
        assert_eq!(table.try_consume("ping", 1_250), Some(150));
        assert_eq!(table.try_consume_tagged("b", 1_300), None);
    }

    #[test]
    fn test_clock_skew_discard() {
        let mut table = PendingTable::new(ClockSkewPolicy::Discard);
        table.record_send("ping", 2_000);
        assert_eq!(table.try_consume("ping", 1_990), None);
        // Consumed anyway.
        assert!(table.is_empty());
    }

    #[test]
    fn test_clock_skew_clamp() {
        let mut table = PendingTable::new(ClockSkewPolicy::ClampToZero);
        table.record_tagged_send("ping", "a", 2_000);
        assert_eq!(table.try_consume_tagged("a", 1_990), Some(0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_huge_max_age_keeps_entries() {
        let mut table = PendingTable::default();
        table.record_send("ping", 1_000);
        assert_eq!(table.evict_stale(5_000, u64::MAX), 0);
        assert_eq!(table.try_consume("ping", 5_000), Some(4_000));
    }

    #[test]
    fn test_remove_send_withdraws_both_indexes() {
        let mut table = PendingTable::default();
        table.record_tagged_send("ping", "a", 1_000);
        table.record_send("pong", 1_000);

        assert!(table.remove_send("ping", Some("a")));
        assert!(!table.remove_send("ping", Some("a")));
        assert_eq!(table.try_consume("ping", 1_100), None);

        assert!(table.remove_send("pong", None));
        assert!(table.is_empty());
    }

    #[test]
    fn test_evict_tagged_removes_both_indexes() {
        let mut table = PendingTable::default();
        table.record_tagged_send("ping", "a", 0);
        assert_eq!(table.evict_stale(20_000, 10_000), 1);
        assert!(table.is_empty());
        assert_eq!(table.try_consume("ping", 20_001), None);
    }
}
