//! Bounded event store.
//!
//! Time-ordered (by receipt) sliding window of received events. Overflow
//! evicts from the head; appends are never rejected.

use std::collections::VecDeque;

use serde::Serialize;

use crate::clock::Millis;

/// One received message, enriched at receipt. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Display ordering only; never used for correlation.
    pub sequence_id: u64,
    pub message: String,
    /// Timestamp text as sent by the server.
    pub source_timestamp: String,
    /// `source_timestamp` parsed to ms, when it parses.
    pub source_time_ms: Option<Millis>,
    pub received_at: Millis,
    pub latency_ms: Option<u64>,
}

/// Everything about a receipt except the sequence id the store assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message: String,
    pub source_timestamp: String,
    pub source_time_ms: Option<Millis>,
    pub received_at: Millis,
    pub latency_ms: Option<u64>,
}

#[derive(Debug)]
pub struct EventStore {
    events: VecDeque<Event>,
    max_events: usize,
    last_sequence_id: u64,
}

impl EventStore {
    pub fn new(max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
            last_sequence_id: 0,
        }
    }

    /// Assign the next sequence id, append, and trim the head.
    pub fn append(&mut self, receipt: Receipt) -> Event {
        self.last_sequence_id += 1;
        let event = Event {
            sequence_id: self.last_sequence_id,
            message: receipt.message,
            source_timestamp: receipt.source_timestamp,
            source_time_ms: receipt.source_time_ms,
            received_at: receipt.received_at,
            latency_ms: receipt.latency_ms,
        };
        self.events.push_back(event.clone());

        while self.events.len() > self.max_events {
            self.events.pop_front();
        }

        event
    }

    /// Empty the store and restart sequence ids.
    pub fn clear(&mut self) {
        self.events.clear();
        self.last_sequence_id = 0;
    }

    /// Events received strictly after `threshold`. Lazy, and `Clone` so the
    /// same query can be walked again without touching the store.
    pub fn recent_since(&self, threshold: Millis) -> impl Iterator<Item = &Event> + Clone + '_ {
        self.events
            .iter()
            .filter(move |e| e.received_at > threshold)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + Clone + '_ {
        self.events.iter()
    }

    pub fn latest(&self) -> Option<&Event> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(message: &str, received_at: Millis) -> Receipt {
        Receipt {
            message: message.to_string(),
            source_timestamp: "2026-01-15T14:45:00".to_string(),
            source_time_ms: None,
            received_at,
            latency_ms: None,
        }
    }

    #[test]
    fn test_sequence_ids_start_at_one_and_increase() {
        let mut store = EventStore::new(10);
        assert_eq!(store.append(receipt("a", 1)).sequence_id, 1);
        assert_eq!(store.append(receipt("b", 2)).sequence_id, 2);
        assert_eq!(store.latest().unwrap().message, "b");
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let mut store = EventStore::new(3);
        for i in 0..10 {
            store.append(receipt(&format!("m{i}"), i));
            assert!(store.len() <= 3);
        }
        let kept: Vec<&str> = store.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(kept, vec!["m7", "m8", "m9"]);
        // Ids keep increasing across evictions.
        assert_eq!(store.latest().unwrap().sequence_id, 10);
    }

    #[test]
    fn test_clear_resets_sequence() {
        let mut store = EventStore::new(5);
        store.append(receipt("a", 1));
        store.append(receipt("b", 2));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.last_sequence_id(), 0);
        assert_eq!(store.append(receipt("c", 3)).sequence_id, 1);
    }

    #[test]
    fn test_recent_since_is_strict_and_restartable() {
        let mut store = EventStore::new(10);
        for t in [100, 200, 300, 400] {
            store.append(receipt("x", t));
        }

        let recent = store.recent_since(200);
        assert_eq!(recent.clone().count(), 2);
        let times: Vec<Millis> = recent.map(|e| e.received_at).collect();
        assert_eq!(times, vec![300, 400]);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut store = EventStore::new(0);
        store.append(receipt("a", 1));
        store.append(receipt("b", 2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.capacity(), 1);
    }
}
