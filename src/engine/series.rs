//! Latency time series for the chart.

use std::collections::VecDeque;

use serde::Serialize;

use crate::clock::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySample {
    pub timestamp: Millis,
    pub latency_ms: u64,
}

/// Bounded, oldest-first sequence of latency samples.
#[derive(Debug)]
pub struct LatencySeries {
    samples: VecDeque<LatencySample>,
    max_points: usize,
}

impl LatencySeries {
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            samples: VecDeque::with_capacity(max_points),
            max_points,
        }
    }

    pub fn append(&mut self, timestamp: Millis, latency_ms: u64) -> LatencySample {
        let sample = LatencySample {
            timestamp,
            latency_ms,
        };
        self.samples.push_back(sample);
        while self.samples.len() > self.max_points {
            self.samples.pop_front();
        }
        sample
    }

    /// Independent copy, oldest to newest. Later appends never show up in a
    /// snapshot already handed out.
    pub fn snapshot(&self) -> Vec<LatencySample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<LatencySample> {
        self.samples.back().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_oldest_evicted() {
        let mut series = LatencySeries::new(50);
        for i in 0..60 {
            series.append(i, i as u64 * 10);
        }
        assert_eq!(series.len(), 50);
        let snap = series.snapshot();
        assert_eq!(snap.first().unwrap().timestamp, 10);
        assert_eq!(snap.last().unwrap().timestamp, 59);
        assert!(snap.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut series = LatencySeries::new(5);
        series.append(1_150, 150);
        let snap = series.snapshot();

        series.append(1_300, 20);
        series.clear();

        assert_eq!(snap, vec![LatencySample { timestamp: 1_150, latency_ms: 150 }]);
        assert!(series.is_empty());
    }
}
