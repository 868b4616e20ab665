use std::collections::VecDeque;

use crate::ping::prober::ProbeResult;

pub const DEFAULT_HISTORY_LEN: usize = 60;

/// Bounded window of the most recent probe results, oldest first.
#[derive(Debug, Clone)]
pub struct ProbeHistory {
    window: VecDeque<ProbeResult>,
    capacity: usize,
    total: u64,
    failures: u64,
}

impl Default for ProbeHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl ProbeHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
            failures: 0,
        }
    }

    pub fn record(&mut self, result: ProbeResult) {
        self.total += 1;
        if !result.success {
            self.failures += 1;
        }
        if self.window.len() == self.capacity {
            let _ = self.window.pop_front();
        }
        self.window.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeResult> {
        self.window.iter()
    }

    pub fn latest(&self) -> Option<&ProbeResult> {
        self.window.back()
    }

    /// Probes recorded since creation, including those evicted.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn loss_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.total as f64
    }

    fn latencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().filter_map(|result| result.latency_ms)
    }

    pub fn min_latency_ms(&self) -> Option<f64> {
        self.latencies().reduce(f64::min)
    }

    pub fn max_latency_ms(&self) -> Option<f64> {
        self.latencies().reduce(f64::max)
    }

    /// Mean latency over successful probes still in the window.
    pub fn average_latency_ms(&self) -> Option<f64> {
        let (sum, count) = self
            .latencies()
            .fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let now = Local::now();
        let mut history = ProbeHistory::new(3);
        for latency in [10.0, 20.0, 30.0, 40.0] {
            history.record(ProbeResult::reachable(latency, now));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.total(), 4);
        assert_eq!(history.min_latency_ms(), Some(20.0));
        assert_eq!(history.max_latency_ms(), Some(40.0));
        assert_eq!(history.average_latency_ms(), Some(30.0));
        assert_eq!(history.latest().and_then(|r| r.latency_ms), Some(40.0));
    }

    #[test]
    fn failures_count_toward_loss_but_not_latency() {
        let now = Local::now();
        let mut history = ProbeHistory::default();
        assert_eq!(history.loss_percent(), 0.0);
        assert_eq!(history.average_latency_ms(), None);

        history.record(ProbeResult::reachable(5.0, now));
        history.record(ProbeResult::unreachable(now));
        history.record(ProbeResult::unreachable(now));
        history.record(ProbeResult::reachable(15.0, now));
        assert_eq!(history.failures(), 2);
        assert_eq!(history.loss_percent(), 50.0);
        assert_eq!(history.average_latency_ms(), Some(10.0));
        assert_eq!(history.iter().filter(|r| !r.success).count(), 2);
    }
}
