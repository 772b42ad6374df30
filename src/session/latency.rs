//! Rolling history of latency samples

use std::collections::VecDeque;
use std::time::Duration;

/// Most recent `capacity` samples in insertion order, oldest evicted first
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }

    /// Samples in milliseconds, oldest first, ready for charting
    pub fn millis(&self) -> Vec<f64> {
        self.samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LatencyHistory {
    fn default() -> Self {
        Self::new(crate::constants::LATENCY_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = LatencyHistory::new(3);
        for ms in [10, 20, 30, 40] {
            history.record(Duration::from_millis(ms));
        }

        assert_eq!(
            history.to_vec(),
            vec![
                Duration::from_millis(20),
                Duration::from_millis(30),
                Duration::from_millis(40)
            ]
        );
        assert_eq!(history.latest(), Some(Duration::from_millis(40)));
        assert_eq!(history.millis(), vec![20.0, 30.0, 40.0]);
        assert_eq!(history.average(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_clear() {
        let mut history = LatencyHistory::default();
        history.record(Duration::from_millis(5));
        history.clear();

        assert!(history.is_empty());
        assert_eq!(history.latest(), None);
        assert_eq!(history.average(), None);
        assert_eq!(history.capacity(), 20);
    }

    proptest! {
        #[test]
        fn prop_length_is_bounded_and_newest_last(samples in proptest::collection::vec(0u64..10_000, 0..64)) {
            let mut history = LatencyHistory::default();
            for &ms in &samples {
                history.record(Duration::from_millis(ms));
                prop_assert_eq!(history.latest(), Some(Duration::from_millis(ms)));
            }

            prop_assert_eq!(history.len(), samples.len().min(20));

            let tail: Vec<Duration> = samples
                .iter()
                .skip(samples.len().saturating_sub(20))
                .map(|&ms| Duration::from_millis(ms))
                .collect();
            prop_assert_eq!(history.to_vec(), tail);
        }
    }
}
