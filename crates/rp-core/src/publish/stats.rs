//! Lock-free replay counters shared between pipeline threads.

use rp_common::ReplayCounters;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ReplayStatistics {
    read_packages: AtomicU64,
    published_packages: AtomicU64,
    published_bytes: AtomicU64,
    publish_failures: AtomicU64,
    current_timestamp: AtomicU64,
    /// `f32` bit pattern of the last measured speed factor.
    speed_factor: AtomicU32,
}

impl ReplayStatistics {
    pub fn new() -> Self {
        ReplayStatistics::default()
    }

    pub fn add_read(&self, count: u64) {
        self.read_packages.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_published(&self, bytes: usize) {
        self.published_packages.fetch_add(1, Ordering::Relaxed);
        self.published_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_current_timestamp(&self, timestamp: u64) {
        self.current_timestamp.store(timestamp, Ordering::Relaxed);
    }

    pub fn current_timestamp(&self) -> u64 {
        self.current_timestamp.load(Ordering::Relaxed)
    }

    pub fn set_speed_factor(&self, factor: f32) {
        self.speed_factor.store(factor.to_bits(), Ordering::Relaxed);
    }

    pub fn speed_factor(&self) -> f32 {
        f32::from_bits(self.speed_factor.load(Ordering::Relaxed))
    }

    pub fn counters(&self) -> ReplayCounters {
        ReplayCounters {
            read_packages: self.read_packages.load(Ordering::Relaxed),
            published_packages: self.published_packages.load(Ordering::Relaxed),
            published_bytes: self.published_bytes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }

    /// Zero everything; used when a recording is opened or closed.
    pub fn reset(&self) {
        for counter in [
            &self.read_packages,
            &self.published_packages,
            &self.published_bytes,
            &self.publish_failures,
            &self.current_timestamp,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.speed_factor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = ReplayStatistics::new();
        stats.add_read(3);
        stats.record_published(10);
        stats.record_published(5);
        stats.record_failure();
        stats.set_speed_factor(2.5);
        stats.set_current_timestamp(42);

        let c = stats.counters();
        assert_eq!(
            (c.read_packages, c.published_packages, c.published_bytes, c.publish_failures),
            (3, 2, 15, 1)
        );
        assert_eq!(stats.speed_factor(), 2.5);
        assert_eq!(stats.current_timestamp(), 42);

        stats.reset();
        assert_eq!(stats.counters(), ReplayCounters::default());
        assert_eq!(stats.speed_factor(), 0.0);
    }
}
