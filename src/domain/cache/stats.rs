//! Cache counters and timing statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time copy of a facade's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub added: u64,
    pub deleted: u64,
    pub updated: u64,
    pub cleared: u64,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;

        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    added: AtomicU64,
    deleted: AtomicU64,
    updated: AtomicU64,
    cleared: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn added(&self, count: u64) {
        self.added.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn deleted(&self, count: u64) {
        self.deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cleared(&self) {
        self.cleared.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

/// Duration statistics over repeated executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingStats {
    pub runs: u64,
    pub last: Duration,
    pub total: Duration,
    pub average: Duration,
    pub longest: Duration,
    /// `Duration::MAX` until the first run
    pub shortest: Duration,
}

impl Default for TimingStats {
    fn default() -> Self {
        Self {
            runs: 0,
            last: Duration::ZERO,
            total: Duration::ZERO,
            average: Duration::ZERO,
            longest: Duration::ZERO,
            shortest: Duration::MAX,
        }
    }
}

impl TimingStats {
    pub fn record(&mut self, elapsed: Duration) {
        self.runs += 1;
        self.last = elapsed;
        self.total = self.total.saturating_add(elapsed);
        self.average = self.total / self.runs.min(u32::MAX as u64) as u32;
        self.longest = self.longest.max(elapsed);
        self.shortest = self.shortest.min(elapsed);
    }

    /// Shortest run, `None` before anything was recorded
    pub fn shortest(&self) -> Option<Duration> {
        (self.runs > 0).then_some(self.shortest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let counters = CacheCounters::default();
        assert_eq!(counters.snapshot().hit_ratio(), 0.0);

        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio(), 0.75);
    }

    #[test]
    fn test_timing_first_run_sets_shortest() {
        let mut timing = TimingStats::default();
        assert_eq!(timing.shortest(), None);

        timing.record(Duration::from_millis(30));
        assert_eq!(timing.shortest(), Some(Duration::from_millis(30)));
        assert_eq!(timing.longest, Duration::from_millis(30));
    }

    #[test]
    fn test_timing_aggregates() {
        let mut timing = TimingStats::default();
        timing.record(Duration::from_millis(10));
        timing.record(Duration::from_millis(50));
        timing.record(Duration::from_millis(30));

        assert_eq!(timing.runs, 3);
        assert_eq!(timing.last, Duration::from_millis(30));
        assert_eq!(timing.total, Duration::from_millis(90));
        assert_eq!(timing.average, Duration::from_millis(30));
        assert_eq!(timing.longest, Duration::from_millis(50));
        assert_eq!(timing.shortest, Duration::from_millis(10));
    }
}
