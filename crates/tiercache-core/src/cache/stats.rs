//! Cache statistics

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Snapshot of a provider's counters, or an aggregate of several
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub removes: u64,
    /// Live entry count as last observed by the provider
    pub size: u64,
    pub last_access: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// `hits / (hits + misses)`, zero before any lookup
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Sum counters and keep the most recent access
    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.sets += other.sets;
        self.removes += other.removes;
        self.size += other.size;
        self.last_access = self.last_access.max(other.last_access);
    }

    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> CacheStats {
        stats.into_iter().fold(CacheStats::default(), |mut acc, s| {
            acc.merge(s);
            acc
        })
    }
}

/// Lock-free counters owned by a provider
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    size: AtomicU64,
    /// Milliseconds since the epoch, 0 when never accessed
    last_access_ms: AtomicI64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
    }

    fn touch(&self) {
        self.last_access_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let last_access_ms = self.last_access_ms.load(Ordering::Relaxed);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            last_access: (last_access_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_access_ms).single())
                .flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);

        let recorder = StatsRecorder::new();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();

        let stats = recorder.snapshot();
        assert_eq!(stats.hits + stats.misses, 4);
        assert_eq!(stats.hit_ratio(), 0.75);
        assert!(stats.last_access.is_some());
    }

    #[test]
    fn test_aggregate_sums_and_takes_latest_access() {
        let early = Utc.timestamp_millis_opt(1_000).unwrap();
        let late = Utc.timestamp_millis_opt(2_000).unwrap();
        let a = CacheStats {
            hits: 1,
            misses: 2,
            sets: 3,
            removes: 0,
            size: 5,
            last_access: Some(late),
        };
        let b = CacheStats {
            hits: 10,
            misses: 0,
            sets: 1,
            removes: 4,
            size: 1,
            last_access: Some(early),
        };
        let c = CacheStats::default();

        let total = CacheStats::aggregate([&a, &b, &c]);
        assert_eq!(total.hits, 11);
        assert_eq!(total.misses, 2);
        assert_eq!(total.sets, 4);
        assert_eq!(total.removes, 4);
        assert_eq!(total.size, 6);
        assert_eq!(total.last_access, Some(late));
        assert!((0.0..=1.0).contains(&total.hit_ratio()));
    }
}
