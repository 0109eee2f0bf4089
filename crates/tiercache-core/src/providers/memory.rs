//! In-process memory tier
//!
//! A bounded map guarded by a read-write lock. When full, inserting a new
//! key evicts the entry with the oldest `created_at`. This is age-based
//! eviction; reads do not protect an entry from being evicted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::sweep::{SweepHandle, spawn_sweep_task};
use crate::cache::{
    BackendType, CacheEntry, CacheHit, CacheProvider, CacheStats, CachedValue, StatsRecorder,
};
use crate::config::MemorySettings;
use crate::error::CacheError;

struct Slot {
    entry: CacheEntry,
    /// Insertion order, breaks ties between equal `created_at` values
    seq: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    settings: MemorySettings,
    stats: StatsRecorder,
}

impl MemoryInner {
    fn purge_expired(&self, now: DateTime<Utc>) -> u64 {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|_, slot| !slot.entry.is_expired_at(now));
        let removed = (before - state.entries.len()) as u64;
        self.stats.set_size(state.entries.len() as u64);
        removed
    }
}

/// Volatile, bounded cache tier
pub struct MemoryProvider {
    inner: Arc<MemoryInner>,
    sweeps: SweepHandle,
}

impl MemoryProvider {
    pub fn new(settings: MemorySettings) -> Result<Self, CacheError> {
        if settings.max_size == 0 {
            return Err(CacheError::Configuration(
                "memory max_size must be at least 1".to_string(),
            ));
        }

        info!(
            "Initializing memory cache (max_size: {}, default_ttl: {:?})",
            settings.max_size, settings.default_ttl
        );

        let cleanup_interval = settings.cleanup_interval;
        let inner = Arc::new(MemoryInner {
            state: RwLock::new(MemoryState::default()),
            settings,
            stats: StatsRecorder::new(),
        });

        let sweeps = SweepHandle::new();
        sweeps.push(spawn_sweep_task(
            Arc::downgrade(&inner),
            "memory-cleanup",
            cleanup_interval,
            |inner: Arc<MemoryInner>| async move {
                let removed = inner.purge_expired(Utc::now());
                if removed > 0 {
                    debug!("Memory sweep removed {} expired entries", removed);
                }
            },
        ));

        Ok(Self { inner, sweeps })
    }

    /// Entry metadata for a key, expired or not
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner
            .state
            .read()
            .entries
            .get(key)
            .map(|slot| slot.entry.clone())
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        let now = Utc::now();
        let mut state = self.inner.state.write();

        let expired = state
            .entries
            .get(key)
            .map(|slot| slot.entry.is_expired_at(now));

        let hit = match expired {
            Some(false) => state.entries.get_mut(key).map(|slot| {
                slot.entry.touch(now);
                CacheHit::from(&slot.entry)
            }),
            Some(true) => {
                debug!("Memory entry expired: {}", key);
                state.entries.remove(key);
                self.inner.stats.set_size(state.entries.len() as u64);
                None
            }
            None => None,
        };

        if hit.is_some() {
            self.inner.stats.record_hit();
        } else {
            self.inner.stats.record_miss();
        }
        hit
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        let ttl = ttl.or(self.inner.settings.default_ttl);
        let mut state = self.inner.state.write();

        if !state.entries.contains_key(key) && state.entries.len() >= self.inner.settings.max_size
        {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, slot)| (slot.entry.created_at, slot.seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Memory cache full, evicting oldest entry: {}", oldest);
                state.entries.remove(&oldest);
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key.to_string(),
            Slot {
                entry: CacheEntry::new(key, value, now, ttl),
                seq,
            },
        );

        self.inner.stats.set_size(state.entries.len() as u64);
        self.inner.stats.record_set();
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut state = self.inner.state.write();
        state.entries.remove(key);
        self.inner.stats.set_size(state.entries.len() as u64);
        self.inner.stats.record_remove();
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.inner.state.write();
        state.entries.clear();
        self.inner.stats.set_size(0);
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        let now = Utc::now();
        let mut state = self.inner.state.write();
        match state.entries.get(key).map(|slot| slot.entry.is_expired_at(now)) {
            Some(false) => Ok(true),
            Some(true) => {
                state.entries.remove(key);
                self.inner.stats.set_size(state.entries.len() as u64);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.cleanup().await?;
        let mut keys: Vec<String> = self.inner.state.read().entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn size(&self) -> Result<usize, CacheError> {
        self.cleanup().await?;
        Ok(self.inner.state.read().entries.len())
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        Ok(self.inner.purge_expired(Utc::now()))
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    async fn close(&self) {
        self.sweeps.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheProviderExt;

    fn provider(max_size: usize) -> MemoryProvider {
        MemoryProvider::new(MemorySettings {
            max_size,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_and_overwrite() {
        let cache = provider(10);
        cache.set_as("k", &vec![1, 2, 3], None).await.unwrap();
        assert_eq!(cache.get_as::<Vec<u32>>("k").await, Some(vec![1, 2, 3]));

        cache
            .set_as("k", "replaced", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(cache.get_as::<String>("k").await.as_deref(), Some("replaced"));
        assert!(cache.peek("k").unwrap().expires_at.is_some());
        assert_eq!(cache.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evicts_oldest_created() {
        let cache = provider(2);
        for key in ["k1", "k2", "k3"] {
            cache.set_as(key, key, None).await.unwrap();
        }

        assert!(!cache.contains_key("k1").await.unwrap());
        assert!(cache.contains_key("k2").await.unwrap());
        assert!(cache.contains_key("k3").await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["k2", "k3"]);
    }

    #[tokio::test]
    async fn test_reads_do_not_protect_from_eviction() {
        let cache = provider(2);
        cache.set_as("k1", &1, None).await.unwrap();
        cache.set_as("k2", &2, None).await.unwrap();
        assert!(cache.get("k1").await.is_some());

        cache.set_as("k3", &3, None).await.unwrap();
        assert!(cache.peek("k1").is_none());
    }

    #[tokio::test]
    async fn test_overwrite_when_full_does_not_evict() {
        let cache = provider(2);
        cache.set_as("k1", &1, None).await.unwrap();
        cache.set_as("k2", &2, None).await.unwrap();
        cache.set_as("k1", &10, None).await.unwrap();
        assert_eq!(cache.size().await.unwrap(), 2);
        assert_eq!(cache.get_as::<i32>("k1").await, Some(10));
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let cache = provider(10);
        cache
            .set_as("gone", &"v", Some(Duration::ZERO))
            .await
            .unwrap();
        cache.set_as("kept", &"v", None).await.unwrap();

        assert!(cache.peek("gone").is_some());
        assert!(cache.get("gone").await.is_none());
        assert!(cache.peek("gone").is_none());

        cache
            .set_as("gone", &"v", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(cache.keys().await.unwrap(), vec!["kept"]);
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let cache = MemoryProvider::new(MemorySettings {
            default_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        })
        .unwrap();
        cache.set_as("k", &1, None).await.unwrap();
        assert!(cache.peek("k").unwrap().expires_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_track_operations() {
        let cache = provider(10);
        cache.set_as("k", &1, None).await.unwrap();
        cache.get("k").await;
        cache.get("k").await;
        cache.get("missing").await;
        cache.remove("k").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.removes, 1);
        assert_eq!(stats.size, 0);
        assert!(cache.peek("k").is_none());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            MemoryProvider::new(MemorySettings {
                max_size: 0,
                ..Default::default()
            }),
            Err(CacheError::Configuration(_))
        ));
    }
}
