//! SQLite-backed cache tier
//!
//! Rows live in the `cache_entries` table of a tiercache-db [`Database`].
//! Writes are single-statement upserts; when a row limit is configured the
//! least recently accessed rows are evicted to make room.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tiercache_db::utils::format_bytes;
use tiercache_db::{Database, NewStoredEntry};
use tracing::{debug, info, warn};

use super::sweep::{SweepHandle, spawn_sweep_task};
use crate::cache::{
    BackendType, CacheHit, CacheProvider, CacheStats, CachedValue, StatsRecorder, expiry_after,
};
use crate::config::PersistentSettings;
use crate::error::CacheError;

/// Lightweight storage diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub row_count: u64,
    pub file_size_bytes: u64,
    pub checked_at: DateTime<Utc>,
}

struct PersistentInner {
    db: Database,
    settings: PersistentSettings,
    stats: StatsRecorder,
    health: RwLock<Option<StorageHealth>>,
}

impl PersistentInner {
    async fn refresh_size(&self) -> Result<(), CacheError> {
        let count = self.db.count_entries().await?;
        self.stats.set_size(count.max(0) as u64);
        Ok(())
    }

    /// Size refresh after a committed write; failure only leaves stats stale
    async fn refresh_size_or_warn(&self) {
        if let Err(e) = self.refresh_size().await {
            warn!("Failed to refresh persistent cache size: {}", e);
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<CacheHit>, CacheError> {
        let Some(row) = self.db.get_entry(key).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if row.is_expired_at(now) {
            debug!("Persistent entry expired: {}", key);
            self.db.delete_entry(key).await?;
            self.refresh_size().await?;
            return Ok(None);
        }

        let value = CachedValue::from_stored(&row.value, &row.value_type)?;
        self.db.touch_entry(key, now).await?;
        Ok(Some(CacheHit::new(value, row.expires_at)))
    }

    /// Free a slot for `key` when the row limit has been reached
    async fn make_room(
        &self,
        key: &str,
        max_size: u64,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        self.db.delete_expired(now).await?;
        if self.db.get_entry(key).await?.is_some() {
            return Ok(());
        }

        let count = self.db.count_entries().await?;
        let max_size = i64::try_from(max_size).unwrap_or(i64::MAX);
        if count >= max_size {
            let evicted = self.db.evict_lru(count - max_size + 1).await?;
            debug!("Persistent cache full, evicted {} least recently used rows", evicted);
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        let removed = self.db.delete_expired(Utc::now()).await?;
        self.refresh_size().await?;
        Ok(removed)
    }

    async fn refresh_health(&self) -> Result<StorageHealth, CacheError> {
        let health = StorageHealth {
            row_count: self.db.count_entries().await?.max(0) as u64,
            file_size_bytes: self.db.file_size().await?,
            checked_at: Utc::now(),
        };
        *self.health.write() = Some(health.clone());
        Ok(health)
    }
}

/// Durable cache tier backed by an embedded database
pub struct PersistentProvider {
    inner: Arc<PersistentInner>,
    sweeps: SweepHandle,
}

impl PersistentProvider {
    /// Open the database named by the settings and start the background sweeps
    pub async fn new(settings: PersistentSettings) -> Result<Self, CacheError> {
        let db = match &settings.path {
            Some(path) => Database::open_file(path).await?,
            None => Database::in_memory().await?,
        };
        Self::with_database(db, settings).await
    }

    /// Build a provider over an already opened database
    pub async fn with_database(
        db: Database,
        settings: PersistentSettings,
    ) -> Result<Self, CacheError> {
        if settings.max_size == Some(0) {
            return Err(CacheError::Configuration(
                "persistent max_size must be at least 1".to_string(),
            ));
        }

        info!(
            "Initializing persistent cache (path: {:?}, max_size: {:?})",
            settings.path, settings.max_size
        );

        let cleanup_interval = settings.cleanup_interval;
        let health_interval = settings.health_interval;
        let inner = Arc::new(PersistentInner {
            db,
            settings,
            stats: StatsRecorder::new(),
            health: RwLock::new(None),
        });
        inner.refresh_size().await?;

        let sweeps = SweepHandle::new();
        sweeps.push(spawn_sweep_task(
            Arc::downgrade(&inner),
            "persistent-cleanup",
            cleanup_interval,
            |inner: Arc<PersistentInner>| async move {
                match inner.cleanup().await {
                    Ok(removed) if removed > 0 => {
                        info!("Persistent sweep removed {} expired rows", removed)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Error during persistent cache sweep: {}", e),
                }
            },
        ));
        sweeps.push(spawn_sweep_task(
            Arc::downgrade(&inner),
            "persistent-health",
            health_interval,
            |inner: Arc<PersistentInner>| async move {
                match inner.refresh_health().await {
                    Ok(health) => debug!(
                        "Persistent cache health: {} rows, {}",
                        health.row_count,
                        format_bytes(health.file_size_bytes)
                    ),
                    Err(e) => warn!("Failed to refresh persistent cache health: {}", e),
                }
            },
        ));

        Ok(Self { inner, sweeps })
    }

    /// Last computed health, if the health check has run
    pub fn health(&self) -> Option<StorageHealth> {
        self.inner.health.read().clone()
    }

    /// Recompute storage health now
    pub async fn refresh_health(&self) -> Result<StorageHealth, CacheError> {
        self.inner.refresh_health().await
    }

    /// Most frequently read keys with their access counts
    pub async fn hot_keys(&self, limit: i64) -> Result<Vec<(String, u64)>, CacheError> {
        let rows = self.inner.db.top_accessed_entries(limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.key, row.access_count.max(0) as u64))
            .collect())
    }
}

#[async_trait]
impl CacheProvider for PersistentProvider {
    fn backend_type(&self) -> BackendType {
        BackendType::Persistent
    }

    async fn get(&self, key: &str) -> Option<CacheHit> {
        match self.inner.lookup(key).await {
            Ok(Some(hit)) => {
                self.inner.stats.record_hit();
                Some(hit)
            }
            Ok(None) => {
                self.inner.stats.record_miss();
                None
            }
            Err(e) => {
                warn!("Persistent cache read failed for {}: {}", key, e);
                self.inner.stats.record_miss();
                None
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        let ttl = ttl.or(self.inner.settings.default_ttl);
        let text = value.to_text()?;

        if let Some(max_size) = self.inner.settings.max_size {
            self.inner.make_room(key, max_size, now).await?;
        }

        self.inner
            .db
            .upsert_entry(&NewStoredEntry {
                key: key.to_string(),
                value: text,
                value_type: value.shape().as_str().to_string(),
                created_at: now,
                expires_at: expiry_after(now, ttl),
            })
            .await?;

        self.inner.stats.record_set();
        self.inner.refresh_size_or_warn().await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.db.delete_entry(key).await?;
        self.inner.stats.record_remove();
        self.inner.refresh_size_or_warn().await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let removed = self.inner.db.clear_entries().await?;
        debug!("Cleared {} persistent cache rows", removed);
        self.inner.stats.set_size(0);
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.db.entry_exists(key, Utc::now()).await?)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.cleanup().await?;
        Ok(self.inner.db.live_keys(Utc::now()).await?)
    }

    async fn size(&self) -> Result<usize, CacheError> {
        self.inner.cleanup().await?;
        Ok(self.inner.db.count_entries().await?.max(0) as usize)
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        self.inner.cleanup().await
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    async fn close(&self) {
        self.sweeps.stop();
        self.inner.db.close().await;
    }
}
