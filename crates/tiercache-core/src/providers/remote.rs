//! Object storage cache tier
//!
//! Object stores have no per-object TTL, so each key may carry a sidecar
//! metadata object:
//!
//! - `<prefix>/<key>` holds the JSON payload
//! - `<prefix>/meta_<key>` holds `{"expiration": ..., "createdAt": ...}`
//!
//! A key without a metadata object never expires. Every storage call is
//! bounded by the configured operation timeout.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tiercache_storage::{ObjectStorage, StorageBackend, StorageError, join_path};
use tracing::{debug, info, warn};

use super::sweep::{SweepHandle, spawn_sweep_task};
use crate::cache::{
    BackendType, CacheHit, CacheProvider, CacheStats, CachedValue, StatsRecorder, expiry_after,
    is_expired,
};
use crate::config::{RemoteSettings, RemoteStorage};
use crate::error::CacheError;

/// Name prefix of the sidecar metadata objects
pub const META_PREFIX: &str = "meta_";

/// Contents of a metadata object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub expiration: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.contains('/') {
        return Err(CacheError::InvalidKey(format!(
            "'{}' is not a valid object name",
            key
        )));
    }
    if key.starts_with(META_PREFIX) {
        return Err(CacheError::InvalidKey(format!(
            "'{}' collides with the metadata namespace",
            key
        )));
    }
    Ok(())
}

fn not_found(e: &CacheError) -> bool {
    matches!(e, CacheError::Storage(e) if e.is_not_found())
}

struct RemoteInner {
    storage: Arc<dyn StorageBackend>,
    settings: RemoteSettings,
    stats: StatsRecorder,
}

impl RemoteInner {
    fn value_path(&self, key: &str) -> String {
        join_path(&self.settings.prefix, key)
    }

    fn meta_path(&self, key: &str) -> String {
        join_path(&self.settings.prefix, &format!("{}{}", META_PREFIX, key))
    }

    /// Object name relative to the prefix
    fn object_name<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.settings.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Some(path)
        } else {
            path.strip_prefix(prefix)?.strip_prefix('/')
        }
    }

    async fn timed<T>(
        &self,
        op: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, CacheError> {
        let limit = self.settings.operation_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StorageError::Timeout(limit).into()),
        }
    }

    async fn read_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, CacheError> {
        match self.timed(self.storage.read(&self.meta_path(key))).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sidecar first, so the value is never readable without its expiry
    async fn write_pair(
        &self,
        key: &str,
        meta: Option<Vec<u8>>,
        text: String,
    ) -> Result<(), CacheError> {
        match meta {
            Some(meta) => {
                self.timed(self.storage.write(&self.meta_path(key), Bytes::from(meta))).await?;
            }
            // An overwrite without TTL must not inherit the old expiry
            None => {
                self.timed(self.storage.delete(&self.meta_path(key))).await?;
            }
        }
        self.timed(self.storage.write(&self.value_path(key), Bytes::from(text))).await
    }

    async fn delete_pair(&self, key: &str) -> Result<(), CacheError> {
        self.timed(self.storage.delete(&self.value_path(key))).await?;
        self.timed(self.storage.delete(&self.meta_path(key))).await?;
        Ok(())
    }

    /// Expiry of a live key, deleting it if it has expired.
    ///
    /// `Ok(None)` means the key is absent or expired.
    async fn live_expiry(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Option<DateTime<Utc>>>, CacheError> {
        let expires_at = self.read_metadata(key).await?.map(|meta| meta.expiration);
        if is_expired(expires_at, now) {
            debug!("Remote entry expired: {}", key);
            self.delete_pair(key).await?;
            return Ok(None);
        }
        Ok(Some(expires_at))
    }

    async fn lookup(&self, key: &str) -> Result<Option<CacheHit>, CacheError> {
        validate_key(key)?;
        let Some(expires_at) = self.live_expiry(key, Utc::now()).await? else {
            return Ok(None);
        };

        let bytes = match self.timed(self.storage.read(&self.value_path(key))).await {
            Ok(bytes) => bytes,
            Err(e) if not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let payload: serde_json::Value = serde_json::from_slice(&bytes)?;
        Ok(Some(CacheHit::new(CachedValue::from_json(payload), expires_at)))
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        let now = Utc::now();
        let paths = self.timed(self.storage.list(&self.settings.prefix)).await?;

        let mut values = 0u64;
        let mut doomed = Vec::new();
        for path in &paths {
            let Some(name) = self.object_name(path) else {
                continue;
            };
            let Some(key) = name.strip_prefix(META_PREFIX) else {
                values += 1;
                continue;
            };

            match self.read_metadata(key).await {
                Ok(Some(meta)) if is_expired(Some(meta.expiration), now) => {
                    doomed.push(self.value_path(key));
                    doomed.push(path.clone());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable metadata for {}: {}", key, e),
            }
        }

        let expired = (doomed.len() / 2) as u64;
        if !doomed.is_empty() {
            self.timed(self.storage.delete_many(doomed)).await?;
        }
        self.stats.set_size(values.saturating_sub(expired));
        Ok(expired)
    }

    async fn live_keys(&self) -> Result<Vec<String>, CacheError> {
        self.cleanup().await?;
        let paths = self.timed(self.storage.list(&self.settings.prefix)).await?;

        let mut keys: Vec<String> = paths
            .iter()
            .filter_map(|path| self.object_name(path))
            .filter(|name| !name.starts_with(META_PREFIX))
            .map(str::to_string)
            .collect();
        keys.sort();
        self.stats.set_size(keys.len() as u64);
        Ok(keys)
    }
}

/// Cache tier over an object store, with TTL emulated by metadata objects
pub struct RemoteObjectProvider {
    inner: Arc<RemoteInner>,
    sweeps: SweepHandle,
}

impl RemoteObjectProvider {
    /// Connect to the storage named by the settings
    pub async fn new(settings: RemoteSettings) -> Result<Self, CacheError> {
        let storage: Arc<dyn StorageBackend> = match &settings.storage {
            RemoteStorage::InMemory => Arc::new(ObjectStorage::in_memory()),
            RemoteStorage::Local { path } => Arc::new(ObjectStorage::local(path).await?),
            RemoteStorage::S3(config) => Arc::new(ObjectStorage::s3(config.clone())?),
        };
        Ok(Self::with_storage(storage, settings))
    }

    /// Build a provider over an existing storage backend
    pub fn with_storage(storage: Arc<dyn StorageBackend>, settings: RemoteSettings) -> Self {
        info!(
            "Initializing remote cache at {} (prefix: '{}', timeout: {:?})",
            storage.describe(),
            settings.prefix,
            settings.operation_timeout
        );

        let cleanup_interval = settings.cleanup_interval;
        let inner = Arc::new(RemoteInner {
            storage,
            settings,
            stats: StatsRecorder::new(),
        });

        let sweeps = SweepHandle::new();
        sweeps.push(spawn_sweep_task(
            Arc::downgrade(&inner),
            "remote-cleanup",
            cleanup_interval,
            |inner: Arc<RemoteInner>| async move {
                match inner.cleanup().await {
                    Ok(removed) if removed > 0 => {
                        info!("Remote sweep removed {} expired objects", removed)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Error during remote cache sweep: {}", e),
                }
            },
        ));

        Self { inner, sweeps }
    }
}

#[async_trait]
impl CacheProvider for RemoteObjectProvider {
    fn backend_type(&self) -> BackendType {
        BackendType::Remote
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
                warn!("Remote cache read failed for {}: {}", key, e);
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
        validate_key(key)?;
        let inner = &self.inner;
        let now = Utc::now();
        let ttl = ttl.or(inner.settings.default_ttl);
        let text = value.to_text()?;

        let meta = match expiry_after(now, ttl) {
            Some(expiration) => Some(serde_json::to_vec(&ObjectMetadata {
                expiration,
                created_at: now,
            })?),
            None => None,
        };

        if let Err(e) = inner.write_pair(key, meta, text).await {
            // A half-written pair is dropped rather than served
            if let Err(cleanup) = inner.delete_pair(key).await {
                warn!("Failed to drop partial remote entry {}: {}", key, cleanup);
            }
            return Err(e);
        }

        inner.stats.record_set();
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.stats.record_remove();
        if validate_key(key).is_err() {
            return Ok(());
        }
        self.inner.delete_pair(key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let inner = &self.inner;
        let paths = inner.timed(inner.storage.list(&inner.settings.prefix)).await?;
        let removed = inner.timed(inner.storage.delete_many(paths)).await?;
        debug!("Cleared {} remote cache objects", removed);
        inner.stats.set_size(0);
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> Result<bool, CacheError> {
        if validate_key(key).is_err() {
            return Ok(false);
        }
        let inner = &self.inner;
        if inner.live_expiry(key, Utc::now()).await?.is_none() {
            return Ok(false);
        }
        inner.timed(inner.storage.exists(&inner.value_path(key))).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.live_keys().await
    }

    async fn size(&self) -> Result<usize, CacheError> {
        Ok(self.inner.live_keys().await?.len())
    }

    async fn cleanup(&self) -> Result<u64, CacheError> {
        self.inner.cleanup().await
    }

    /// `size` is the count seen by the last enumeration
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
    use serde_json::json;

    fn provider() -> (Arc<ObjectStorage>, RemoteObjectProvider) {
        let storage = Arc::new(ObjectStorage::in_memory());
        let cache = RemoteObjectProvider::with_storage(storage.clone(), RemoteSettings::default());
        (storage, cache)
    }

    #[tokio::test]
    async fn test_metadata_written_only_with_ttl() {
        let (storage, cache) = provider();

        cache.set_as("plain", &json!({"a": 1}), None).await.unwrap();
        cache
            .set_as("timed", &"v", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let mut objects = storage.list("cache").await.unwrap();
        objects.sort();
        assert_eq!(objects, vec!["cache/meta_timed", "cache/plain", "cache/timed"]);

        let meta: ObjectMetadata =
            serde_json::from_slice(&storage.read("cache/meta_timed").await.unwrap()).unwrap();
        assert!(meta.expiration > meta.created_at);

        let raw = storage.read("cache/meta_timed").await.unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(raw.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_round_trip_and_overwrite_drops_ttl() {
        let (storage, cache) = provider();
        cache
            .set_as("k", &vec!["x", "y"], Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let hit = cache.get("k").await.unwrap();
        assert!(hit.expires_at.is_some());
        assert_eq!(hit.value.decode::<Vec<String>>().unwrap(), vec!["x", "y"]);

        cache.set_as("k", &"plain", None).await.unwrap();
        assert!(!storage.exists("cache/meta_k").await.unwrap());
        assert!(cache.get("k").await.unwrap().expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_pair_deleted_on_read() {
        let (storage, cache) = provider();
        cache
            .set_as("k", &1, Some(Duration::ZERO))
            .await
            .unwrap();

        assert!(cache.get("k").await.is_none());
        assert!(storage.list("cache").await.unwrap().is_empty());
        assert!(!cache.contains_key("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_pairs() {
        let (storage, cache) = provider();
        cache.set_as("keep", &1, None).await.unwrap();
        cache
            .set_as("later", &1, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        cache
            .set_as("gone", &1, Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(cache.cleanup().await.unwrap(), 1);
        assert!(!storage.exists("cache/gone").await.unwrap());
        assert!(!storage.exists("cache/meta_gone").await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["keep", "later"]);
        assert_eq!(cache.stats().size, 2);
    }

    #[tokio::test]
    async fn test_clear_only_touches_prefix() {
        let (storage, cache) = provider();
        storage
            .write("elsewhere/x", Bytes::from_static(b"1"))
            .await
            .unwrap();
        cache
            .set_as("k", &1, Some(Duration::from_secs(60)))
            .await
            .unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.size().await.unwrap(), 0);
        assert!(storage.exists("elsewhere/x").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let (_, cache) = provider();
        assert!(matches!(
            cache.set_as("a/b", &1, None).await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(matches!(
            cache.set_as("meta_x", &1, None).await,
            Err(CacheError::InvalidKey(_))
        ));
        assert!(cache.get("a/b").await.is_none());
        assert!(!cache.contains_key("").await.unwrap());
        cache.remove("a/b").await.unwrap();
        assert_eq!(cache.stats().removes, 1);
    }

    /// Delegates to an in-memory store but rejects writes to metadata objects
    struct MetaWriteFails(ObjectStorage);

    #[async_trait]
    impl StorageBackend for MetaWriteFails {
        async fn exists(&self, path: &str) -> Result<bool, StorageError> {
            self.0.exists(path).await
        }
        async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
            self.0.read(path).await
        }
        async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
            if path.rsplit('/').next().is_some_and(|name| name.starts_with(META_PREFIX)) {
                return Err(StorageError::Configuration("metadata writes disabled".into()));
            }
            self.0.write(path, data).await
        }
        async fn delete(&self, path: &str) -> Result<bool, StorageError> {
            self.0.delete(path).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.0.list(prefix).await
        }
        async fn delete_many(&self, paths: Vec<String>) -> Result<u64, StorageError> {
            self.0.delete_many(paths).await
        }
        fn describe(&self) -> String {
            "meta-fails://".to_string()
        }
    }

    #[tokio::test]
    async fn test_failed_metadata_write_leaves_nothing_behind() {
        let storage = Arc::new(MetaWriteFails(ObjectStorage::in_memory()));
        let cache = RemoteObjectProvider::with_storage(storage.clone(), RemoteSettings::default());

        assert!(
            cache
                .set_as("k", &"v", Some(Duration::from_secs(1)))
                .await
                .is_err()
        );
        assert!(cache.get("k").await.is_none());
        assert!(!storage.exists("cache/k").await.unwrap());

        // A previous value without TTL is dropped too, not kept forever
        cache.set_as("old", &"v1", None).await.unwrap();
        assert!(
            cache
                .set_as("old", &"v2", Some(Duration::from_secs(1)))
                .await
                .is_err()
        );
        assert!(cache.get("old").await.is_none());
        assert_eq!(cache.stats().sets, 1);
    }

    struct SlowStorage;

    #[async_trait]
    impl StorageBackend for SlowStorage {
        async fn exists(&self, _path: &str) -> Result<bool, StorageError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
        async fn read(&self, _path: &str) -> Result<Bytes, StorageError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Bytes::new())
        }
        async fn write(&self, _path: &str, _data: Bytes) -> Result<(), StorageError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        async fn delete(&self, _path: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn list(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
        async fn delete_many(&self, _paths: Vec<String>) -> Result<u64, StorageError> {
            Ok(0)
        }
        fn describe(&self) -> String {
            "slow://".to_string()
        }
    }

    #[tokio::test]
    async fn test_slow_storage_times_out() {
        let cache = RemoteObjectProvider::with_storage(
            Arc::new(SlowStorage),
            RemoteSettings {
                operation_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let started = std::time::Instant::now();
        assert!(cache.get("k").await.is_none());
        assert!(matches!(
            cache.set_as("k", &1, None).await,
            Err(CacheError::Storage(StorageError::Timeout(_)))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(cache.stats().misses, 1);
    }
}
