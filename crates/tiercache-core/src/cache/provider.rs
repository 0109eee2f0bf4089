//! Cache provider contract

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use super::backend::BackendType;
use super::entry::CacheHit;
use super::stats::CacheStats;
use super::value::CachedValue;
use crate::error::CacheError;

/// Contract shared by every storage tier
///
/// Implementations must treat expired entries as absent on every read path.
/// `get` never fails: backend and decoding errors are logged and reported as
/// a miss. `set` errors are returned so the caller knows the write did not
/// happen.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Which kind of tier this is
    fn backend_type(&self) -> BackendType;

    /// Look up a live entry, deleting it eagerly if it has expired
    async fn get(&self, key: &str) -> Option<CacheHit>;

    /// Write or fully replace an entry. `None` applies the provider's
    /// default TTL, which may itself be none.
    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Delete an entry; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every entry held by this provider
    async fn clear(&self) -> Result<(), CacheError>;

    /// Whether a live entry exists, without reading its value
    async fn contains_key(&self, key: &str) -> Result<bool, CacheError>;

    /// Keys of all live entries; runs a cleanup pass first
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Number of live entries; runs a cleanup pass first
    async fn size(&self) -> Result<usize, CacheError>;

    /// Physically delete expired entries, returning how many were removed
    async fn cleanup(&self) -> Result<u64, CacheError>;

    /// Counter snapshot; never performs I/O
    fn stats(&self) -> CacheStats;

    /// Release background tasks and storage handles
    async fn close(&self) {}
}

/// Typed helpers over any provider
#[async_trait]
pub trait CacheProviderExt: CacheProvider {
    async fn get_as<T: DeserializeOwned + Send>(&self, key: &str) -> Option<T> {
        let hit = self.get(key).await?;
        match hit.value.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(backend = %self.backend_type(), key, "Discarding cached value: {}", e);
                None
            }
        }
    }

    async fn set_as<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = CachedValue::encode(value)?;
        self.set(key, value, ttl).await
    }
}

impl<P: CacheProvider + ?Sized> CacheProviderExt for P {}
