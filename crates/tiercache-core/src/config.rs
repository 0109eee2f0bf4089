//! Shared configuration types for the cache tiers
//!
//! Settings are plain typed structs; file loading is done by the binary
//! crate, which converts its TOML sections into these types. The
//! [`ConfigSource`] trait is the external collaborator that decides which
//! backends are active.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tiercache_storage::S3Config;

/// Fixed interval between ConfigSource polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Settings for the in-process memory tier
#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Maximum number of entries before the oldest is evicted
    pub max_size: usize,
    pub default_ttl: Option<Duration>,
    /// Period of the expiry sweep; zero disables it
    pub cleanup_interval: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: None,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Settings for the SQLite tier
#[derive(Debug, Clone)]
pub struct PersistentSettings {
    /// Database file; `None` keeps the database in memory
    pub path: Option<PathBuf>,
    /// Row limit enforced with LRU eviction
    pub max_size: Option<u64>,
    pub default_ttl: Option<Duration>,
    /// Period of the expiry sweep; zero disables it
    pub cleanup_interval: Duration,
    /// Period of the storage health refresh; zero disables it
    pub health_interval: Duration,
}

impl Default for PersistentSettings {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("./data/tiercache.db")),
            max_size: None,
            default_ttl: None,
            cleanup_interval: Duration::from_secs(10 * 60),
            health_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Where the remote tier keeps its objects
#[derive(Debug, Clone, Default)]
pub enum RemoteStorage {
    /// Process-local store, for development and tests
    #[default]
    InMemory,
    /// A directory on local disk
    Local { path: PathBuf },
    /// An S3-compatible bucket
    S3(S3Config),
}

/// Settings for the object storage tier
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub storage: RemoteStorage,
    /// Key prefix for every object written by the provider
    pub prefix: String,
    pub default_ttl: Option<Duration>,
    /// Upper bound on any single storage call
    pub operation_timeout: Duration,
    /// Period of the expiry sweep; zero disables it
    pub cleanup_interval: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            storage: RemoteStorage::default(),
            prefix: "cache".to_string(),
            default_ttl: None,
            operation_timeout: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Settings for the orchestrator itself
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Minimum time between ConfigSource polls
    pub poll_interval: Duration,
    /// Concurrency bound for detached background work
    pub max_background_tasks: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_background_tasks: 16,
        }
    }
}

/// Error returned by a ConfigSource
#[derive(Error, Debug)]
pub enum ConfigSourceError {
    #[error("Config source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Trait for providing the ordered list of active backends
///
/// Polled by the orchestrator at most once per poll interval. Identifiers
/// are raw strings; unrecognized ones are dropped by the caller.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn ordered_backend_types(&self) -> Result<Vec<String>, ConfigSourceError>;
}

/// A ConfigSource that always returns the same list
pub struct StaticConfigSource {
    backends: Vec<String>,
}

impl StaticConfigSource {
    pub fn new<S: Into<String>>(backends: impl IntoIterator<Item = S>) -> Self {
        Self {
            backends: backends.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn ordered_backend_types(&self) -> Result<Vec<String>, ConfigSourceError> {
        Ok(self.backends.clone())
    }
}

/// A simple in-memory ConfigSource that can be changed at runtime
///
/// Useful for tests and for embedders that receive configuration through
/// their own channel.
pub struct InMemoryConfigSource {
    backends: RwLock<Vec<String>>,
    unavailable: AtomicBool,
    polls: AtomicU64,
}

impl InMemoryConfigSource {
    pub fn new<S: Into<String>>(backends: impl IntoIterator<Item = S>) -> Self {
        Self {
            backends: RwLock::new(backends.into_iter().map(Into::into).collect()),
            unavailable: AtomicBool::new(false),
            polls: AtomicU64::new(0),
        }
    }

    /// Replace the advertised backend list
    pub fn set_backends<S: Into<String>>(&self, backends: impl IntoIterator<Item = S>) {
        *self.backends.write() = backends.into_iter().map(Into::into).collect();
    }

    /// Simulate the source being unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of times the source has been polled
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigSource {
    async fn ordered_backend_types(&self) -> Result<Vec<String>, ConfigSourceError> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(ConfigSourceError::Unavailable(
                "in-memory source marked unavailable".to_string(),
            ));
        }
        Ok(self.backends.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_source_updates() {
        let source = InMemoryConfigSource::new(["memory"]);
        assert_eq!(source.ordered_backend_types().await.unwrap(), vec!["memory"]);

        source.set_backends(["memory", "persistent"]);
        assert_eq!(
            source.ordered_backend_types().await.unwrap(),
            vec!["memory", "persistent"]
        );

        source.set_unavailable(true);
        assert!(source.ordered_backend_types().await.is_err());
        assert_eq!(source.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticConfigSource::new(vec!["remote".to_string()]);
        assert_eq!(source.ordered_backend_types().await.unwrap(), vec!["remote"]);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(MemorySettings::default().cleanup_interval, Duration::from_secs(300));
        assert_eq!(OrchestratorSettings::default().poll_interval, Duration::from_secs(30));
        assert!(
            RemoteSettings::default().cleanup_interval
                > PersistentSettings::default().cleanup_interval
        );
    }
}
