//! Provider construction

use async_trait::async_trait;
use std::sync::Arc;
use tiercache_storage::StorageBackend;
use tracing::debug;

use super::{MemoryProvider, PersistentProvider, RemoteObjectProvider};
use crate::cache::{BackendType, CacheProvider};
use crate::config::{MemorySettings, PersistentSettings, RemoteSettings};
use crate::error::CacheError;

/// Builds a provider for a backend type
///
/// The orchestrator owns every provider it gets from the factory and closes
/// them when the active set is replaced.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, backend: BackendType) -> Result<Arc<dyn CacheProvider>, CacheError>;
}

/// Factory for the three built-in tiers
#[derive(Clone, Default)]
pub struct DefaultProviderFactory {
    pub memory: MemorySettings,
    pub persistent: PersistentSettings,
    pub remote: RemoteSettings,
    /// Overrides `remote.storage` when set
    remote_storage: Option<Arc<dyn StorageBackend>>,
}

impl DefaultProviderFactory {
    pub fn new(
        memory: MemorySettings,
        persistent: PersistentSettings,
        remote: RemoteSettings,
    ) -> Self {
        Self {
            memory,
            persistent,
            remote,
            remote_storage: None,
        }
    }

    /// Use an existing storage backend for the remote tier
    pub fn with_remote_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.remote_storage = Some(storage);
        self
    }

    async fn build(&self, backend: BackendType) -> Result<Arc<dyn CacheProvider>, CacheError> {
        let provider: Arc<dyn CacheProvider> = match backend {
            BackendType::Memory => Arc::new(MemoryProvider::new(self.memory.clone())?),
            BackendType::Persistent => {
                Arc::new(PersistentProvider::new(self.persistent.clone()).await?)
            }
            BackendType::Remote => match &self.remote_storage {
                Some(storage) => Arc::new(RemoteObjectProvider::with_storage(
                    storage.clone(),
                    self.remote.clone(),
                )),
                None => Arc::new(RemoteObjectProvider::new(self.remote.clone()).await?),
            },
        };
        Ok(provider)
    }
}

#[async_trait]
impl ProviderFactory for DefaultProviderFactory {
    async fn create(&self, backend: BackendType) -> Result<Arc<dyn CacheProvider>, CacheError> {
        debug!("Constructing {} provider", backend);
        self.build(backend)
            .await
            .map_err(|e| CacheError::ProviderConstruction {
                backend,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteStorage;

    #[tokio::test]
    async fn test_builds_each_backend() {
        let factory = DefaultProviderFactory {
            persistent: PersistentSettings {
                path: None,
                ..Default::default()
            },
            ..Default::default()
        };

        for backend in [BackendType::Memory, BackendType::Persistent, BackendType::Remote] {
            let provider = factory.create(backend).await.unwrap();
            assert_eq!(provider.backend_type(), backend);
            provider.close().await;
        }
    }

    #[tokio::test]
    async fn test_construction_errors_name_backend() {
        let factory = DefaultProviderFactory {
            memory: MemorySettings {
                max_size: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        match factory.create(BackendType::Memory).await {
            Err(CacheError::ProviderConstruction { backend, .. }) => {
                assert_eq!(backend, BackendType::Memory)
            }
            _ => panic!("expected a construction error"),
        }
    }

    #[tokio::test]
    async fn test_local_remote_storage() {
        let dir = tempfile::tempdir().unwrap();
        let factory = DefaultProviderFactory {
            remote: RemoteSettings {
                storage: RemoteStorage::Local {
                    path: dir.path().join("objects"),
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let provider = factory.create(BackendType::Remote).await.unwrap();
        provider
            .set("k", crate::cache::CachedValue::from_json(1.into()), None)
            .await
            .unwrap();
        assert!(dir.path().join("objects").join("cache").join("k").exists());
    }
}
