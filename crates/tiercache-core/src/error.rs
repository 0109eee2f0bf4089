//! Core error types

use thiserror::Error;

use crate::cache::BackendType;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] tiercache_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] tiercache_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot decode cached value: {0}")]
    Decode(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to construct {backend} provider: {reason}")]
    ProviderConstruction {
        backend: BackendType,
        reason: String,
    },

    #[error("Critical {backend} provider failed to start: {source}")]
    CriticalProvider {
        backend: BackendType,
        #[source]
        source: Box<CacheError>,
    },
}
