//! Tiercache Core
//!
//! This crate provides the tiered cache: the provider contract, the memory,
//! SQLite and object storage tiers, and the orchestrator that composes them
//! with fallback reads, fan-out writes, hit promotion and polled
//! reconfiguration.

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;

pub use cache::{
    BackendType, CacheEntry, CacheHit, CacheProvider, CacheProviderExt, CacheStats, CachedValue,
    ValueShape,
};
pub use config::{
    ConfigSource, ConfigSourceError, InMemoryConfigSource, MemorySettings, OrchestratorSettings,
    PersistentSettings, RemoteSettings, RemoteStorage, StaticConfigSource,
};
pub use error::CacheError;
pub use orchestrator::{BackgroundWorker, CacheOrchestrator};
pub use providers::{
    DefaultProviderFactory, MemoryProvider, PersistentProvider, ProviderFactory,
    RemoteObjectProvider, StorageHealth,
};
