//! Cache model: entries, values, statistics and the provider contract

mod backend;
mod entry;
mod provider;
mod stats;
mod value;

pub use backend::{BackendType, ParseBackendTypeError};
pub use entry::{CacheEntry, CacheHit, expiry_after, is_expired};
pub use provider::{CacheProvider, CacheProviderExt};
pub use stats::{CacheStats, StatsRecorder};
pub use value::{CachedValue, ValueShape};
