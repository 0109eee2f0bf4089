//! Built-in cache tiers and their construction

mod factory;
mod memory;
mod persistent;
mod remote;
mod sweep;

pub use factory::{DefaultProviderFactory, ProviderFactory};
pub use memory::MemoryProvider;
pub use persistent::{PersistentProvider, StorageHealth};
pub use remote::{META_PREFIX, ObjectMetadata, RemoteObjectProvider};
pub use sweep::{SweepHandle, spawn_sweep_task};
