//! Orchestration of the active cache tiers

mod manager;
mod worker;

pub use manager::CacheOrchestrator;
pub use worker::BackgroundWorker;
