//! Tiercache Database Layer
//!
//! This crate provides the embedded SQLite store behind the persistent
//! cache tier, using sqlx for pooling, schema setup and queries.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::Database;

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
