//! Tiercache Storage Layer
//!
//! This crate provides the object storage abstraction behind the remote
//! cache tier, supporting S3-compatible buckets, a local directory and an
//! in-memory store.

pub mod backend;
pub mod error;
pub mod object;

pub use backend::{StorageBackend, join_path};
pub use error::StorageError;
pub use object::{ObjectStorage, S3Config};
