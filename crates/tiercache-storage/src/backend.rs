//! Storage backend trait

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Storage backend trait
///
/// A flat object namespace addressed by `/`-separated paths. Implementations
/// report missing objects as [`StorageError::NotFound`] from `read`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Check if an object exists
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Read an object fully into memory
    async fn read(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Write (create or overwrite) an object
    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// Delete an object, returning whether it existed
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// List the paths of all objects under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete many objects in bulk, returning how many were removed
    async fn delete_many(&self, paths: Vec<String>) -> Result<u64, StorageError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Join a prefix and a name with `/`, skipping an empty prefix
pub fn join_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "key"), "key");
        assert_eq!(join_path("cache", "key"), "cache/key");
        assert_eq!(join_path("cache/", "meta_key"), "cache/meta_key");
    }
}
