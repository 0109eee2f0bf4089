//! Object storage backend
//!
//! Uses the `object_store` crate to address an S3-compatible bucket, a local
//! directory or an in-memory store through one implementation. Supports AWS
//! S3, MinIO, and other S3-compatible services.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// S3 storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// S3 region (e.g., "us-east-1")
    pub region: String,
    /// S3 endpoint URL (for MinIO or other S3-compatible services)
    pub endpoint: Option<String>,
    /// AWS access key ID
    pub access_key_id: Option<String>,
    /// AWS secret access key
    pub secret_access_key: Option<String>,
    /// Allow HTTP (not HTTPS) connections
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "tiercache".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }
}

/// Object storage backend over any [`ObjectStore`]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    location: String,
}

impl ObjectStorage {
    /// Wrap an existing object store
    pub fn from_store(store: Arc<dyn ObjectStore>, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
        }
    }

    /// Create a new S3 storage backend
    pub fn s3(config: S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Set endpoint for MinIO or other S3-compatible services
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        // Allow HTTP for local development (MinIO)
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Configuration(format!("Failed to create S3 client: {}", e))
        })?;

        info!(
            "Initialized S3 storage: bucket={}, region={}, endpoint={:?}",
            config.bucket, config.region, config.endpoint
        );

        Ok(Self::from_store(
            Arc::new(store),
            format!("s3://{}", config.bucket),
        ))
    }

    /// Create a storage backend rooted at a local directory
    pub async fn local(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref();
        tokio::fs::create_dir_all(base_path).await?;

        let store = LocalFileSystem::new_with_prefix(base_path).map_err(|e| {
            StorageError::Configuration(format!("Failed to open {:?}: {}", base_path, e))
        })?;

        info!("Initialized local object storage at {:?}", base_path);
        Ok(Self::from_store(
            Arc::new(store),
            format!("file://{}", base_path.display()),
        ))
    }

    /// Create a process-local in-memory store
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemory::new()), "memory://")
    }

    fn object_path(path: &str) -> Result<ObjectPath, StorageError> {
        ObjectPath::parse(path).map_err(|e| StorageError::InvalidPath(format!("{}: {}", path, e)))
    }
}

fn map_store_error(path: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        _ => StorageError::ObjectStore(e.to_string()),
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let location = Self::object_path(path)?;

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ObjectStore(e.to_string())),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let location = Self::object_path(path)?;
        debug!("Reading object: {}", location);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(path, e))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::ObjectStore(format!("Failed to read bytes: {}", e)))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let location = Self::object_path(path)?;
        debug!("Writing object: {} ({} bytes)", location, data.len());

        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let location = Self::object_path(path)?;
        debug!("Deleting object: {}", location);

        // Some stores report missing objects as errors, others silently succeed
        if !self.exists(path).await? {
            return Ok(false);
        }

        match self.store.delete(&location).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ObjectStore(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.trim_end_matches('/');
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(Self::object_path(prefix)?)
        };

        let objects: Vec<_> = self
            .store
            .list(prefix_path.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::ObjectStore(format!("List failed: {}", e)))?;

        Ok(objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect())
    }

    async fn delete_many(&self, paths: Vec<String>) -> Result<u64, StorageError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let locations = paths
            .iter()
            .map(|p| Self::object_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Deleting {} objects in bulk", locations.len());

        let input = futures::stream::iter(locations.into_iter().map(Ok)).boxed();
        let mut results = self.store.delete_stream(input);

        let mut deleted = 0u64;
        while let Some(result) = results.next().await {
            match result {
                Ok(_) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(StorageError::ObjectStore(e.to_string())),
            }
        }

        Ok(deleted)
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}
