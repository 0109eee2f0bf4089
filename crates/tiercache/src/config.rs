//! Configuration loading and management

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tiercache_core::{
    ConfigSource, ConfigSourceError, DefaultProviderFactory, MemorySettings, OrchestratorSettings,
    PersistentSettings, RemoteSettings, RemoteStorage,
};
use tiercache_storage::S3Config;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub persistent: PersistentConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backends in priority order (memory, persistent, remote)
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            poll_interval_secs: default_poll_interval_secs(),
            max_background_tasks: default_max_background_tasks(),
        }
    }
}

/// Memory tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_memory_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: default_memory_max_size(),
            default_ttl_secs: None,
            cleanup_interval_secs: default_memory_cleanup_secs(),
        }
    }
}

/// Persistent tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// Database file; ":memory:" keeps it in memory
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_persistent_cleanup_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_health_secs")]
    pub health_interval_secs: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_size: None,
            default_ttl_secs: None,
            cleanup_interval_secs: default_persistent_cleanup_secs(),
            health_interval_secs: default_health_secs(),
        }
    }
}

/// Remote tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// "memory", "local" or "s3"
    #[serde(default = "default_remote_backend")]
    pub backend: String,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: default_remote_backend(),
            bucket: None,
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            allow_http: false,
            local_path: default_local_path(),
            prefix: default_prefix(),
            default_ttl_secs: None,
            timeout_secs: default_timeout_secs(),
            cleanup_interval_secs: default_remote_cleanup_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions

fn default_backends() -> Vec<String> {
    vec!["memory".to_string(), "persistent".to_string()]
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_background_tasks() -> usize {
    16
}

fn default_memory_max_size() -> usize {
    1000
}

fn default_memory_cleanup_secs() -> u64 {
    5 * 60
}

fn default_db_path() -> String {
    "./data/tiercache.db".to_string()
}

fn default_persistent_cleanup_secs() -> u64 {
    10 * 60
}

fn default_health_secs() -> u64 {
    15 * 60
}

fn default_remote_backend() -> String {
    "local".to_string()
}

fn default_local_path() -> String {
    "./data/objects".to_string()
}

fn default_prefix() -> String {
    "cache".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_remote_cleanup_secs() -> u64 {
    60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn secs(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

impl Config {
    /// Load configuration from a file, using defaults if it does not exist
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Save configuration to a file atomically
    ///
    /// Writes to a temporary file in the same directory and renames it over
    /// the target.
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all().with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_secs(self.cache.poll_interval_secs),
            max_background_tasks: self.cache.max_background_tasks,
        }
    }

    pub fn memory_settings(&self) -> MemorySettings {
        MemorySettings {
            max_size: self.memory.max_size,
            default_ttl: secs(self.memory.default_ttl_secs),
            cleanup_interval: Duration::from_secs(self.memory.cleanup_interval_secs),
        }
    }

    pub fn persistent_settings(&self) -> PersistentSettings {
        let path = match self.persistent.path.as_str() {
            "" | ":memory:" => None,
            path => Some(PathBuf::from(path)),
        };
        PersistentSettings {
            path,
            max_size: self.persistent.max_size,
            default_ttl: secs(self.persistent.default_ttl_secs),
            cleanup_interval: Duration::from_secs(self.persistent.cleanup_interval_secs),
            health_interval: Duration::from_secs(self.persistent.health_interval_secs),
        }
    }

    pub fn remote_settings(&self) -> Result<RemoteSettings> {
        let remote = &self.remote;
        let storage = match remote.backend.as_str() {
            "memory" => RemoteStorage::InMemory,
            "local" => RemoteStorage::Local {
                path: PathBuf::from(&remote.local_path),
            },
            "s3" => {
                let Some(bucket) = remote.bucket.clone() else {
                    bail!("remote.bucket is required for the s3 backend");
                };
                RemoteStorage::S3(S3Config {
                    bucket,
                    region: remote
                        .region
                        .clone()
                        .unwrap_or_else(|| "us-east-1".to_string()),
                    endpoint: remote.endpoint.clone(),
                    access_key_id: remote.access_key.clone(),
                    secret_access_key: remote.secret_key.clone(),
                    allow_http: remote.allow_http,
                })
            }
            other => bail!("Unknown remote backend '{}'", other),
        };

        Ok(RemoteSettings {
            storage,
            prefix: remote.prefix.clone(),
            default_ttl: secs(remote.default_ttl_secs),
            operation_timeout: Duration::from_secs(remote.timeout_secs),
            cleanup_interval: Duration::from_secs(remote.cleanup_interval_secs),
        })
    }

    /// Factory for the built-in providers
    pub fn provider_factory(&self) -> Result<DefaultProviderFactory> {
        Ok(DefaultProviderFactory::new(
            self.memory_settings(),
            self.persistent_settings(),
            self.remote_settings()?,
        ))
    }
}

/// ConfigSource that re-reads `cache.backends` from the config file
///
/// Editing the file reconfigures a running process within one poll interval.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn ordered_backend_types(&self) -> Result<Vec<String>, ConfigSourceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            // Running on built-in defaults
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(default_backends());
            }
            Err(e) => {
                return Err(ConfigSourceError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| {
            ConfigSourceError::Malformed(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(config.cache.backends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[cache]
backends = ["memory", "remote"]
poll_interval_secs = 5

[memory]
max_size = 50
default_ttl_secs = 120

[persistent]
path = ":memory:"
max_size = 10

[remote]
backend = "s3"
bucket = "media-cache"
endpoint = "http://localhost:9000"
allow_http = true
prefix = "tiers"

[logging]
level = "debug"
format = "json"
"#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.cache.backends, vec!["memory", "remote"]);
        assert_eq!(config.cache.max_background_tasks, 16);

        let memory = config.memory_settings();
        assert_eq!(memory.max_size, 50);
        assert_eq!(memory.default_ttl, Some(Duration::from_secs(120)));
        assert_eq!(memory.cleanup_interval, Duration::from_secs(300));

        let persistent = config.persistent_settings();
        assert!(persistent.path.is_none());
        assert_eq!(persistent.max_size, Some(10));

        let remote = config.remote_settings().unwrap();
        assert_eq!(remote.prefix, "tiers");
        match remote.storage {
            RemoteStorage::S3(s3) => {
                assert_eq!(s3.bucket, "media-cache");
                assert_eq!(s3.region, "us-east-1");
                assert!(s3.allow_http);
            }
            other => panic!("unexpected storage {:?}", other),
        }

        assert_eq!(
            config.orchestrator_settings().poll_interval,
            Duration::from_secs(5)
        );
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.backends, vec!["memory", "persistent"]);
        assert_eq!(config.remote.cleanup_interval_secs, 3600);
        assert!(matches!(
            config.remote_settings().unwrap().storage,
            RemoteStorage::Local { .. }
        ));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = Config::default();
        config.remote.backend = "s3".to_string();
        assert!(config.remote_settings().is_err());

        config.remote.backend = "ftp".to_string();
        assert!(config.remote_settings().is_err());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tiercache.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.cache.backends = vec!["remote".to_string()];
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.cache.backends, vec!["remote"]);
    }

    #[tokio::test]
    async fn test_file_source_follows_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.toml");
        let source = FileConfigSource::new(&path);

        assert_eq!(
            source.ordered_backend_types().await.unwrap(),
            vec!["memory", "persistent"]
        );

        std::fs::write(&path, "[cache]\nbackends = [\"memory\", \"remote\"]\n").unwrap();
        assert_eq!(
            source.ordered_backend_types().await.unwrap(),
            vec!["memory", "remote"]
        );

        std::fs::write(&path, "[cache\nbackends = ").unwrap();
        assert!(matches!(
            source.ordered_backend_types().await,
            Err(ConfigSourceError::Malformed(_))
        ));
    }
}
