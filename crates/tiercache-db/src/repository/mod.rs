//! Database repository implementation

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::DbError;

mod cache;

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    /// Backing file, `None` for in-memory databases
    path: Option<PathBuf>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        info!("Connecting to database: {}", database_url);

        // Every connection to an in-memory SQLite database sees its own
        // empty database, so those pools are pinned to one connection.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;
        let db = Self { pool, path: None };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open (creating if needed) a database file
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let mut db = Self::new(&url).await?;
        db.path = Some(path);
        Ok(db)
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new("sqlite::memory:").await
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Backing file path, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the backing file in bytes (0 for in-memory databases)
    pub async fn file_size(&self) -> Result<u64, DbError> {
        match &self.path {
            Some(path) => Ok(tokio::fs::metadata(path).await?.len()),
            None => Ok(0),
        }
    }

    /// Close the pool, waiting for connections to be released
    pub async fn close(&self) {
        debug!("Closing database pool");
        self.pool.close().await;
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT NOT NULL,
                value_size INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::Migration(format!("cache_entries: {}", e)))?;

        for (name, column) in [
            ("idx_cache_entries_expires_at", "expires_at"),
            ("idx_cache_entries_last_accessed", "last_accessed"),
            ("idx_cache_entries_created_at", "created_at"),
            ("idx_cache_entries_access_count", "access_count"),
        ] {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON cache_entries({})",
                name, column
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;
        }

        info!("Database migrations completed");
        Ok(())
    }
}
