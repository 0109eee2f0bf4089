//! Cache entry operations

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::DbError;
use crate::models::{NewStoredEntry, StoredEntry};
use crate::repository::Database;
use crate::utils::format_timestamp;

const ENTRY_COLUMNS: &str =
    "key, value, value_type, created_at, expires_at, access_count, last_accessed, value_size";

impl Database {
    // ==================== Cache Entry Operations ====================

    /// Insert or fully replace a cache entry in a single statement
    ///
    /// Replacing resets `access_count`, `created_at` and `expires_at`.
    pub async fn upsert_entry(&self, entry: &NewStoredEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries
                (key, value, value_type, created_at, expires_at,
                 access_count, last_accessed, value_size)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(&entry.value_type)
        .bind(format_timestamp(entry.created_at))
        .bind(entry.expires_at.map(format_timestamp))
        .bind(format_timestamp(entry.created_at))
        .bind(entry.value_size())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a cache entry by key, expired or not
    pub async fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>, DbError> {
        let sql = format!("SELECT {} FROM cache_entries WHERE key = ?", ENTRY_COLUMNS);
        let result = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| StoredEntry::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Update last accessed time and increment access count
    pub async fn touch_entry(&self, key: &str, now: DateTime<Utc>) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE cache_entries
            SET last_accessed = ?, access_count = access_count + 1
            WHERE key = ?
            "#,
        )
        .bind(format_timestamp(now))
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Check for a live entry without reading its value
    pub async fn entry_exists(&self, key: &str, now: DateTime<Utc>) -> Result<bool, DbError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM cache_entries
            WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(key)
        .bind(format_timestamp(now))
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Delete a cache entry by key
    pub async fn delete_entry(&self, key: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every cache entry
    pub async fn clear_entries(&self) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete all entries whose expiry is at or before `now`
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the `count` least recently accessed entries
    pub async fn evict_lru(&self, count: i64) -> Result<u64, DbError> {
        if count <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries
            WHERE key IN (
                SELECT key FROM cache_entries
                ORDER BY last_accessed ASC, rowid ASC
                LIMIT ?
            )
            "#,
        )
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Keys of all entries that are live at `now`, sorted
    pub async fn live_keys(&self, now: DateTime<Utc>) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT key FROM cache_entries
            WHERE expires_at IS NULL OR expires_at > ?
            ORDER BY key
            "#,
        )
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("key")).collect())
    }

    /// Get cache entry count, including rows not yet swept
    pub async fn count_entries(&self) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }

    /// Get total size of stored values in bytes
    pub async fn total_value_size(&self) -> Result<i64, DbError> {
        let result =
            sqlx::query("SELECT COALESCE(SUM(value_size), 0) as total FROM cache_entries")
                .fetch_one(&self.pool)
                .await?;
        Ok(result.get("total"))
    }

    /// Get the most accessed entries
    pub async fn top_accessed_entries(&self, limit: i64) -> Result<Vec<StoredEntry>, DbError> {
        let sql = format!(
            "SELECT {} FROM cache_entries ORDER BY access_count DESC, key ASC LIMIT ?",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| StoredEntry::try_from(row).map_err(DbError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_entry(key: &str, created_at: DateTime<Utc>, ttl: Option<Duration>) -> NewStoredEntry {
        NewStoredEntry {
            key: key.to_string(),
            value: format!("\"{}\"", key),
            value_type: "scalar".to_string(),
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_entry() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();

        db.upsert_entry(&new_entry("a", now, Some(Duration::seconds(60))))
            .await
            .unwrap();
        db.touch_entry("a", now).await.unwrap();
        assert_eq!(db.get_entry("a").await.unwrap().unwrap().access_count, 1);

        let mut replacement = new_entry("a", now, None);
        replacement.value = "42".to_string();
        db.upsert_entry(&replacement).await.unwrap();

        let stored = db.get_entry("a").await.unwrap().unwrap();
        assert_eq!(stored.value, "42");
        assert_eq!(stored.value_size, 2);
        assert_eq!(stored.access_count, 0);
        assert!(stored.expires_at.is_none());
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expiry_queries() {
        let db = Database::in_memory().await.unwrap();
        let past = Utc::now() - Duration::seconds(120);

        db.upsert_entry(&new_entry("expired", past, Some(Duration::seconds(60))))
            .await
            .unwrap();
        db.upsert_entry(&new_entry("forever", past, None))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(!db.entry_exists("expired", now).await.unwrap());
        assert!(db.entry_exists("forever", now).await.unwrap());
        assert_eq!(db.live_keys(now).await.unwrap(), vec!["forever".to_string()]);

        assert_eq!(db.delete_expired(now).await.unwrap(), 1);
        assert_eq!(db.count_entries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_evict_lru_uses_last_access() {
        let db = Database::in_memory().await.unwrap();
        let base = Utc::now();

        for (i, key) in ["k1", "k2", "k3"].iter().enumerate() {
            db.upsert_entry(&new_entry(key, base + Duration::seconds(i as i64), None))
                .await
                .unwrap();
        }
        // k1 becomes the most recently used
        db.touch_entry("k1", base + Duration::seconds(10))
            .await
            .unwrap();

        assert_eq!(db.evict_lru(1).await.unwrap(), 1);
        assert!(db.get_entry("k2").await.unwrap().is_none());
        assert!(db.get_entry("k1").await.unwrap().is_some());
        assert!(db.get_entry("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_database_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(dir.path().join("nested").join("cache.db"))
            .await
            .unwrap();

        db.upsert_entry(&new_entry("a", Utc::now(), None))
            .await
            .unwrap();
        assert!(db.file_size().await.unwrap() > 0);
        assert_eq!(db.total_value_size().await.unwrap(), 3);

        let top = db.top_accessed_entries(10).await.unwrap();
        assert_eq!(top.len(), 1);
        db.close().await;
    }
}
