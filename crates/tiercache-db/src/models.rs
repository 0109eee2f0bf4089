//! Database models

use crate::utils::parse_datetime_or_now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// A row of the `cache_entries` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    /// Serialized payload
    pub value: String,
    /// Shape tag used to pick the decoder on read
    pub value_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
    pub value_size: i64,
}

impl StoredEntry {
    /// Whether the row is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Values for inserting or replacing a cache row
#[derive(Debug, Clone)]
pub struct NewStoredEntry {
    pub key: String,
    pub value: String,
    pub value_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewStoredEntry {
    pub fn value_size(&self) -> i64 {
        self.value.len() as i64
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for StoredEntry {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let expires_at: Option<String> = row.try_get("expires_at")?;
        Ok(StoredEntry {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            value_type: row.try_get("value_type")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            expires_at: expires_at.as_deref().map(parse_datetime_or_now),
            access_count: row.try_get("access_count")?,
            last_accessed: parse_datetime_or_now(&row.try_get::<String, _>("last_accessed")?),
            value_size: row.try_get("value_size")?,
        })
    }
}
