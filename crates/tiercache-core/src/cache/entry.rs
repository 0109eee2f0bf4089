//! Cache entries and TTL arithmetic

use chrono::{DateTime, Utc};
use std::time::Duration;
use tiercache_db::utils::max_timestamp;

use super::value::CachedValue;

/// Expiry time for an entry created at `created_at` with the given TTL.
///
/// `None` means the entry never expires. A TTL reaching past the last
/// storable timestamp (year 9999) is treated the same way, so every tier
/// agrees on it.
pub fn expiry_after(created_at: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    created_at
        .checked_add_signed(ttl)
        .filter(|expires_at| *expires_at <= max_timestamp())
}

/// An entry is expired once `now` reaches its expiry time
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires_at| now >= expires_at)
}

/// Unit stored by every backend
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: CachedValue,
        created_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at,
            expires_at: expiry_after(created_at, ttl),
            access_count: 0,
            last_accessed_at: created_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    /// Record a read
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// A successful provider lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub value: CachedValue,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheHit {
    pub fn new(value: CachedValue, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expires_at, now)
    }

    /// Time left before expiry, `None` for entries that never expire.
    ///
    /// Returns a zero duration once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| (expires_at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl From<&CacheEntry> for CacheHit {
    fn from(entry: &CacheEntry) -> Self {
        Self::new(entry.value.clone(), entry.expires_at)
    }
}
