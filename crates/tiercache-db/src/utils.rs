//! Shared utility functions

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Timestamps are stored as fixed-width RFC3339 strings with millisecond
/// precision and a `Z` suffix, so that lexicographic order in SQLite matches
/// chronological order. The `expires_at` and `last_accessed` indexes rely on
/// this.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.min(max_timestamp()).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Latest instant with a four-digit year, `9999-12-31T23:59:59.999Z`.
///
/// Later instants would format with a signed five-digit year, which neither
/// parses back as RFC3339 nor sorts correctly. They are clamped to this.
pub fn max_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 999_000_000).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Parse a datetime string (RFC3339 format) or return current time
pub fn parse_datetime_or_now(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Format bytes as human-readable string
///
/// Converts byte sizes into human-readable format with appropriate units
/// (B, KB, MB, GB, TB). Uses binary units (1024 base).
///
/// # Examples
///
/// ```
/// use tiercache_db::utils::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(1048576), "1.00 MB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
