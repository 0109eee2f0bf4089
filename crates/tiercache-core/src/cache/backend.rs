//! Backend type identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Error type for parsing a backend type
#[derive(Debug, Clone)]
pub struct ParseBackendTypeError(String);

impl fmt::Display for ParseBackendTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid backend type: {}", self.0)
    }
}

impl std::error::Error for ParseBackendTypeError {}

/// Kind of storage tier a provider is built on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Volatile in-process map
    #[default]
    Memory,
    /// Embedded SQLite database
    Persistent,
    /// Object storage bucket
    Remote,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            BackendType::Persistent => "persistent",
            BackendType::Remote => "remote",
        }
    }

    /// A critical backend must construct successfully for the cache to run
    pub fn is_critical(&self) -> bool {
        matches!(self, BackendType::Memory)
    }

    /// Parse an ordered list of identifiers.
    ///
    /// Unrecognized identifiers and repeats are dropped. An empty result
    /// falls back to a memory-only list.
    pub fn parse_list<S: AsRef<str>>(raw: &[S]) -> Vec<BackendType> {
        let mut backends = Vec::with_capacity(raw.len());
        for id in raw {
            match id.as_ref().parse::<BackendType>() {
                Ok(backend) if !backends.contains(&backend) => backends.push(backend),
                Ok(backend) => warn!("Ignoring duplicate backend type: {}", backend),
                Err(e) => warn!("{}, ignoring", e),
            }
        }

        if backends.is_empty() {
            backends.push(BackendType::Memory);
        }
        backends
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = ParseBackendTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendType::Memory),
            "persistent" | "sqlite" | "database" => Ok(BackendType::Persistent),
            "remote" | "object" | "s3" => Ok(BackendType::Remote),
            _ => Err(ParseBackendTypeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_accepts_aliases() {
        assert_eq!("Memory".parse::<BackendType>().unwrap(), BackendType::Memory);
        assert_eq!("sqlite".parse::<BackendType>().unwrap(), BackendType::Persistent);
        assert_eq!(" s3 ".parse::<BackendType>().unwrap(), BackendType::Remote);
        assert!("redis".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_parse_list_drops_unknown_and_duplicates() {
        let parsed = BackendType::parse_list(&["memory", "redis", "persistent", "memory"]);
        assert_eq!(parsed, vec![BackendType::Memory, BackendType::Persistent]);
    }

    #[test]
    fn test_parse_list_falls_back_to_memory() {
        let empty: [&str; 0] = [];
        assert_eq!(BackendType::parse_list(&empty), vec![BackendType::Memory]);
        assert_eq!(
            BackendType::parse_list(&["bogus", ""]),
            vec![BackendType::Memory]
        );
    }
}
