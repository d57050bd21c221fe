use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Storage form for timestamps: second precision, `Z` suffix, so that
/// lexical comparison in SQL matches chronological order.
pub fn fmt_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse a stored RFC3339 timestamp.
///
/// A malformed value becomes the Unix epoch, which makes every time-based
/// signal contribute nothing instead of failing the whole read.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => match chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            Ok(naive) => naive.and_utc(),
            Err(_) => {
                log::debug!("ProfileDb: unparseable timestamp {:?}", raw);
                DateTime::UNIX_EPOCH
            }
        },
    }
}

/// Parse a stored JSON string array. Anything malformed reads as empty.
pub fn parse_string_set(raw: Option<&str>) -> BTreeSet<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .map(|v| v.into_iter().collect())
        .unwrap_or_default()
}

pub fn encode_string_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2026-03-01T12:00:00Z");
        let sqlite = parse_timestamp("2026-03-01 12:00:00");
        assert_eq!(rfc, sqlite);
        assert_eq!(parse_timestamp("yesterday"), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_parse_string_set_tolerates_garbage() {
        assert!(parse_string_set(Some("not json")).is_empty());
        assert!(parse_string_set(None).is_empty());
        let set = parse_string_set(Some(r#"["ai","music","ai"]"#));
        assert_eq!(set.len(), 2);
    }
}
