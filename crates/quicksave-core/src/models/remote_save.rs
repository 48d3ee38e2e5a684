//! Remote save record as reported by the save server

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A save record from the server. Read-only from the engine's perspective
/// except for upload/download side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSave {
    /// Server-side save id
    pub id: i64,
    /// Server-side game identity
    #[serde(rename = "game_id")]
    pub remote_game_id: i64,
    /// Emulator the server associates with this save, when known
    #[serde(rename = "emulator")]
    pub emulator_id: Option<String>,
    pub file_name: String,
    #[serde(rename = "file_size_bytes")]
    pub size_bytes: i64,
    /// Server timestamp: ISO-8601 or bare epoch seconds
    pub updated_at: String,
}

impl RemoteSave {
    /// File name with the extension stripped.
    #[must_use]
    pub fn file_stem(&self) -> String {
        Path::new(&self.file_name)
            .file_stem()
            .map_or_else(|| self.file_name.clone(), |s| s.to_string_lossy().into_owned())
    }

    /// Parsed `updated_at` in unix milliseconds, if parsable.
    #[must_use]
    pub fn updated_at_millis(&self) -> Option<i64> {
        parse_remote_timestamp(&self.updated_at)
    }
}

/// Parse a server timestamp in either accepted format: ISO-8601 / RFC 3339
/// (`2024-03-01T12:30:00Z`, offset variants included) or bare epoch seconds.
#[must_use]
pub fn parse_remote_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }

    // Some server builds report naive ISO timestamps without an offset.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }

    trimmed
        .parse::<i64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        let millis = parse_remote_timestamp("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(millis, 1_709_296_200_000);
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let utc = parse_remote_timestamp("2024-03-01T12:30:00Z").unwrap();
        let offset = parse_remote_timestamp("2024-03-01T14:30:00+02:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn parses_naive_iso() {
        let utc = parse_remote_timestamp("2024-03-01T12:30:00Z").unwrap();
        let naive = parse_remote_timestamp("2024-03-01T12:30:00").unwrap();
        assert_eq!(utc, naive);
    }

    #[test]
    fn parses_epoch_seconds() {
        assert_eq!(parse_remote_timestamp("1709296200"), Some(1_709_296_200_000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_remote_timestamp("not-a-date"), None);
        assert_eq!(parse_remote_timestamp(""), None);
    }

    #[test]
    fn file_stem_strips_extension() {
        let save = RemoteSave {
            id: 1,
            remote_game_id: 2,
            emulator_id: None,
            file_name: "checkpoint.srm".to_string(),
            size_bytes: 10,
            updated_at: "1709296200".to_string(),
        };
        assert_eq!(save.file_stem(), "checkpoint");
    }
}
