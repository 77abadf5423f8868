//! Per-key admission state.

use serde::{Deserialize, Serialize};

/// State kept for one limiting key.
///
/// One shape serves every built-in algorithm; each uses the fields it needs
/// and leaves the rest unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageEntry {
    /// Requests admitted in the current window.
    pub count: u64,

    /// Start of the current window (Unix milliseconds).
    pub window_start: u64,

    /// Requests admitted in the previous window (sliding window).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_count: Option<u64>,

    /// Available tokens (token bucket).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<f64>,

    /// Theoretical arrival time (GCRA, Unix nanoseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tat: Option<u64>,

    /// Last time the entry was written (Unix milliseconds).
    pub last_update: u64,
}

impl StorageEntry {
    /// Entry for window-based algorithms.
    pub fn new(count: u64, window_start: u64) -> Self {
        Self {
            count,
            window_start,
            last_update: window_start,
            ..Default::default()
        }
    }

    /// Entry for the token bucket.
    pub fn with_tokens(tokens: f64, last_update: u64) -> Self {
        Self {
            window_start: last_update,
            tokens: Some(tokens),
            last_update,
            ..Default::default()
        }
    }

    /// Entry for GCRA.
    pub fn with_tat(tat: u64, now: u64) -> Self {
        Self {
            window_start: now,
            tat: Some(tat),
            last_update: now,
            ..Default::default()
        }
    }

    /// Set previous window count.
    pub fn set_prev_count(mut self, count: u64) -> Self {
        self.prev_count = Some(count);
        self
    }

    /// Set the last update timestamp.
    pub fn set_last_update(mut self, last_update: u64) -> Self {
        self.last_update = last_update;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_new() {
        let entry = StorageEntry::new(5, 1000);
        assert_eq!(entry.count, 5);
        assert_eq!(entry.window_start, 1000);
        assert_eq!(entry.last_update, 1000);
        assert!(entry.tokens.is_none());
    }

    #[test]
    fn test_entry_with_tokens() {
        let entry = StorageEntry::with_tokens(10.5, 2000);
        assert_eq!(entry.tokens, Some(10.5));
        assert_eq!(entry.last_update, 2000);
    }

    #[test]
    fn test_entry_json_omits_unused_fields() {
        let entry = StorageEntry::new(3, 60_000).set_prev_count(7);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["prev_count"], 7);
        assert!(json.get("tokens").is_none());
        assert!(json.get("tat").is_none());
    }
}
