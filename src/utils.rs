// src/utils.rs
// Shared utility functions used across the codebase

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as integer epoch milliseconds.
///
/// All persisted timestamps in the store use this representation.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Mint a new opaque entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Truncate a string to max length with ellipsis.
///
/// If the string is longer than `max_len`, it will be truncated and
/// "..." will be appended. The total length will be `max_len + 3`.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}
