//! Shared row helpers and domain constants
//!
//! SQLite stores timestamps as fixed-width ISO 8601 TEXT, so lexicographic
//! comparison matches chronological order and scheduling queries can compare
//! strings directly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Format an instant the same way `current_timestamp` does
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Generate a fresh opaque record identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Progress status values
pub mod progress_status {
    pub const NOT_STARTED: &str = "not_started";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const MASTERED: &str = "mastered";

    pub const ALL: [&str; 4] = [NOT_STARTED, IN_PROGRESS, COMPLETED, MASTERED];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }

    /// Completed and mastered both count as "done" for aggregates
    pub fn is_complete(status: &str) -> bool {
        status == COMPLETED || status == MASTERED
    }
}
