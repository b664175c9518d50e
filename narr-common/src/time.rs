//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Fixed-width, lexically sortable UTC stamp used in backup file names
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6fZ").to_string()
}
