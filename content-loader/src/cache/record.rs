//! Metadata rows.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside each cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "modifiedAt")]
    pub modified_at: i64,
}

impl CacheRecord {
    /// Create a record stamped with the current time.
    pub fn new(key: impl Into<String>, resource_type: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            resource_type: resource_type.into(),
            size,
            modified_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.modified_at).single()
    }
}
