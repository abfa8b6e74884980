//! Durable sync progress for one account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::AccountKey;

/// Tracks sync progress for a connected account
///
/// Persisted separately from messages to enable incremental sync.
/// Only one checkpoint per account and schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub user_id: String,
    pub workspace_id: String,
    /// Schema version for migrations
    pub schema_version: u32,
    /// Provider history id; everything up to it has been ingested
    #[serde(default)]
    pub history_cursor: Option<String>,
    /// Listing continuation token while a full sync is in progress
    #[serde(default)]
    pub page_cursor: Option<String>,
    /// When a sync last completed
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    pub fn new(key: &AccountKey, schema_version: u32) -> Self {
        Self {
            user_id: key.user_id.clone(),
            workspace_id: key.workspace_id.clone(),
            schema_version,
            history_cursor: None,
            page_cursor: None,
            last_synced_at: None,
        }
    }

    /// Numeric value of the history cursor
    pub fn history_id(&self) -> Option<u64> {
        self.history_cursor.as_deref().and_then(parse_history_id)
    }
}

pub fn parse_history_id(cursor: &str) -> Option<u64> {
    cursor.trim().parse().ok()
}

/// Order two history cursors
///
/// Numeric cursors compare by value; anything else cannot be ordered.
pub fn compare_cursors(candidate: &str, current: &str) -> Option<Ordering> {
    match (parse_history_id(candidate), parse_history_id(current)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ if candidate == current => Some(Ordering::Equal),
        _ => None,
    }
}
