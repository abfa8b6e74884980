//! Staleness of an account's last completed sync
//!
//! Pure functions that can be tested without a running supervisor.

use chrono::{DateTime, Utc};

/// Check whether an account's data is older than `stale_after_secs`
///
/// An account that never completed a sync is always stale.
pub fn is_stale(last_synced_at: Option<DateTime<Utc>>, stale_after_secs: u64) -> bool {
    is_stale_at(last_synced_at, stale_after_secs, Utc::now())
}

pub(crate) fn is_stale_at(
    last_synced_at: Option<DateTime<Utc>>,
    stale_after_secs: u64,
    now: DateTime<Utc>,
) -> bool {
    match last_synced_at {
        Some(last) => (now - last).num_seconds() >= stale_after_secs as i64,
        None => true,
    }
}
