//! Per-invocation sync statistics

use crate::ingest::StoreSummary;

/// Which path a sync invocation took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Unfiltered walk of the whole mailbox
    Full,
    /// Query-filtered walk; never moves the history cursor
    Backfill,
    HistoryWalk,
    ListRecent,
}

/// Statistics from one sync invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// An incremental sync found its cursor unusable and ran a full sync instead
    pub fell_back: bool,
    /// `close()` stopped the invocation early
    pub cancelled: bool,
    /// Number of message ids collected by listing
    pub listed: usize,
    /// Number of full messages fetched
    pub fetched: usize,
    pub drafts: usize,
    /// Fetched messages that matched no conversation target
    pub unrouted: usize,
    /// Messages whose fetch or ingestion failed and were skipped
    pub failed: usize,
    pub store: StoreSummary,
    pub cursor_before: Option<String>,
    pub cursor_after: Option<String>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn new(mode: SyncMode, cursor_before: Option<String>) -> Self {
        Self {
            mode,
            fell_back: false,
            cancelled: false,
            listed: 0,
            fetched: 0,
            drafts: 0,
            unrouted: 0,
            failed: 0,
            store: StoreSummary::default(),
            cursor_after: cursor_before.clone(),
            cursor_before,
            duration_ms: 0,
        }
    }

    pub fn cursor_advanced(&self) -> bool {
        self.cursor_after != self.cursor_before
    }
}
