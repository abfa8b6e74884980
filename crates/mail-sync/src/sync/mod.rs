//! Sync engine for fetching and storing mail
//!
//! Every operation is safe to retry: ingestion is idempotent and the
//! checkpoint never runs ahead of stored data.

mod orchestrator;
mod report;
mod timing;

#[cfg(test)]
pub(crate) use orchestrator::test_support;
pub use orchestrator::{DEFAULT_PAGE_SIZE, SyncOptions, SyncOrchestrator, SyncState};
pub use report::{SyncMode, SyncReport};
pub use timing::is_stale;
