//! Per-account sync state machine
//!
//! ```text
//! Idle ──► FullSync ──► Idle
//!   └────► IncrementalSync ──► Idle
//!              └─(cursor invalid)─► FullSync
//! any ──close()──► Closing
//! ```
//!
//! The checkpoint is written only after the unit of work it covers has been
//! ingested, so a crash or timeout at any point leaves it at or behind the
//! data that is actually stored.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::report::{SyncMode, SyncReport};
use crate::checkpoint::SyncCheckpointStore;
use crate::error::{ProviderError, SyncError};
use crate::ingest::{IngestOptions, IngestOutcome, MessageIngestor};
use crate::models::{AccountKey, IncrementalStrategy, parse_history_id};
use crate::provider::{HistoryRequest, ListRequest, MailProvider, RawMessage};

/// Default number of ids requested per listing page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Where the orchestrator currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    FullSync,
    IncrementalSync,
    Closing,
}

/// Caller options for one sync invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Suppress downstream notifications (bulk backfill)
    pub no_notify: bool,
}

impl From<SyncOptions> for IngestOptions {
    fn from(options: SyncOptions) -> Self {
        IngestOptions {
            no_notify: options.no_notify,
        }
    }
}

/// Result of fetching and ingesting one message
enum Processed {
    /// Ingested, skipped as a draft, or matched no target; carries its history id
    Handled(Option<u64>),
    /// Fetch or ingestion failed; already logged
    Failed,
}

/// Returns the state to `Idle` when an invocation ends, including when a
/// timeout drops it mid-run
struct IdleOnDrop<'a>(&'a SyncOrchestrator);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.0.is_closing() {
            self.0.set_state(SyncState::Idle);
        }
    }
}

/// Incremental sync engine for one account
pub struct SyncOrchestrator {
    account: AccountKey,
    address: String,
    provider: Arc<dyn MailProvider>,
    ingestor: Arc<dyn MessageIngestor>,
    checkpoints: Arc<SyncCheckpointStore>,
    incremental: IncrementalStrategy,
    page_size: u32,
    /// Serializes invocations; a second `sync` waits for the first
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<SyncState>,
    closing: AtomicBool,
}

impl SyncOrchestrator {
    /// `provider` should already be throttled by the account's limiter
    pub fn new(
        account: AccountKey,
        address: impl Into<String>,
        provider: Arc<dyn MailProvider>,
        ingestor: Arc<dyn MessageIngestor>,
        checkpoints: Arc<SyncCheckpointStore>,
    ) -> Self {
        Self {
            account,
            address: address.into(),
            provider,
            ingestor,
            checkpoints,
            incremental: IncrementalStrategy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            run_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SyncState::Idle),
            closing: AtomicBool::new(false),
        }
    }

    pub fn with_incremental(mut self, strategy: IncrementalStrategy) -> Self {
        self.incremental = strategy;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn account(&self) -> &AccountKey {
        &self.account
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn incremental_strategy(&self) -> IncrementalStrategy {
        self.incremental
    }

    pub fn state(&self) -> SyncState {
        if self.is_closing() {
            return SyncState::Closing;
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop at the next page or message boundary
    ///
    /// A message fetch already in flight is finished and ingested first.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            info!("[{}] Closing sync orchestrator", self.account);
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Wait for a running invocation to return or be dropped
    pub async fn wait_idle(&self) {
        let _running = self.run_lock.lock().await;
    }

    /// Sync new mail: incremental when a cursor exists, full otherwise
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let _running = self.run_lock.lock().await;
        let _state = IdleOnDrop(self);
        let started = Instant::now();

        let cursor = self
            .checkpoints
            .get_checkpoint(&self.account)
            .await
            .map_err(SyncError::Checkpoint)?
            .and_then(|c| c.history_cursor);

        let result = match cursor {
            None => {
                info!("[{}] No history cursor, starting full sync", self.account);
                let mut report = SyncReport::new(SyncMode::Full, None);
                self.run_full(None, options, &mut report)
                    .await
                    .map(|()| report)
            }
            Some(cursor) => self.run_incremental(cursor, options).await,
        };

        self.finish(result, started).await
    }

    /// Walk the whole mailbox, optionally filtered by a provider query
    ///
    /// A filtered walk is a backfill and never touches the history cursor.
    pub async fn full_sync(
        &self,
        query: Option<&str>,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let _running = self.run_lock.lock().await;
        let _state = IdleOnDrop(self);
        let started = Instant::now();

        let cursor = self
            .checkpoints
            .get_checkpoint(&self.account)
            .await
            .map_err(SyncError::Checkpoint)?
            .and_then(|c| c.history_cursor);
        let mode = if query.is_some() {
            SyncMode::Backfill
        } else {
            SyncMode::Full
        };
        let mut report = SyncReport::new(mode, cursor);
        let result = self
            .run_full(query, options, &mut report)
            .await
            .map(|()| report);

        self.finish(result, started).await
    }

    async fn finish(
        &self,
        result: Result<SyncReport, SyncError>,
        started: Instant,
    ) -> Result<SyncReport, SyncError> {
        let mut report = result?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        if !report.cancelled {
            self.checkpoints
                .mark_synced(&self.account)
                .await
                .map_err(SyncError::Checkpoint)?;
        }

        info!(
            "[{}] {:?} sync {}: {} fetched, {} created, {} updated, {} failed, cursor {:?} -> {:?} in {}ms",
            self.account,
            report.mode,
            if report.cancelled { "cancelled" } else { "done" },
            report.fetched,
            report.store.created,
            report.store.updated,
            report.failed,
            report.cursor_before,
            report.cursor_after,
            report.duration_ms
        );
        Ok(report)
    }

    async fn run_incremental(
        &self,
        cursor: String,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        self.set_state(SyncState::IncrementalSync);
        match self.incremental {
            IncrementalStrategy::HistoryWalk => self.history_walk(cursor, options).await,
            IncrementalStrategy::ListRecent => self.list_recent(cursor, options).await,
        }
    }

    /// Clear the unusable cursor and run a full sync in the same invocation
    async fn fall_back_to_full(
        &self,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.checkpoints
            .clear_history_cursor(&self.account)
            .await
            .map_err(SyncError::Checkpoint)?;
        report.mode = SyncMode::Full;
        report.fell_back = true;
        report.cursor_after = None;
        self.run_full(None, options, report).await
    }

    async fn full_listing(
        &self,
        query: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<Option<Vec<String>>, SyncError> {
        let tracks_cursor = query.is_none();
        if tracks_cursor
            && let Some(stale) = self
                .checkpoints
                .get_page_cursor(&self.account)
                .await
                .map_err(SyncError::Checkpoint)?
        {
            info!(
                "[{}] Previous listing was interrupted at page {}, listing again from the start",
                self.account, stale
            );
        }

        let mut ids = Vec::new();
        let mut request = ListRequest::first(query, self.page_size);
        loop {
            if self.is_closing() {
                return Ok(None);
            }

            let page = self
                .provider
                .list_message_ids(&request)
                .await
                .map_err(|e| self.listing_failed(e))?;
            ids.extend(page.messages.into_iter().map(|m| m.id));

            let Some(token) = page.next_page_token else {
                break;
            };
            if tracks_cursor {
                self.checkpoints
                    .set_page_cursor(&self.account, &token)
                    .await
                    .map_err(SyncError::Checkpoint)?;
            }
            request = request.next_page(token);
        }

        if tracks_cursor {
            self.checkpoints
                .clear_page_cursor(&self.account)
                .await
                .map_err(SyncError::Checkpoint)?;
        }
        report.listed = ids.len();
        Ok(Some(ids))
    }

    async fn run_full(
        &self,
        query: Option<&str>,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.set_state(SyncState::FullSync);
        let tracks_cursor = query.is_none();

        let Some(ids) = self.full_listing(query, report).await? else {
            report.cancelled = true;
            return Ok(());
        };
        debug!(
            "[{}] Listed {} messages{}",
            self.account,
            ids.len(),
            query.map(|q| format!(" for {}", q)).unwrap_or_default()
        );

        // Oldest first, so the cursor always covers a contiguous prefix
        let mut max_history: Option<u64> = None;
        for id in ids.iter().rev() {
            if self.is_closing() {
                report.cancelled = true;
                return Ok(());
            }

            let Processed::Handled(Some(history_id)) = self.process(id, options, report).await?
            else {
                continue;
            };
            if !tracks_cursor || max_history.is_some_and(|max| history_id <= max) {
                continue;
            }
            max_history = Some(history_id);
            self.advance_cursor(history_id.to_string(), report).await?;
        }
        Ok(())
    }

    async fn history_walk(
        &self,
        cursor: String,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(SyncMode::HistoryWalk, Some(cursor.clone()));
        let mut request = HistoryRequest::first(cursor);

        loop {
            if self.is_closing() {
                report.cancelled = true;
                return Ok(report);
            }

            let page = match self.provider.list_history(&request).await {
                Ok(page) => page,
                Err(ProviderError::CursorInvalid) => {
                    warn!(
                        "[{}] History cursor {} rejected, falling back to full sync",
                        self.account, request.start_cursor
                    );
                    self.fall_back_to_full(options, &mut report).await?;
                    return Ok(report);
                }
                Err(e) => return Err(self.listing_failed(e)),
            };

            for entry in page.entries {
                for added in &entry.messages_added {
                    report.listed += 1;
                    if added.is_draft() {
                        report.drafts += 1;
                        continue;
                    }
                    if self.is_closing() {
                        report.cancelled = true;
                        return Ok(report);
                    }
                    self.process(&added.id, options, &mut report).await?;
                }
                self.advance_cursor(entry.id, &mut report).await?;
            }

            match page.next_page_token {
                Some(token) => request = request.next_page(token),
                None => return Ok(report),
            }
        }
    }

    /// Newest-first listing that stops at the first already-synced message
    async fn list_recent(
        &self,
        cursor: String,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(SyncMode::ListRecent, Some(cursor.clone()));
        let Some(boundary) = parse_history_id(&cursor) else {
            warn!(
                "[{}] History cursor {:?} is not numeric, falling back to full sync",
                self.account, cursor
            );
            self.fall_back_to_full(options, &mut report).await?;
            return Ok(report);
        };

        let mut max_history: Option<u64> = None;
        let mut request = ListRequest::first(None, self.page_size);
        'pages: loop {
            if self.is_closing() {
                report.cancelled = true;
                return Ok(report);
            }

            let page = self
                .provider
                .list_message_ids(&request)
                .await
                .map_err(|e| self.listing_failed(e))?;

            for listed in page.messages {
                if self.is_closing() {
                    report.cancelled = true;
                    return Ok(report);
                }
                report.listed += 1;

                // A listing that carries history ids decides without a fetch
                if let Some(history_id) = listed.history_id
                    && history_id <= boundary
                {
                    self.reached_boundary(&listed.id, history_id, boundary);
                    break 'pages;
                }

                let Some(raw) = self.fetch(&listed.id, &mut report).await? else {
                    continue;
                };
                if raw.is_draft() {
                    report.drafts += 1;
                    continue;
                }
                let history = raw.history_id().or(listed.history_id);
                if let Some(history_id) = history
                    && history_id <= boundary
                {
                    self.reached_boundary(&listed.id, history_id, boundary);
                    break 'pages;
                }

                if let Processed::Handled(_) = self.ingest(&raw, options, &mut report).await
                    && let Some(history_id) = history
                {
                    max_history = max_history.max(Some(history_id));
                }
            }

            match page.next_page_token {
                Some(token) => request = request.next_page(token),
                None => break,
            }
        }

        match max_history {
            Some(history_id) if history_id > boundary => {
                self.advance_cursor(history_id.to_string(), &mut report)
                    .await?;
            }
            _ => info!(
                "[{}] No new messages past cursor {}, no update needed",
                self.account, boundary
            ),
        }
        Ok(report)
    }

    fn reached_boundary(&self, id: &str, history_id: u64, boundary: u64) {
        debug!(
            "[{}] Reached synced message {} (history {} <= {})",
            self.account, id, history_id, boundary
        );
    }

    /// Fetch one message and hand it to the ingestor
    ///
    /// Only an authorization failure escapes; anything else is logged and
    /// counted so the walk can continue.
    async fn process(
        &self,
        id: &str,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<Processed, SyncError> {
        match self.fetch(id, report).await? {
            Some(raw) => Ok(self.ingest(&raw, options, report).await),
            None => Ok(Processed::Failed),
        }
    }

    /// `None` when the fetch failed and was counted
    async fn fetch(
        &self,
        id: &str,
        report: &mut SyncReport,
    ) -> Result<Option<RawMessage>, SyncError> {
        match self.provider.get_message(id).await {
            Ok(raw) => {
                report.fetched += 1;
                Ok(Some(raw))
            }
            Err(ProviderError::FatalAuth(reason)) => Err(SyncError::Unauthorized(reason)),
            Err(e) => {
                warn!("[{}] Failed to fetch message {}: {}", self.account, id, e);
                report.failed += 1;
                Ok(None)
            }
        }
    }

    async fn ingest(
        &self,
        raw: &RawMessage,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Processed {
        match self
            .ingestor
            .ingest(raw, &self.address, options.into())
            .await
        {
            Ok(IngestOutcome::Draft) => report.drafts += 1,
            Ok(IngestOutcome::NoTarget) => report.unrouted += 1,
            Ok(IngestOutcome::Stored(summary)) => report.store += summary,
            Err(e) => {
                warn!(
                    "[{}] Failed to ingest message {}: {:#}",
                    self.account, raw.id, e
                );
                report.failed += 1;
                return Processed::Failed;
            }
        }
        Processed::Handled(raw.history_id())
    }

    async fn advance_cursor(&self, cursor: String, report: &mut SyncReport) -> Result<(), SyncError> {
        let advanced = self
            .checkpoints
            .set_history_cursor(&self.account, &cursor)
            .await
            .map_err(SyncError::Checkpoint)?;
        if advanced {
            report.cursor_after = Some(cursor);
        }
        Ok(())
    }

    fn listing_failed(&self, error: ProviderError) -> SyncError {
        match error {
            ProviderError::FatalAuth(reason) => SyncError::Unauthorized(reason),
            other => {
                warn!("[{}] Listing failed, ending this sync: {}", self.account, other);
                SyncError::Provider(other)
            }
        }
    }
}
