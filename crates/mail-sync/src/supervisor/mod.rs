//! Multi-account sync supervision
//!
//! The supervisor owns, per connected account, a rate limiter, a throttled
//! provider, an orchestrator, a worker task that runs queued syncs one at a
//! time, and optionally a task that keeps the push watch registered.
//!
//! Push notifications and conversation-target backfills are routed to
//! worker queues. An account whose credential is rejected is signed out and
//! reported to the [`AccountLifecycle`] collaborator.

mod lifecycle;
mod push;
mod slot;
mod worker;

pub use lifecycle::{AccountLifecycle, LoggingLifecycle};
pub use push::PushNotification;
pub use slot::SupervisorSlot;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::checkpoint::SyncCheckpointStore;
use crate::config::SyncConfig;
use crate::error::SupervisorError;
use crate::ingest::{IngestContext, build_ingestor};
use crate::models::{AccountKey, AccountSetup, normalize_address};
use crate::provider::{MailProvider, ThrottledProvider};
use crate::storage::{BlobStore, ConversationDirectory, MessageStore};
use crate::sync::{SyncOptions, SyncOrchestrator, SyncReport, SyncState, is_stale};
use slot::SlotGuard;
use worker::{Command, SyncWorker};

/// Shared collaborators for every account
#[derive(Clone)]
pub struct SupervisorDeps {
    pub config: SyncConfig,
    pub checkpoints: Arc<SyncCheckpointStore>,
    pub store: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub directory: Arc<dyn ConversationDirectory>,
    pub lifecycle: Arc<dyn AccountLifecycle>,
}

/// Snapshot of one account's sync health
#[derive(Debug, Clone, PartialEq)]
pub struct AccountStatus {
    pub key: AccountKey,
    pub address: String,
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub history_cursor: Option<String>,
    pub stale: bool,
    /// Quota units currently in the account's bucket
    pub available_quota: f64,
}

struct AccountHandle {
    address: String,
    orchestrator: Arc<SyncOrchestrator>,
    provider: Arc<ThrottledProvider>,
    commands: mpsc::Sender<Command>,
    sync_pending: Arc<AtomicBool>,
    worker: JoinHandle<()>,
    watch: Option<JoinHandle<()>>,
}

impl AccountHandle {
    /// Queue an incremental sync unless one is already waiting
    fn request_sync(&self, key: &AccountKey, options: SyncOptions) -> bool {
        if self.sync_pending.swap(true, Ordering::SeqCst) {
            debug!("[{}] Sync already queued, coalescing", key);
            return false;
        }
        match self.commands.try_send(Command::Sync(options)) {
            Ok(()) => true,
            Err(e) => {
                self.sync_pending.store(false, Ordering::SeqCst);
                warn!("[{}] Could not queue sync: {}", key, describe(&e));
                false
            }
        }
    }

    fn request_backfill(&self, key: &AccountKey, query: &str) -> bool {
        match self.commands.try_send(Command::Backfill(query.to_string())) {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] Could not queue backfill: {}", key, describe(&e));
                false
            }
        }
    }

    /// Signal shutdown; the worker finishes its current message and exits
    fn shut_down(&self) {
        self.orchestrator.close();
        if let Some(watch) = &self.watch {
            watch.abort();
        }
    }
}

fn describe<T>(error: &TrySendError<T>) -> &'static str {
    match error {
        TrySendError::Full(_) => "queue full",
        TrySendError::Closed(_) => "worker stopped",
    }
}

pub(crate) struct SupervisorInner {
    deps: SupervisorDeps,
    accounts: Mutex<HashMap<AccountKey, AccountHandle>>,
    closing: AtomicBool,
}

impl SupervisorInner {
    fn accounts(&self) -> MutexGuard<'_, HashMap<AccountKey, AccountHandle>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_account(&self, key: &AccountKey) -> Option<AccountHandle> {
        self.accounts().remove(key)
    }

    /// Stop an account's tasks and wait for its worker to exit
    async fn retire(&self, key: &AccountKey, handle: AccountHandle, stop_watch: bool) {
        handle.shut_down();
        if stop_watch
            && handle.watch.is_some()
            && let Err(e) = handle.provider.stop().await
        {
            warn!("[{}] Failed to stop watch: {}", key, e);
        }
        let AccountHandle {
            orchestrator,
            commands,
            worker,
            ..
        } = handle;
        drop(commands);
        if let Err(e) = worker.await
            && !e.is_cancelled()
        {
            warn!("[{}] Sync worker ended abnormally: {}", key, e);
        }
        // An inline `sync_account` run may still hold the orchestrator
        orchestrator.wait_idle().await;
    }

    async fn remove_account(&self, key: &AccountKey) -> Result<(), SupervisorError> {
        let handle = self
            .take_account(key)
            .ok_or_else(|| SupervisorError::UnknownAccount(key.to_string()))?;
        info!("[{}] Removing account", key);
        self.retire(key, handle, true).await;
        self.deps.checkpoints.delete_checkpoint(key).await?;
        Ok(())
    }

    async fn signout(&self, key: &AccountKey, by_error: bool) -> Result<(), SupervisorError> {
        match self.remove_account(key).await {
            Ok(()) | Err(SupervisorError::UnknownAccount(_)) => {}
            Err(e) => return Err(e),
        }
        if by_error {
            self.deps.lifecycle.disable(key).await?;
        } else {
            self.deps.lifecycle.remove(key).await?;
        }
        Ok(())
    }
}

/// Runs and supervises sync for every connected account
pub struct AccountSyncSupervisor {
    inner: Arc<SupervisorInner>,
    _slot: SlotGuard,
}

impl AccountSyncSupervisor {
    /// Create the supervisor holding `slot`
    ///
    /// Fails with [`SupervisorError::AlreadyExists`] while another supervisor
    /// holds the same slot.
    pub fn new(slot: &SupervisorSlot, deps: SupervisorDeps) -> Result<Self, SupervisorError> {
        let guard = slot.claim()?;
        Ok(Self {
            inner: Arc::new(SupervisorInner {
                deps,
                accounts: Mutex::new(HashMap::new()),
                closing: AtomicBool::new(false),
            }),
            _slot: guard,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.deps.config
    }

    pub fn account_keys(&self) -> Vec<AccountKey> {
        let mut keys: Vec<_> = self.inner.accounts().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Start syncing an account and queue its first sync
    ///
    /// An account already running under the same key is shut down first;
    /// the new worker starts only after the old one has stopped.
    pub async fn add_account(
        &self,
        setup: AccountSetup,
        provider: Arc<dyn MailProvider>,
    ) -> Result<(), SupervisorError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(SupervisorError::Closed);
        }

        let deps = &self.inner.deps;
        let config = &deps.config;
        let key = setup.key.clone();
        if let Some(previous) = self.inner.take_account(&key) {
            info!("[{}] Replacing running account", key);
            self.inner.retire(&key, previous, false).await;
        }

        let address = normalize_address(&setup.address);
        let ingestion = setup.ingestion.unwrap_or(config.ingestion);
        let incremental = setup.incremental.unwrap_or(config.incremental);

        let limiter = Arc::new(config.rate_limiter());
        let throttled = Arc::new(ThrottledProvider::new(provider, limiter));
        let ingestor = build_ingestor(
            ingestion,
            IngestContext {
                store: deps.store.clone(),
                blobs: deps.blobs.clone(),
                directory: deps.directory.clone(),
                provider: throttled.clone(),
            },
        );
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                key.clone(),
                address.clone(),
                throttled.clone(),
                ingestor,
                deps.checkpoints.clone(),
            )
            .with_incremental(incremental)
            .with_page_size(config.page_size),
        );

        let (commands, receiver) = mpsc::channel(config.queue_depth);
        let sync_pending = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(
            SyncWorker {
                key: key.clone(),
                orchestrator: orchestrator.clone(),
                sync_pending: sync_pending.clone(),
                timeout: config.sync_timeout(),
                supervisor: Arc::downgrade(&self.inner),
            }
            .run(receiver),
        );
        let watch = config.watch_topic.clone().map(|topic| {
            tokio::spawn(worker::run_watch(
                key.clone(),
                throttled.clone(),
                topic,
                config.watch_interval(),
                Arc::downgrade(&self.inner),
            ))
        });

        let handle = AccountHandle {
            address,
            orchestrator,
            provider: throttled,
            commands,
            sync_pending,
            worker,
            watch,
        };
        handle.request_sync(&key, SyncOptions::default());

        info!(
            "[{}] Added account {} ({:?} ingestion, {:?} incremental)",
            key, handle.address, ingestion, incremental
        );
        let raced = self.inner.accounts().insert(key.clone(), handle);
        if let Some(previous) = raced {
            warn!("[{}] Account was added twice at once, keeping the newer one", key);
            self.inner.retire(&key, previous, false).await;
        }
        Ok(())
    }

    /// Stop syncing an account, drop its watch and delete its checkpoint
    pub async fn remove_account(&self, key: &AccountKey) -> Result<(), SupervisorError> {
        self.inner.remove_account(key).await
    }

    /// Remove an account and tell the lifecycle owner
    ///
    /// `by_error` means the credential was rejected and the account should be
    /// disabled rather than deleted.
    pub async fn signout(&self, key: &AccountKey, by_error: bool) -> Result<(), SupervisorError> {
        self.inner.signout(key, by_error).await
    }

    /// Route a Pub/Sub push payload to every account with that address
    ///
    /// Returns the number of syncs queued.
    pub fn push(&self, data: &str) -> Result<usize, SupervisorError> {
        let notification = PushNotification::decode(data)?;
        let accounts = self.inner.accounts();
        let matching: Vec<_> = accounts
            .iter()
            .filter(|(_, handle)| handle.address == notification.address)
            .collect();

        if matching.is_empty() {
            warn!(
                "Push for unknown address {} (history {:?}), ignoring",
                notification.address, notification.history_id
            );
            return Ok(0);
        }

        let queued = matching
            .into_iter()
            .filter(|(key, handle)| handle.request_sync(key, SyncOptions::default()))
            .count();
        debug!(
            "Push for {} (history {:?}) queued {} syncs",
            notification.address, notification.history_id, queued
        );
        Ok(queued)
    }

    /// Queue an incremental sync on every account
    pub fn sync_all(&self, options: SyncOptions) -> usize {
        self.inner
            .accounts()
            .iter()
            .filter(|(key, handle)| handle.request_sync(key, options))
            .count()
    }

    /// Run one sync for an account now and wait for it
    ///
    /// Serialized with the account's queued syncs. An authorization failure
    /// signs the account out before the error is returned.
    pub async fn sync_account(
        &self,
        key: &AccountKey,
        options: SyncOptions,
    ) -> Result<SyncReport, SupervisorError> {
        let orchestrator = self
            .inner
            .accounts()
            .get(key)
            .map(|h| h.orchestrator.clone())
            .ok_or_else(|| SupervisorError::UnknownAccount(key.to_string()))?;

        let timeout = self.inner.deps.config.sync_timeout();
        match worker::with_timeout(timeout, orchestrator.sync(options)).await {
            Ok(report) => Ok(report),
            Err(e) if e.is_unauthorized() => {
                self.inner.signout(key, true).await?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sweep every account's history for mail exchanged with a new address
    ///
    /// Returns the number of backfills queued.
    pub fn new_conversation_target(&self, address: &str) -> usize {
        let address = normalize_address(address);
        if address.is_empty() {
            return 0;
        }
        let query = format!("{{from:{a} to:{a} cc:{a} bcc:{a}}}", a = address);
        self.inner
            .accounts()
            .iter()
            .filter(|(key, handle)| handle.request_backfill(key, &query))
            .count()
    }

    pub async fn status(&self, key: &AccountKey) -> Result<AccountStatus, SupervisorError> {
        let (address, state, available_quota) = {
            let accounts = self.inner.accounts();
            let handle = accounts
                .get(key)
                .ok_or_else(|| SupervisorError::UnknownAccount(key.to_string()))?;
            (
                handle.address.clone(),
                handle.orchestrator.state(),
                handle.provider.limiter().available(),
            )
        };

        let checkpoint = self.inner.deps.checkpoints.get_checkpoint(key).await?;
        let last_synced_at = checkpoint.as_ref().and_then(|c| c.last_synced_at);
        Ok(AccountStatus {
            key: key.clone(),
            address,
            state,
            last_synced_at,
            history_cursor: checkpoint.and_then(|c| c.history_cursor),
            stale: is_stale(last_synced_at, self.inner.deps.config.stale_after_secs),
            available_quota,
        })
    }

    /// Cooperative shutdown of every account
    ///
    /// Each worker finishes the message it is on; watches stay registered
    /// and expire on their own.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.inner.accounts().drain().collect();
        info!("Closing sync supervisor ({} accounts)", handles.len());
        for (key, handle) in handles {
            self.inner.retire(&key, handle, false).await;
        }
    }
}

impl Drop for AccountSyncSupervisor {
    fn drop(&mut self) {
        for handle in self.inner.accounts().values() {
            handle.shut_down();
        }
    }
}
