//! Per-account background tasks

use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

use super::SupervisorInner;
use crate::error::{ProviderError, SyncError};
use crate::models::AccountKey;
use crate::provider::MailProvider;
use crate::sync::{SyncOptions, SyncOrchestrator, SyncReport};

/// Work queued for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Command {
    Sync(SyncOptions),
    /// Query-filtered full sync
    Backfill(String),
}

/// Run one invocation under a hard timeout
///
/// Hitting the timeout drops the future; the checkpoint keeps whatever was
/// durably written before that.
pub(super) async fn with_timeout<F>(timeout: Duration, sync: F) -> Result<SyncReport, SyncError>
where
    F: Future<Output = Result<SyncReport, SyncError>>,
{
    tokio::time::timeout(timeout, sync)
        .await
        .unwrap_or(Err(SyncError::TimedOut(timeout)))
}

/// Ask the supervisor to sign an account out after its credential was rejected
pub(super) fn request_signout(supervisor: &Weak<SupervisorInner>, key: &AccountKey) {
    let Some(inner) = supervisor.upgrade() else {
        return;
    };
    let key = key.clone();
    tokio::spawn(async move {
        if let Err(e) = inner.signout(&key, true).await {
            error!("[{}] Sign-out after authorization failure failed: {}", key, e);
        }
    });
}

/// Consumes the account's command queue until it closes
pub(super) struct SyncWorker {
    pub key: AccountKey,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub sync_pending: Arc<AtomicBool>,
    pub timeout: Duration,
    pub supervisor: Weak<SupervisorInner>,
}

impl SyncWorker {
    pub async fn run(self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            if self.orchestrator.is_closing() {
                break;
            }

            let result = match command {
                Command::Sync(options) => {
                    // Pushes arriving from here on queue another run
                    self.sync_pending.store(false, Ordering::SeqCst);
                    with_timeout(self.timeout, self.orchestrator.sync(options)).await
                }
                Command::Backfill(query) => {
                    let options = SyncOptions { no_notify: true };
                    with_timeout(
                        self.timeout,
                        self.orchestrator.full_sync(Some(&query), options),
                    )
                    .await
                }
            };

            match result {
                Ok(report) => debug!(
                    "[{}] {:?} sync finished, {} messages fetched",
                    self.key, report.mode, report.fetched
                ),
                Err(e) if e.is_unauthorized() => {
                    error!("[{}] {}; signing the account out", self.key, e);
                    request_signout(&self.supervisor, &self.key);
                    break;
                }
                Err(e) => warn!("[{}] Sync failed: {}", self.key, e),
            }
        }
        debug!("[{}] Sync worker stopped", self.key);
    }
}

/// Re-registers the push watch now and then every `interval`
///
/// Gmail expires a watch after seven days; renewing daily keeps it alive.
pub(super) async fn run_watch(
    key: AccountKey,
    provider: Arc<dyn MailProvider>,
    topic: String,
    interval: Duration,
    supervisor: Weak<SupervisorInner>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match provider.watch(&topic).await {
            Ok(result) => info!(
                "[{}] Watching {} (history {:?}, expires {:?})",
                key, topic, result.history_id, result.expiration
            ),
            Err(ProviderError::FatalAuth(reason)) => {
                error!("[{}] Watch rejected: {}; signing the account out", key, reason);
                request_signout(&supervisor, &key);
                return;
            }
            Err(e) => warn!("[{}] Failed to register watch: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncrementalStrategy;
    use crate::provider::{AddedMessage, HistoryEntry, MessageRef};
    use crate::sync::SyncState;
    use crate::sync::test_support::{ScriptedProvider, cursor, fixture, with_messages};

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_last_durable_cursor() {
        let mut provider = with_messages(
            ScriptedProvider::default(),
            &[("m1", 10), ("m2", 20), ("m3", 30)],
        );
        provider.listing = vec![
            MessageRef::new("m3"),
            MessageRef::new("m2"),
            MessageRef::new("m1"),
        ];
        provider.history = Some(vec![HistoryEntry {
            id: "30".into(),
            messages_added: vec![AddedMessage {
                id: "m3".into(),
                label_ids: vec!["INBOX".into()],
            }],
        }]);
        provider.fetch_delay = Some(Duration::from_millis(100));
        let fixture = fixture(provider, IncrementalStrategy::HistoryWalk);

        // m1 and m2 land before the deadline, m3 is still being fetched
        let err = with_timeout(
            Duration::from_millis(250),
            fixture.orchestrator.sync(SyncOptions::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::TimedOut(_)));
        assert_eq!(cursor(&fixture).await.as_deref(), Some("20"));
        assert_eq!(fixture.store.records().len(), 2);
        assert_eq!(fixture.orchestrator.state(), SyncState::Idle);

        let report = with_timeout(
            Duration::from_secs(5),
            fixture.orchestrator.sync(SyncOptions::default()),
        )
        .await
        .unwrap();
        assert_eq!(report.cursor_before.as_deref(), Some("20"));
        assert_eq!(cursor(&fixture).await.as_deref(), Some("30"));
        assert_eq!(fixture.store.records().len(), 3);
    }
}
