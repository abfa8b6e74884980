//! Integration tests for the mail sync engine
//!
//! These drive the public API end to end against an in-memory mailbox and a
//! real SQLite store.

mod support;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mail_sync::checkpoint::SqliteKeyValueStore;
use mail_sync::ingest::IngestContext;
use mail_sync::{
    AccountKey, AccountLifecycle, AccountSetup, AccountSyncSupervisor, ConversationTarget,
    Database, FileBlobStore, IncrementalStrategy, InMemoryDirectory, IngestionStrategy,
    MessageStore, SqliteMessageStore, SupervisorDeps, SupervisorError, SupervisorSlot,
    SyncCheckpointStore, SyncConfig, SyncMode, SyncOptions, SyncOrchestrator, SyncState,
    build_ingestor,
};
use support::*;

/// One account wired to SQLite, a blob directory and a fake mailbox
struct Engine {
    mailbox: Arc<FakeMailbox>,
    store: Arc<SqliteMessageStore>,
    checkpoints: Arc<SyncCheckpointStore>,
    directory: Arc<InMemoryDirectory>,
    blobs: Arc<FileBlobStore>,
    account: AccountKey,
    _blob_dir: TempDir,
}

impl Engine {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let blob_dir = TempDir::new().unwrap();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.insert(ConversationTarget::channel("chan-alice", ALICE));
        directory.insert(ConversationTarget::mailbox("box-me", ME));

        Self {
            mailbox: Arc::new(FakeMailbox::new()),
            store: Arc::new(SqliteMessageStore::new(db.clone())),
            checkpoints: Arc::new(SyncCheckpointStore::new(
                Arc::new(SqliteKeyValueStore::new(db)),
                1,
            )),
            directory,
            blobs: Arc::new(FileBlobStore::new(blob_dir.path()).unwrap()),
            account: AccountKey::new("user-1", "ws-1"),
            _blob_dir: blob_dir,
        }
    }

    fn orchestrator(
        &self,
        ingestion: IngestionStrategy,
        incremental: IncrementalStrategy,
    ) -> SyncOrchestrator {
        let ingestor = build_ingestor(
            ingestion,
            IngestContext {
                store: self.store.clone(),
                blobs: self.blobs.clone(),
                directory: self.directory.clone(),
                provider: self.mailbox.clone(),
            },
        );
        SyncOrchestrator::new(
            self.account.clone(),
            ME,
            self.mailbox.clone(),
            ingestor,
            self.checkpoints.clone(),
        )
        .with_incremental(incremental)
        .with_page_size(2)
    }

    fn channels(&self) -> SyncOrchestrator {
        self.orchestrator(IngestionStrategy::V1, IncrementalStrategy::HistoryWalk)
    }

    async fn cursor(&self) -> Option<String> {
        self.checkpoints
            .get_checkpoint(&self.account)
            .await
            .unwrap()
            .and_then(|c| c.history_cursor)
    }

    async fn record_html(&self, id: &str, target: &str) -> Option<String> {
        self.store
            .find_by_provider_id_and_target(&format!("<{}@mail.example.com>", id), target)
            .await
            .unwrap()
            .map(|r| r.html_content)
    }
}

#[tokio::test]
async fn test_full_then_incremental_sync() {
    let engine = Engine::new();
    for (id, history) in [("m1", 10), ("m2", 11), ("m3", 12)] {
        engine.mailbox.deliver(incoming(id, history, ALICE));
    }
    let orchestrator = engine.channels();

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(report.listed, 3);
    assert_eq!(report.store.created, 3);
    assert_eq!(engine.cursor().await.as_deref(), Some("12"));
    assert_eq!(engine.store.count().await.unwrap(), 3);
    // Two pages of two; the page cursor is gone once listing finishes
    assert_eq!(engine.mailbox.count_calls("list:"), 2);
    assert_eq!(
        engine.checkpoints.get_page_cursor(&engine.account).await.unwrap(),
        None
    );

    engine.mailbox.deliver(incoming("m4", 15, ALICE));
    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.mode, SyncMode::HistoryWalk);
    assert_eq!(report.fetched, 1);
    assert_eq!(report.cursor_after.as_deref(), Some("15"));
    assert_eq!(engine.store.count().await.unwrap(), 4);

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert!(!report.cursor_advanced());
    assert_eq!(orchestrator.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_resync_does_not_duplicate_records() {
    let engine = Engine::new();
    engine.mailbox.deliver(incoming("m1", 10, ALICE));
    engine.mailbox.deliver(incoming("m2", 11, ALICE));
    let orchestrator = engine.channels();

    orchestrator.full_sync(None, SyncOptions::default()).await.unwrap();
    let again = orchestrator.full_sync(None, SyncOptions::default()).await.unwrap();

    assert_eq!(again.store.created, 0);
    assert_eq!(again.store.unchanged, 2);
    assert_eq!(engine.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_cursor_never_moves_back() {
    let engine = Engine::new();
    engine.mailbox.deliver(incoming("m1", 30, ALICE));
    let orchestrator = engine.channels();
    orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(engine.cursor().await.as_deref(), Some("30"));

    // A late-arriving message with an older history id must not rewind the cursor
    engine.mailbox.deliver(incoming("m0", 20, ALICE));
    orchestrator.full_sync(None, SyncOptions::default()).await.unwrap();
    assert_eq!(engine.cursor().await.as_deref(), Some("30"));

    let moved = engine
        .checkpoints
        .set_history_cursor(&engine.account, "25")
        .await
        .unwrap();
    assert!(!moved);
    assert_eq!(engine.cursor().await.as_deref(), Some("30"));
}

#[tokio::test]
async fn test_expired_cursor_falls_back_to_full_sync_once() {
    let engine = Engine::new();
    engine.mailbox.deliver(incoming("m1", 10, ALICE));
    let orchestrator = engine.channels();
    orchestrator.sync(SyncOptions::default()).await.unwrap();

    engine.mailbox.expire_history();
    engine.mailbox.deliver(incoming("m2", 20, ALICE));
    engine.mailbox.clear_calls();

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert!(report.fell_back);
    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(engine.mailbox.count_calls("history:"), 1);
    assert_eq!(engine.cursor().await.as_deref(), Some("20"));
    assert_eq!(engine.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_list_recent_stops_at_synced_message() {
    let engine = Engine::new();
    for (id, history) in [("m40", 40), ("m45", 45), ("m48", 48), ("m50", 50)] {
        engine.mailbox.deliver(incoming(id, history, ALICE));
    }
    engine
        .checkpoints
        .set_history_cursor(&engine.account, "45")
        .await
        .unwrap();
    let orchestrator =
        engine.orchestrator(IngestionStrategy::V1, IncrementalStrategy::ListRecent);

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.mode, SyncMode::ListRecent);
    assert_eq!(report.store.created, 2);
    assert_eq!(engine.cursor().await.as_deref(), Some("50"));

    // One fetch per message down to the boundary, none past it
    assert_eq!(
        engine.mailbox.calls(),
        vec!["list:-:-", "get:m50", "get:m48", "list:-:2", "get:m45"]
    );
    assert_eq!(report.fetched, 3);
    assert_eq!(engine.record_html("m45", "chan-alice").await, None);
}

#[tokio::test]
async fn test_drafts_are_never_stored() {
    let engine = Engine::new();
    engine.mailbox.deliver(draft("d1", 10, ALICE));
    engine.mailbox.deliver(incoming("m1", 11, ALICE));
    let orchestrator = engine.channels();

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.store.created, 1);
    assert_eq!(report.drafts, 1);

    engine.mailbox.deliver(draft("d2", 12, ALICE));
    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.drafts, 1);
    assert!(!engine.mailbox.calls().contains(&"get:d2".to_string()));
    assert_eq!(engine.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_script_markup_is_stripped_on_both_paths() {
    let engine = Engine::new();
    let hostile = "<p>Quarterly numbers</p><script>alert(1)</script>";
    engine.mailbox.deliver(message("m1", 10, ALICE, ME, hostile));
    let orchestrator = engine.channels();
    orchestrator.sync(SyncOptions::default()).await.unwrap();

    engine.mailbox.deliver(message("m2", 11, ALICE, ME, hostile));
    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.mode, SyncMode::HistoryWalk);

    for id in ["m1", "m2"] {
        let html = engine.record_html(id, "chan-alice").await.unwrap();
        assert_eq!(html, "Quarterly numbers");
        assert!(!html.contains("alert"));
    }
}

#[tokio::test]
async fn test_mailbox_ingestion_stores_outgoing_mail() {
    let engine = Engine::new();
    engine
        .mailbox
        .deliver(message("m1", 10, ME, BOB, "<p>Invoice attached</p>"));
    let orchestrator =
        engine.orchestrator(IngestionStrategy::V2, IncrementalStrategy::HistoryWalk);

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.store.created, 1);
    assert_eq!(
        engine.record_html("m1", "box-me").await.as_deref(),
        Some("Invoice attached")
    );
}

#[tokio::test]
async fn test_attachment_is_stored_once() {
    let engine = Engine::new();
    engine.mailbox.add_attachment("att-1", b"%PDF-1.7 report");
    engine.mailbox.deliver(with_attachment(
        incoming("m1", 10, ALICE),
        "report.pdf",
        "att-1",
    ));
    let orchestrator = engine.channels();

    let first = orchestrator.full_sync(None, SyncOptions::default()).await.unwrap();
    assert_eq!(first.store.attachments_added, 1);
    let second = orchestrator.full_sync(None, SyncOptions::default()).await.unwrap();
    assert_eq!(second.store.attachments_added, 0);
    assert_eq!(engine.mailbox.count_calls("attachment:"), 1);

    let record = engine
        .store
        .find_by_provider_id_and_target("<m1@mail.example.com>", "chan-alice")
        .await
        .unwrap()
        .unwrap();
    let attachments = engine.store.list_attachments(&record.record_id).await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "report.pdf");
}

#[tokio::test]
async fn test_backfill_leaves_cursor_alone() {
    let engine = Engine::new();
    engine.mailbox.deliver(incoming("m-bob", 5, BOB));
    engine.mailbox.deliver(incoming("m-alice", 12, ALICE));
    let orchestrator = engine.channels();

    let report = orchestrator.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.unrouted, 1);
    assert_eq!(engine.cursor().await.as_deref(), Some("12"));

    engine
        .directory
        .insert(ConversationTarget::channel("chan-bob", BOB));
    let query = format!("{{from:{b} to:{b} cc:{b} bcc:{b}}}", b = BOB);
    let report = orchestrator
        .full_sync(Some(&query), SyncOptions { no_notify: true })
        .await
        .unwrap();

    assert_eq!(report.mode, SyncMode::Backfill);
    assert_eq!(report.store.created, 1);
    assert_eq!(engine.cursor().await.as_deref(), Some("12"));
    let record = engine
        .store
        .find_by_provider_id_and_target("<m-bob@mail.example.com>", "chan-bob")
        .await
        .unwrap()
        .unwrap();
    assert!(!record.notify);
}

/// Lifecycle that remembers what it was told
#[derive(Default)]
struct RecordingLifecycle {
    events: Mutex<Vec<String>>,
}

impl RecordingLifecycle {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountLifecycle for RecordingLifecycle {
    async fn disable(&self, key: &AccountKey) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("disable:{}", key.user_id));
        Ok(())
    }

    async fn remove(&self, key: &AccountKey) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(format!("remove:{}", key.user_id));
        Ok(())
    }
}

struct Fleet {
    engine: Engine,
    lifecycle: Arc<RecordingLifecycle>,
    supervisor: AccountSyncSupervisor,
}

impl Fleet {
    fn new(config: SyncConfig) -> Self {
        let engine = Engine::new();
        let lifecycle = Arc::new(RecordingLifecycle::default());
        let supervisor = AccountSyncSupervisor::new(
            &SupervisorSlot::new(),
            SupervisorDeps {
                config,
                checkpoints: engine.checkpoints.clone(),
                store: engine.store.clone(),
                blobs: engine.blobs.clone(),
                directory: engine.directory.clone(),
                lifecycle: lifecycle.clone(),
            },
        )
        .unwrap();
        Self {
            engine,
            lifecycle,
            supervisor,
        }
    }

    async fn start(&self) {
        let setup = AccountSetup::new(self.engine.account.clone(), "Me@Example.com");
        self.supervisor
            .add_account(setup, self.engine.mailbox.clone())
            .await
            .unwrap();
    }

    async fn wait_for_cursor(&self, expected: &str) {
        let checkpoints = self.engine.checkpoints.clone();
        let account = self.engine.account.clone();
        wait_for(&format!("cursor {}", expected), || {
            let checkpoints = checkpoints.clone();
            let account = account.clone();
            async move {
                checkpoints
                    .get_checkpoint(&account)
                    .await
                    .unwrap()
                    .and_then(|c| c.history_cursor)
                    .as_deref()
                    == Some(expected)
            }
        })
        .await;
    }
}

#[tokio::test]
async fn test_only_one_supervisor_per_slot() {
    let slot = SupervisorSlot::new();
    let engine = Engine::new();
    let deps = SupervisorDeps {
        config: SyncConfig::default(),
        checkpoints: engine.checkpoints.clone(),
        store: engine.store.clone(),
        blobs: engine.blobs.clone(),
        directory: engine.directory.clone(),
        lifecycle: Arc::new(RecordingLifecycle::default()),
    };

    let first = AccountSyncSupervisor::new(&slot, deps.clone()).unwrap();
    assert!(matches!(
        AccountSyncSupervisor::new(&slot, deps.clone()),
        Err(SupervisorError::AlreadyExists)
    ));
    drop(first);
    assert!(AccountSyncSupervisor::new(&slot, deps).is_ok());
}

#[tokio::test]
async fn test_push_triggers_incremental_sync() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.engine.mailbox.deliver(incoming("m1", 10, ALICE));
    fleet.start().await;
    fleet.wait_for_cursor("10").await;

    fleet.engine.mailbox.deliver(incoming("m2", 14, ALICE));
    let queued = fleet.supervisor.push(&push_data("ME@example.com", 14)).unwrap();
    assert_eq!(queued, 1);
    fleet.wait_for_cursor("14").await;
    assert_eq!(fleet.engine.store.count().await.unwrap(), 2);
    assert!(fleet.engine.mailbox.calls().contains(&"history:10".to_string()));

    assert_eq!(
        fleet
            .supervisor
            .push(&push_data("stranger@example.com", 1))
            .unwrap(),
        0
    );
    assert!(matches!(
        fleet.supervisor.push("not base64 at all!"),
        Err(SupervisorError::InvalidPush(_))
    ));

    fleet.supervisor.close().await;
}

#[tokio::test]
async fn test_status_reports_synced_account() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.engine.mailbox.deliver(incoming("m1", 10, ALICE));
    fleet.start().await;
    fleet.wait_for_cursor("10").await;

    let account = fleet.engine.account.clone();
    let supervisor = &fleet.supervisor;
    let mut status = supervisor.status(&account).await.unwrap();
    for _ in 0..100 {
        if status.last_synced_at.is_some() && status.state == SyncState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = supervisor.status(&account).await.unwrap();
    }

    assert_eq!(status.address, ME);
    assert_eq!(status.history_cursor.as_deref(), Some("10"));
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_synced_at.is_some());
    assert!(!status.stale);
    assert!(status.available_quota > 0.0 && status.available_quota <= 1000.0);

    assert!(matches!(
        supervisor.status(&AccountKey::new("nobody", "ws-1")).await,
        Err(SupervisorError::UnknownAccount(_))
    ));
    supervisor.close().await;
}

#[tokio::test]
async fn test_new_conversation_target_backfills_every_account() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.engine.mailbox.deliver(incoming("m-bob", 5, BOB));
    fleet.engine.mailbox.deliver(incoming("m-alice", 12, ALICE));
    fleet.start().await;
    fleet.wait_for_cursor("12").await;
    assert_eq!(fleet.engine.store.count().await.unwrap(), 1);

    fleet
        .engine
        .directory
        .insert(ConversationTarget::channel("chan-bob", BOB));
    assert_eq!(fleet.supervisor.new_conversation_target(BOB), 1);

    let store = fleet.engine.store.clone();
    wait_for("bob's backfilled message", || {
        let store = store.clone();
        async move { store.count().await.unwrap() == 2 }
    })
    .await;

    let expected = format!("list:{{from:{b} to:{b} cc:{b} bcc:{b}}}:-", b = BOB);
    assert!(fleet.engine.mailbox.calls().contains(&expected));
    assert_eq!(fleet.engine.cursor().await.as_deref(), Some("12"));
    fleet.supervisor.close().await;
}

#[tokio::test]
async fn test_rejected_credential_disables_account() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.engine.mailbox.deliver(incoming("m1", 10, ALICE));
    fleet.engine.mailbox.revoke();
    fleet.start().await;

    let lifecycle = fleet.lifecycle.clone();
    wait_for("the account to be disabled", || {
        let lifecycle = lifecycle.clone();
        async move { !lifecycle.events().is_empty() }
    })
    .await;

    assert_eq!(fleet.lifecycle.events(), vec!["disable:user-1".to_string()]);
    assert!(fleet.supervisor.account_keys().is_empty());
    assert_eq!(fleet.engine.cursor().await, None);
}

#[tokio::test]
async fn test_remove_account_stops_watch_and_forgets_checkpoint() {
    let config = SyncConfig {
        watch_topic: Some("projects/acme/topics/gmail".into()),
        ..SyncConfig::default()
    };
    let fleet = Fleet::new(config);
    fleet.engine.mailbox.deliver(incoming("m1", 10, ALICE));
    fleet.start().await;
    fleet.wait_for_cursor("10").await;

    let mailbox = fleet.engine.mailbox.clone();
    wait_for("the watch to be registered", || {
        let mailbox = mailbox.clone();
        async move { mailbox.count_calls("watch:") == 1 }
    })
    .await;

    fleet
        .supervisor
        .signout(&fleet.engine.account, false)
        .await
        .unwrap();

    assert_eq!(fleet.engine.mailbox.count_calls("stop"), 1);
    assert_eq!(
        fleet
            .engine
            .checkpoints
            .get_checkpoint(&fleet.engine.account)
            .await
            .unwrap(),
        None
    );
    assert_eq!(fleet.lifecycle.events(), vec!["remove:user-1".to_string()]);
    assert!(matches!(
        fleet.supervisor.remove_account(&fleet.engine.account).await,
        Err(SupervisorError::UnknownAccount(_))
    ));
}

#[tokio::test]
async fn test_closed_supervisor_rejects_new_accounts() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.supervisor.close().await;

    let setup = AccountSetup::new(fleet.engine.account.clone(), ME);
    assert!(matches!(
        fleet
            .supervisor
            .add_account(setup, fleet.engine.mailbox.clone())
            .await,
        Err(SupervisorError::Closed)
    ));
}

#[tokio::test]
async fn test_sync_account_runs_inline() {
    let fleet = Fleet::new(SyncConfig::default());
    fleet.engine.mailbox.deliver(incoming("m1", 10, ALICE));
    fleet.start().await;
    fleet.wait_for_cursor("10").await;

    fleet.engine.mailbox.deliver(incoming("m2", 11, ALICE));
    let report = fleet
        .supervisor
        .sync_account(&fleet.engine.account, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.mode, SyncMode::HistoryWalk);
    assert_eq!(report.cursor_after.as_deref(), Some("11"));

    assert!(matches!(
        fleet
            .supervisor
            .sync_account(&AccountKey::new("nobody", "ws-1"), SyncOptions::default())
            .await,
        Err(SupervisorError::UnknownAccount(_))
    ));
    fleet.supervisor.close().await;
}

#[tokio::test]
async fn test_replacing_account_never_overlaps_syncs() {
    let fleet = Fleet::new(SyncConfig::default());
    for history in [10, 20, 30, 40] {
        fleet
            .engine
            .mailbox
            .deliver(incoming(&format!("m{}", history), history, ALICE));
    }
    fleet
        .engine
        .mailbox
        .slow_fetches(Duration::from_millis(200));

    fleet.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Re-adding waits for the first worker's in-flight fetch to land
    fleet.start().await;
    fleet.wait_for_cursor("40").await;

    assert_eq!(fleet.engine.mailbox.max_concurrent_fetches(), 1);
    assert_eq!(fleet.supervisor.account_keys(), vec![fleet.engine.account.clone()]);
    assert_eq!(fleet.engine.store.count().await.unwrap(), 4);

    fleet.supervisor.close().await;
}
