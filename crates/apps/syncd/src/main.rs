//! syncd - Gmail sync daemon
//!
//! Keeps every account in `accounts.json` synced into the local store.
//! Push payloads and control commands arrive on stdin, one per line:
//! - `push <data>` or a bare payload: route a Pub/Sub push notification
//! - `channel <id> <address>`: register a channel and backfill its history
//! - `status`: log the sync state of every account

mod accounts;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use mail_sync::checkpoint::SqliteKeyValueStore;
use mail_sync::{
    AccountEntry, AccountSyncSupervisor, AccountsFile, ConversationTarget, Database,
    FileBlobStore, GmailAuth, GmailClient, GmailCredentials, GmailProvider, InMemoryDirectory,
    SqliteMessageStore, SupervisorDeps, SupervisorSlot, SyncCheckpointStore, SyncConfig,
    SyncOptions,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use accounts::AccountsFileLifecycle;

const DATABASE_FILE: &str = "mail-sync.db";
const ATTACHMENTS_DIR: &str = "attachments";
/// Known conversation targets, a JSON array
const DIRECTORY_FILE: &str = "directory.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    let config_dir = config::init().context("Failed to initialize config directory")?;

    let credentials = match GmailCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Gmail credentials not found"));
        }
    };
    let sync_config = SyncConfig::load().context("Invalid sync.json")?;
    let accounts = AccountsFile::load().context("Invalid accounts.json")?;

    let db = Database::open(config_dir.join(DATABASE_FILE))?;
    let checkpoints = Arc::new(SyncCheckpointStore::new(
        Arc::new(SqliteKeyValueStore::new(db.clone())),
        sync_config.schema_version,
    ));
    let directory = Arc::new(load_directory()?);
    let poll_interval = sync_config.poll_interval();

    let supervisor = AccountSyncSupervisor::new(
        &SupervisorSlot::process(),
        SupervisorDeps {
            config: sync_config,
            checkpoints,
            store: Arc::new(SqliteMessageStore::new(db)),
            blobs: Arc::new(FileBlobStore::new(config_dir.join(ATTACHMENTS_DIR))?),
            directory: directory.clone(),
            lifecycle: Arc::new(AccountsFileLifecycle::new(accounts.clone())),
        },
    )?;

    for entry in accounts.active() {
        if let Err(e) = start_account(&supervisor, &credentials, entry, &config_dir).await {
            error!("[{}] Failed to start account: {:#}", entry.key(), e);
        }
    }
    info!(
        "Syncing {} accounts, polling every {:?}",
        supervisor.account_keys().len(),
        poll_interval
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut poll = tokio::time::interval(poll_interval);
    // The first tick is immediate; adding an account already queued its sync
    poll.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = poll.tick() => {
                let queued = supervisor.sync_all(SyncOptions::default());
                debug!("Poll queued {} syncs", queued);
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&supervisor, &directory, line.trim()).await,
                Ok(None) => {
                    debug!("stdin closed, continuing on polls only");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    supervisor.close().await;
    Ok(())
}

async fn start_account(
    supervisor: &AccountSyncSupervisor,
    credentials: &GmailCredentials,
    entry: &AccountEntry,
    config_dir: &Path,
) -> Result<()> {
    let token = entry.load_token(config_dir)?;
    let auth = GmailAuth::new(credentials.clone(), token)
        .with_token_path(entry.token_path(config_dir));
    let provider = GmailProvider::new(GmailClient::new(Arc::new(auth)));
    supervisor.add_account(entry.setup(), Arc::new(provider)).await?;
    Ok(())
}

fn load_directory() -> Result<InMemoryDirectory> {
    let targets: Vec<ConversationTarget> =
        config::load_json_optional(DIRECTORY_FILE)?.unwrap_or_default();
    let directory = InMemoryDirectory::new();
    for target in targets {
        directory.insert(target);
    }
    Ok(directory)
}

async fn handle_line(supervisor: &AccountSyncSupervisor, directory: &InMemoryDirectory, line: &str) {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "status" => log_status(supervisor).await,
        "channel" => {
            let mut parts = rest.split_whitespace();
            let (Some(id), Some(address)) = (parts.next(), parts.next()) else {
                warn!("Usage: channel <id> <address>");
                return;
            };
            directory.insert(ConversationTarget::channel(id, address));
            let queued = supervisor.new_conversation_target(address);
            info!("Channel {} for {}: {} backfills queued", id, address, queued);
        }
        "push" => route_push(supervisor, rest),
        _ => route_push(supervisor, line),
    }
}

fn route_push(supervisor: &AccountSyncSupervisor, data: &str) {
    match supervisor.push(data) {
        Ok(queued) => debug!("Push queued {} syncs", queued),
        Err(e) => warn!("Rejected push: {}", e),
    }
}

async fn log_status(supervisor: &AccountSyncSupervisor) {
    for key in supervisor.account_keys() {
        match supervisor.status(&key).await {
            Ok(status) => info!(
                "[{}] {} {:?}, cursor {:?}, last synced {:?}{}, quota {:.0}",
                key,
                status.address,
                status.state,
                status.history_cursor,
                status.last_synced_at,
                if status.stale { " (stale)" } else { "" },
                status.available_quota
            ),
            Err(e) => warn!("[{}] Status unavailable: {}", key, e),
        }
    }
}
