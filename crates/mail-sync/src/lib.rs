//! Mail sync crate - Incremental Gmail ingestion engine
//!
//! This crate keeps downstream conversation stores in step with connected
//! Gmail accounts:
//! - Gmail API client, OAuth token refresh and message normalization
//! - Per-account token-bucket rate limiting of provider calls
//! - Durable, monotonic sync checkpoints
//! - Idempotent ingestion into channels or personal mailboxes
//! - Full and incremental sync orchestration with cursor-expiry recovery
//! - Multi-account supervision driven by push notifications
//!
//! The engine is add-only: edits and deletions in the mailbox are not
//! mirrored downstream.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gmail;
pub mod ingest;
pub mod models;
pub mod provider;
pub mod ratelimit;
pub mod sanitize;
pub mod storage;
pub mod supervisor;
pub mod sync;

pub use checkpoint::{KeyValueStore, SqliteKeyValueStore, SyncCheckpointStore};
pub use config::{AccountEntry, AccountsFile, GmailCredentials, SyncConfig};
pub use error::{ProviderError, SupervisorError, SyncError};
pub use gmail::{GmailAuth, GmailClient, GmailProvider, StoredToken};
pub use ingest::{IngestOutcome, MessageIngestor, build_ingestor};
pub use models::{
    AccountKey, AccountSetup, CanonicalMessage, ConversationTarget, IncrementalStrategy,
    IngestionStrategy, MessageRecord, SyncCheckpoint,
};
pub use provider::{MailProvider, ThrottledProvider};
pub use ratelimit::RateLimiter;
pub use sanitize::sanitize_text;
pub use storage::{
    BlobStore, ConversationDirectory, Database, FileBlobStore, InMemoryDirectory,
    MessageStore, SqliteMessageStore,
};
pub use supervisor::{
    AccountLifecycle, AccountStatus, AccountSyncSupervisor, LoggingLifecycle, SupervisorDeps,
    SupervisorSlot,
};
pub use sync::{SyncMode, SyncOptions, SyncOrchestrator, SyncReport, SyncState, is_stale};
