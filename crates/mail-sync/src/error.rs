//! Error types shared across the sync engine

use std::time::Duration;

/// Classified failure of a mail provider call
///
/// The provider client decides the class; the orchestrator only reacts to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The history cursor was rejected (expired or unknown). Triggers a full sync.
    #[error("history cursor is invalid or expired")]
    CursorInvalid,

    /// Network blip, 5xx, quota pushback. Retried at the next scheduled invocation.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The credential was rejected and cannot be refreshed.
    #[error("authorization rejected: {0}")]
    FatalAuth(String),
}

impl ProviderError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, Self::FatalAuth(_))
    }
}

/// Failure of one sync invocation
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The account's credential is gone; lifecycle management must sign it out.
    #[error("account authorization was rejected: {0}")]
    Unauthorized(String),

    /// An outer page listing failed. Nothing was written to the checkpoint.
    #[error("provider listing failed: {0}")]
    Provider(ProviderError),

    /// The checkpoint store failed. Already ingested messages stay in place.
    #[error("checkpoint store failed: {0:#}")]
    Checkpoint(anyhow::Error),

    /// A hard timeout stopped the invocation.
    #[error("sync timed out after {0:?}")]
    TimedOut(Duration),
}

impl SyncError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Failures of the account supervisor's own API
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("a sync supervisor already exists for this process")]
    AlreadyExists,

    #[error("invalid push notification: {0}")]
    InvalidPush(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("the supervisor is closing")]
    Closed,

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
