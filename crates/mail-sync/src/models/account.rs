//! Connected account identity and per-account sync settings

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one connected mailbox within one workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub user_id: String,
    pub workspace_id: String,
}

impl AccountKey {
    pub fn new(user_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace_id, self.user_id)
    }
}

/// How ingested messages are attached to conversations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStrategy {
    /// One record per matching external-party channel
    #[default]
    V1,
    /// One record in the account owner's personal mailbox
    V2,
}

/// How an incremental sync finds new messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    /// Walk the provider's history log from the stored cursor
    #[default]
    HistoryWalk,
    /// List recent messages and stop at the first already-synced one
    ListRecent,
}

/// Everything the supervisor needs to start syncing an account
///
/// Strategy overrides fall back to the service-wide config when unset.
#[derive(Debug, Clone)]
pub struct AccountSetup {
    pub key: AccountKey,
    /// The account's own address, used to decide message direction
    pub address: String,
    pub ingestion: Option<IngestionStrategy>,
    pub incremental: Option<IncrementalStrategy>,
}

impl AccountSetup {
    pub fn new(key: AccountKey, address: impl Into<String>) -> Self {
        Self {
            key,
            address: address.into(),
            ingestion: None,
            incremental: None,
        }
    }

    pub fn with_ingestion(mut self, strategy: IngestionStrategy) -> Self {
        self.ingestion = Some(strategy);
        self
    }

    pub fn with_incremental(mut self, strategy: IncrementalStrategy) -> Self {
        self.incremental = Some(strategy);
        self
    }
}
