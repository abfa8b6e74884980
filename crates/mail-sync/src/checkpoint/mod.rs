//! Durable per-account sync checkpoints
//!
//! A checkpoint lives under `mail-sync/v{schema}/{workspace}/{user}` in a
//! [`KeyValueStore`]. Bumping the schema version orphans old checkpoints,
//! which forces a clean full sync after an incompatible change.
//!
//! The history cursor only ever moves forward: a write with a numerically
//! lower cursor is ignored. Clearing it is the single way back, and is
//! reserved for the invalid-cursor recovery path.

mod kv;

pub use kv::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::models::{AccountKey, SyncCheckpoint, compare_cursors};

/// Key namespace for checkpoints
const KEY_PREFIX: &str = "mail-sync";

/// Current checkpoint schema version
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Reads and writes sync checkpoints
pub struct SyncCheckpointStore {
    kv: Arc<dyn KeyValueStore>,
    schema_version: u32,
}

impl SyncCheckpointStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, schema_version: u32) -> Self {
        Self { kv, schema_version }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn key_for(&self, account: &AccountKey) -> String {
        format!(
            "{}/v{}/{}/{}",
            KEY_PREFIX, self.schema_version, account.workspace_id, account.user_id
        )
    }

    pub async fn get_checkpoint(&self, account: &AccountKey) -> Result<Option<SyncCheckpoint>> {
        let key = self.key_for(account);
        let Some(value) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let checkpoint = serde_json::from_value(value)
            .with_context(|| format!("Corrupt checkpoint at {}", key))?;
        Ok(Some(checkpoint))
    }

    /// Read-modify-write; `apply` returns whether it changed anything
    async fn update<F>(&self, account: &AccountKey, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut SyncCheckpoint) -> bool + Send,
    {
        let mut checkpoint = self
            .get_checkpoint(account)
            .await?
            .unwrap_or_else(|| SyncCheckpoint::new(account, self.schema_version));

        if !apply(&mut checkpoint) {
            return Ok(false);
        }

        let key = self.key_for(account);
        let value = serde_json::to_value(&checkpoint)?;
        self.kv
            .set(&key, value)
            .await
            .with_context(|| format!("Failed to write checkpoint {}", key))?;
        Ok(true)
    }

    /// Advance the history cursor
    ///
    /// Returns `false` without writing when `cursor` is not newer than the
    /// stored one.
    pub async fn set_history_cursor(&self, account: &AccountKey, cursor: &str) -> Result<bool> {
        let cursor = cursor.trim().to_string();
        let account_label = account.to_string();
        self.update(account, move |checkpoint| {
            if let Some(current) = checkpoint.history_cursor.as_deref() {
                match compare_cursors(&cursor, current) {
                    Some(Ordering::Less) => {
                        warn!(
                            "[{}] Refusing to move history cursor back from {} to {}",
                            account_label, current, cursor
                        );
                        return false;
                    }
                    Some(Ordering::Equal) => return false,
                    Some(Ordering::Greater) => {}
                    None => debug!(
                        "[{}] Cursors {} and {} are not comparable, taking the new one",
                        account_label, current, cursor
                    ),
                }
            }
            checkpoint.history_cursor = Some(cursor);
            true
        })
        .await
    }

    /// Forget the history cursor so the next sync starts from scratch
    pub async fn clear_history_cursor(&self, account: &AccountKey) -> Result<()> {
        let account_label = account.to_string();
        self.update(account, move |checkpoint| {
            let Some(previous) = checkpoint.history_cursor.take() else {
                return false;
            };
            warn!(
                "[{}] Cleared history cursor {}; next sync will be a full sync",
                account_label, previous
            );
            true
        })
        .await?;
        Ok(())
    }

    pub async fn get_page_cursor(&self, account: &AccountKey) -> Result<Option<String>> {
        Ok(self
            .get_checkpoint(account)
            .await?
            .and_then(|c| c.page_cursor))
    }

    pub async fn set_page_cursor(&self, account: &AccountKey, cursor: &str) -> Result<()> {
        let cursor = cursor.to_string();
        self.update(account, move |checkpoint| {
            if checkpoint.page_cursor.as_deref() == Some(cursor.as_str()) {
                return false;
            }
            checkpoint.page_cursor = Some(cursor);
            true
        })
        .await?;
        Ok(())
    }

    pub async fn clear_page_cursor(&self, account: &AccountKey) -> Result<()> {
        self.update(account, |checkpoint| checkpoint.page_cursor.take().is_some())
            .await?;
        Ok(())
    }

    /// Record a completed sync
    pub async fn mark_synced(&self, account: &AccountKey) -> Result<()> {
        self.update(account, |checkpoint| {
            checkpoint.last_synced_at = Some(Utc::now());
            true
        })
        .await?;
        Ok(())
    }

    pub async fn delete_checkpoint(&self, account: &AccountKey) -> Result<()> {
        let key = self.key_for(account);
        self.kv
            .delete(&key)
            .await
            .with_context(|| format!("Failed to delete checkpoint {}", key))
    }
}
