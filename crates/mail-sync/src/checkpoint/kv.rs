//! Key-value persistence seam for checkpoints

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::storage::Database;

/// Durable JSON key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store
#[derive(Default)]
pub struct InMemoryKeyValueStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// SQLite-backed key-value store (`sync_kv` table)
pub struct SqliteKeyValueStore {
    db: Database,
}

impl SqliteKeyValueStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .db
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT value FROM sync_kv WHERE key = ?", [&key], |row| {
                        row.get(0)
                    })
                    .optional()?)
            })
            .await?;

        raw.map(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
            .transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(&value)?;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sync_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
                    rusqlite::params![key, raw, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.db
            .call(move |conn| {
                conn.execute("DELETE FROM sync_kv WHERE key = ?", [&key])?;
                Ok(())
            })
            .await
    }
}
