//! Shared SQLite connection and schema
//!
//! One database file holds both the checkpoint key-value table and the
//! message tables. Calls run on tokio's blocking pool behind a mutex.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Checkpoints and other small JSON values
            CREATE TABLE sync_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One row per (message, conversation target)
            CREATE TABLE message_records (
                record_id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL,
                provider_message_id TEXT NOT NULL,
                from_header TEXT NOT NULL,
                to_json TEXT NOT NULL,
                cc_json TEXT NOT NULL,
                subject TEXT NOT NULL,
                reply_to_id TEXT,
                sent_at TEXT NOT NULL,
                html_content TEXT NOT NULL,
                plain_text_content TEXT NOT NULL,
                incoming INTEGER NOT NULL,
                notify INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                UNIQUE (provider_message_id, target_id)
            );

            CREATE INDEX idx_message_records_target
                ON message_records(target_id, sent_at DESC);

            CREATE TABLE message_attachments (
                record_id TEXT NOT NULL,
                name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                content_ref TEXT NOT NULL,
                PRIMARY KEY (record_id, name, last_modified),
                FOREIGN KEY (record_id) REFERENCES message_records(record_id) ON DELETE CASCADE
            );
            "#,
        ),
    ])
}

/// Handle to the sync database; cheap to clone
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and migrate it
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        Self::migrate(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    /// Private in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::migrate(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn migrate(conn: &mut Connection) -> Result<()> {
        migrations()
            .to_latest(conn)
            .context("Failed to run database migrations")
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .context("Database task failed")?
    }
}
