//! SQLite-backed message store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::db::Database;
use super::traits::MessageStore;
use crate::models::{Attachment, MessageRecord, MessageUpdate};

const RECORD_COLUMNS: &str = "record_id, target_id, provider_message_id, from_header, to_json, \
     cc_json, subject, reply_to_id, sent_at, html_content, plain_text_content, incoming, notify, \
     created_at, modified_at";

/// SQLite-based message store
pub struct SqliteMessageStore {
    db: Database,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn count(&self) -> Result<usize> {
        self.db
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM message_records", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
    }
}

fn parse_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_list(value: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        record_id: row.get(0)?,
        target_id: row.get(1)?,
        provider_message_id: row.get(2)?,
        from: row.get(3)?,
        to: parse_list(&row.get::<_, String>(4)?)?,
        cc: parse_list(&row.get::<_, String>(5)?)?,
        subject: row.get(6)?,
        reply_to_id: row.get(7)?,
        sent_at: parse_time(&row.get::<_, String>(8)?)?,
        html_content: row.get(9)?,
        plain_text_content: row.get(10)?,
        incoming: row.get(11)?,
        notify: row.get(12)?,
        created_at: parse_time(&row.get::<_, String>(13)?)?,
        modified_at: parse_time(&row.get::<_, String>(14)?)?,
    })
}

fn load_record(conn: &Connection, record_id: &str) -> Result<Option<MessageRecord>> {
    let sql = format!("SELECT {} FROM message_records WHERE record_id = ?", RECORD_COLUMNS);
    Ok(conn
        .query_row(&sql, [record_id], record_from_row)
        .optional()?)
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn find_by_provider_id_and_target(
        &self,
        provider_message_id: &str,
        target_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let provider_message_id = provider_message_id.to_string();
        let target_id = target_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM message_records WHERE provider_message_id = ? AND target_id = ?",
                    RECORD_COLUMNS
                );
                Ok(conn
                    .query_row(&sql, params![provider_message_id, target_id], record_from_row)
                    .optional()?)
            })
            .await
    }

    async fn create(&self, record: MessageRecord) -> Result<String> {
        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO message_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        RECORD_COLUMNS
                    ),
                    params![
                        record.record_id,
                        record.target_id,
                        record.provider_message_id,
                        record.from,
                        serde_json::to_string(&record.to)?,
                        serde_json::to_string(&record.cc)?,
                        record.subject,
                        record.reply_to_id,
                        record.sent_at.to_rfc3339(),
                        record.html_content,
                        record.plain_text_content,
                        record.incoming,
                        record.notify,
                        record.created_at.to_rfc3339(),
                        record.modified_at.to_rfc3339(),
                    ],
                )
                .with_context(|| {
                    format!(
                        "Failed to insert message {} for target {}",
                        record.provider_message_id, record.target_id
                    )
                })?;
                Ok(record.record_id)
            })
            .await
    }

    async fn update_fields(&self, record_id: &str, update: &MessageUpdate) -> Result<()> {
        let record_id = record_id.to_string();
        let update = update.clone();
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut record = load_record(&tx, &record_id)?
                    .with_context(|| format!("Message record {} not found", record_id))?;
                update.apply(&mut record);

                tx.execute(
                    "UPDATE message_records SET html_content = ?, plain_text_content = ?, \
                     subject = ?, to_json = ?, cc_json = ?, incoming = ?, sent_at = ?, \
                     modified_at = ? WHERE record_id = ?",
                    params![
                        record.html_content,
                        record.plain_text_content,
                        record.subject,
                        serde_json::to_string(&record.to)?,
                        serde_json::to_string(&record.cc)?,
                        record.incoming,
                        record.sent_at.to_rfc3339(),
                        record.modified_at.to_rfc3339(),
                        record_id,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn list_attachments(&self, record_id: &str) -> Result<Vec<Attachment>> {
        let record_id = record_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, mime_type, size_bytes, last_modified, content_ref
                     FROM message_attachments WHERE record_id = ? ORDER BY name",
                )?;
                let attachments = stmt
                    .query_map([&record_id], |row| {
                        Ok(Attachment {
                            name: row.get(0)?,
                            mime_type: row.get(1)?,
                            size_bytes: row.get::<_, i64>(2)? as u64,
                            last_modified: row.get(3)?,
                            content_ref: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(attachments)
            })
            .await
    }

    async fn add_attachment(&self, record_id: &str, attachment: Attachment) -> Result<()> {
        let record_id = record_id.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO message_attachments
                     (record_id, name, mime_type, size_bytes, last_modified, content_ref)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        record_id,
                        attachment.name,
                        attachment.mime_type,
                        attachment.size_bytes as i64,
                        attachment.last_modified,
                        attachment.content_ref,
                    ],
                )
                .with_context(|| {
                    format!("Failed to add attachment {} to {}", attachment.name, record_id)
                })?;
                Ok(())
            })
            .await
    }
}
