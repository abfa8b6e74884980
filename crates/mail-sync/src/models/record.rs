//! Downstream records written by ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CanonicalMessage;

/// Kind of conversation a message is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Shared conversation with one external party
    Channel,
    /// The account owner's personal mailbox
    Mailbox,
}

/// A conversation that ingested messages are attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationTarget {
    pub id: String,
    pub kind: TargetKind,
    /// Normalized address the target was resolved from
    pub address: String,
}

impl ConversationTarget {
    pub fn channel(id: impl Into<String>, address: &str) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::Channel,
            address: super::normalize_address(address),
        }
    }

    pub fn mailbox(id: impl Into<String>, address: &str) -> Self {
        Self {
            id: id.into(),
            kind: TargetKind::Mailbox,
            address: super::normalize_address(address),
        }
    }
}

/// Stored attachment metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Millis timestamp; with `name` it forms the dedup key
    pub last_modified: i64,
    /// Opaque handle into attachment storage
    pub content_ref: String,
}

impl Attachment {
    pub fn same_file(&self, name: &str, last_modified: i64) -> bool {
        self.name == name && self.last_modified == last_modified
    }
}

/// A message attached to one conversation target
///
/// Unique per (`provider_message_id`, `target_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub record_id: String,
    pub target_id: String,
    pub provider_message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub reply_to_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub html_content: String,
    pub plain_text_content: String,
    pub incoming: bool,
    /// Whether downstream notifications were wanted when the record was created
    pub notify: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a fresh record for `message` on `target`
    pub fn from_message(
        record_id: impl Into<String>,
        message: &CanonicalMessage,
        target: &ConversationTarget,
        notify: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: record_id.into(),
            target_id: target.id.clone(),
            provider_message_id: message.provider_message_id.clone(),
            from: message.from.clone(),
            to: message.to.clone(),
            cc: message.cc.clone(),
            subject: message.subject.clone(),
            reply_to_id: message.reply_to_id.clone(),
            sent_at: message.sent_at,
            html_content: message.html_content.clone(),
            plain_text_content: message.plain_text_content.clone(),
            incoming: message.incoming,
            notify,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Changed fields for an existing record
///
/// Only content, subject, recipients, direction and send time are ever
/// updated; identity and provenance stay as first written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub html_content: Option<String>,
    pub plain_text_content: Option<String>,
    pub subject: Option<String>,
    pub to: Option<Vec<String>>,
    pub cc: Option<Vec<String>>,
    pub incoming: Option<bool>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl MessageUpdate {
    /// Fields of `message` that differ from `current`
    pub fn diff(current: &MessageRecord, message: &CanonicalMessage) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            (old != new).then(|| new.clone())
        }

        Self {
            html_content: changed(&current.html_content, &message.html_content),
            plain_text_content: changed(&current.plain_text_content, &message.plain_text_content),
            subject: changed(&current.subject, &message.subject),
            to: changed(&current.to, &message.to),
            cc: changed(&current.cc, &message.cc),
            incoming: changed(&current.incoming, &message.incoming),
            sent_at: changed(&current.sent_at, &message.sent_at),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the changed fields, for logging
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.html_content.is_some() {
            fields.push("html_content");
        }
        if self.plain_text_content.is_some() {
            fields.push("plain_text_content");
        }
        if self.subject.is_some() {
            fields.push("subject");
        }
        if self.to.is_some() {
            fields.push("to");
        }
        if self.cc.is_some() {
            fields.push("cc");
        }
        if self.incoming.is_some() {
            fields.push("incoming");
        }
        if self.sent_at.is_some() {
            fields.push("sent_at");
        }
        fields
    }

    pub fn apply(&self, record: &mut MessageRecord) {
        if let Some(v) = &self.html_content {
            record.html_content = v.clone();
        }
        if let Some(v) = &self.plain_text_content {
            record.plain_text_content = v.clone();
        }
        if let Some(v) = &self.subject {
            record.subject = v.clone();
        }
        if let Some(v) = &self.to {
            record.to = v.clone();
        }
        if let Some(v) = &self.cc {
            record.cc = v.clone();
        }
        if let Some(v) = self.incoming {
            record.incoming = v;
        }
        if let Some(v) = self.sent_at {
            record.sent_at = v;
        }
        record.modified_at = Utc::now();
    }
}
