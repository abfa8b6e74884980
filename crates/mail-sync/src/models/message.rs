//! Provider-agnostic message produced by normalization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an attachment's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentSource {
    /// Base64url data carried inside the message payload
    Inline(String),
    /// Must be downloaded separately with this provider attachment id
    Remote(String),
}

/// An attachment discovered in the message payload, not yet downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPart {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub source: AttachmentSource,
}

/// A normalized message, ready for ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Stable message identity (`Message-ID` header, else the provider id)
    pub provider_message_id: String,
    /// Provider's own id, needed to download attachments
    pub provider_id: String,
    /// Provider history id of this message
    pub history_id: Option<u64>,
    /// Raw `From` header value
    pub from: String,
    /// `To` entries, one per recipient
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    /// `In-Reply-To` header, if any
    pub reply_to_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    /// Sanitized text extracted from the HTML alternative
    pub html_content: String,
    /// Sanitized text extracted from the plain-text alternative
    pub plain_text_content: String,
    /// True when the account owner is not the sender
    pub incoming: bool,
    pub label_ids: Vec<String>,
    pub attachments: Vec<AttachmentPart>,
}

impl CanonicalMessage {
    pub fn builder(provider_id: impl Into<String>) -> CanonicalMessageBuilder {
        CanonicalMessageBuilder::new(provider_id.into())
    }

    /// Attachment dedup key component: the message's own timestamp in millis
    pub fn last_modified_millis(&self) -> i64 {
        self.sent_at.timestamp_millis()
    }

    pub fn is_draft(&self) -> bool {
        self.label_ids.iter().any(|l| l == crate::gmail::DRAFT_LABEL)
    }
}

/// Builder for creating CanonicalMessage instances
pub struct CanonicalMessageBuilder {
    message: CanonicalMessage,
}

impl CanonicalMessageBuilder {
    fn new(provider_id: String) -> Self {
        Self {
            message: CanonicalMessage {
                provider_message_id: provider_id.clone(),
                provider_id,
                history_id: None,
                from: String::new(),
                to: Vec::new(),
                cc: Vec::new(),
                subject: String::new(),
                reply_to_id: None,
                sent_at: DateTime::UNIX_EPOCH,
                html_content: String::new(),
                plain_text_content: String::new(),
                incoming: true,
                label_ids: Vec::new(),
                attachments: Vec::new(),
            },
        }
    }

    pub fn provider_message_id(mut self, id: impl Into<String>) -> Self {
        self.message.provider_message_id = id.into();
        self
    }

    pub fn history_id(mut self, history_id: Option<u64>) -> Self {
        self.message.history_id = history_id;
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.message.from = from.into();
        self
    }

    pub fn to(mut self, to: Vec<String>) -> Self {
        self.message.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<String>) -> Self {
        self.message.cc = cc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    pub fn reply_to_id(mut self, reply_to_id: Option<String>) -> Self {
        self.message.reply_to_id = reply_to_id;
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.message.sent_at = sent_at;
        self
    }

    pub fn html_content(mut self, html: impl Into<String>) -> Self {
        self.message.html_content = html.into();
        self
    }

    pub fn plain_text_content(mut self, text: impl Into<String>) -> Self {
        self.message.plain_text_content = text.into();
        self
    }

    pub fn incoming(mut self, incoming: bool) -> Self {
        self.message.incoming = incoming;
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.message.label_ids = label_ids;
        self
    }

    pub fn attachments(mut self, attachments: Vec<AttachmentPart>) -> Self {
        self.message.attachments = attachments;
        self
    }

    pub fn build(self) -> CanonicalMessage {
        self.message
    }
}
