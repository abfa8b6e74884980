//! Gmail API integration
//!
//! This module provides:
//! - Token refresh for stored OAuth2 credentials
//! - A blocking Gmail REST client
//! - Normalization of raw messages into [`CanonicalMessage`](crate::models::CanonicalMessage)
//! - [`GmailProvider`], the async [`MailProvider`](crate::provider::MailProvider) adapter

mod auth;
mod client;
mod normalize;
mod provider;

pub use auth::{AuthRejectedError, GmailAuth, StaticToken, StoredToken, TokenSource};
pub use client::{GmailClient, HistoryExpiredError};
pub use normalize::{decode_base64_bytes, decode_base64_text, normalize_message, part_content};
pub use provider::GmailProvider;

/// Label Gmail puts on unsent drafts
pub const DRAFT_LABEL: &str = "DRAFT";

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message from Gmail API (`format=full`)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        pub history_id: Option<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    impl GmailMessage {
        /// Numeric history id, if the provider sent a parsable one
        pub fn history_id(&self) -> Option<u64> {
            self.history_id.as_deref().and_then(|h| h.trim().parse().ok())
        }

        pub fn has_label(&self, label: &str) -> bool {
            self.label_ids
                .as_ref()
                .is_some_and(|labels| labels.iter().any(|l| l == label))
        }

        pub fn is_draft(&self) -> bool {
            self.has_label(super::DRAFT_LABEL)
        }
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Part body: inline base64url data or a reference to a separate attachment
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u64>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// MIME part; the top-level payload is a part too
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from `users.history.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessageAdded>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessageAdded {
        pub message: HistoryMessage,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryMessage {
        pub id: String,
        pub label_ids: Option<Vec<String>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AttachmentResponse {
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub history_id: Option<String>,
        pub messages_total: Option<u64>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchRequest<'a> {
        pub topic_name: &'a str,
        pub label_ids: Vec<&'a str>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchResponse {
        pub history_id: Option<String>,
        pub expiration: Option<String>,
    }
}
