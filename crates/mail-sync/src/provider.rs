//! Mail provider seam
//!
//! [`MailProvider`] is the only way the sync engine talks to a mailbox.
//! Every call goes through [`ThrottledProvider`], which debits the account's
//! [`RateLimiter`] with the call's quota cost before issuing it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::gmail::api::GmailMessage;
use crate::ratelimit::RateLimiter;

/// Raw message as returned by the provider
pub type RawMessage = GmailMessage;

/// Quota units charged per call, as published by the Gmail API
pub mod cost {
    pub const GET_PROFILE: u32 = 1;
    pub const LIST_HISTORY: u32 = 2;
    pub const LIST_MESSAGES: u32 = 5;
    pub const GET_MESSAGE: u32 = 5;
    pub const GET_ATTACHMENT: u32 = 5;
    pub const STOP: u32 = 50;
    pub const WATCH: u32 = 100;
}

/// One page request for `list_message_ids`
///
/// Each page is a fresh value; nothing is mutated across pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub query: Option<String>,
    pub page_token: Option<String>,
    pub max_results: u32,
}

impl ListRequest {
    pub fn first(query: Option<&str>, max_results: u32) -> Self {
        Self {
            query: query.map(str::to_string),
            page_token: None,
            max_results,
        }
    }

    pub fn next_page(&self, page_token: String) -> Self {
        Self {
            query: self.query.clone(),
            page_token: Some(page_token),
            max_results: self.max_results,
        }
    }
}

/// One page request for `list_history`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub start_cursor: String,
    pub page_token: Option<String>,
}

impl HistoryRequest {
    pub fn first(start_cursor: impl Into<String>) -> Self {
        Self {
            start_cursor: start_cursor.into(),
            page_token: None,
        }
    }

    pub fn next_page(&self, page_token: String) -> Self {
        Self {
            start_cursor: self.start_cursor.clone(),
            page_token: Some(page_token),
        }
    }
}

/// Listed message id; some providers include the history id in listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub history_id: Option<u64>,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history_id: None,
        }
    }
}

/// One page of message ids, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdPage {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

/// A message added to the mailbox, as seen in the history log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedMessage {
    pub id: String,
    pub label_ids: Vec<String>,
}

impl AddedMessage {
    pub fn is_draft(&self) -> bool {
        self.label_ids.iter().any(|l| l == crate::gmail::DRAFT_LABEL)
    }
}

/// One history log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub messages_added: Vec<AddedMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email_address: String,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchResult {
    pub history_id: Option<String>,
    pub expiration: Option<String>,
}

/// Client for one connected mailbox
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_message_ids(&self, request: &ListRequest) -> Result<MessageIdPage, ProviderError>;

    async fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError>;

    /// `messageAdded` history since the request's start cursor
    ///
    /// Fails with [`ProviderError::CursorInvalid`] when the cursor has expired.
    async fn list_history(&self, request: &HistoryRequest) -> Result<HistoryPage, ProviderError>;

    /// Decoded attachment bytes
    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError>;

    async fn get_profile(&self) -> Result<Profile, ProviderError>;

    async fn watch(&self, topic: &str) -> Result<WatchResult, ProviderError>;

    async fn stop(&self) -> Result<(), ProviderError>;
}

/// Provider wrapper that charges each call against the account's limiter
pub struct ThrottledProvider {
    inner: Arc<dyn MailProvider>,
    limiter: Arc<RateLimiter>,
}

impl ThrottledProvider {
    pub fn new(inner: Arc<dyn MailProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl MailProvider for ThrottledProvider {
    async fn list_message_ids(&self, request: &ListRequest) -> Result<MessageIdPage, ProviderError> {
        self.limiter.acquire(cost::LIST_MESSAGES).await;
        self.inner.list_message_ids(request).await
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        self.limiter.acquire(cost::GET_MESSAGE).await;
        self.inner.get_message(id).await
    }

    async fn list_history(&self, request: &HistoryRequest) -> Result<HistoryPage, ProviderError> {
        self.limiter.acquire(cost::LIST_HISTORY).await;
        self.inner.list_history(request).await
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        self.limiter.acquire(cost::GET_ATTACHMENT).await;
        self.inner.get_attachment(message_id, attachment_id).await
    }

    async fn get_profile(&self) -> Result<Profile, ProviderError> {
        self.limiter.acquire(cost::GET_PROFILE).await;
        self.inner.get_profile().await
    }

    async fn watch(&self, topic: &str) -> Result<WatchResult, ProviderError> {
        self.limiter.acquire(cost::WATCH).await;
        self.inner.watch(topic).await
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.limiter.acquire(cost::STOP).await;
        self.inner.stop().await
    }
}
