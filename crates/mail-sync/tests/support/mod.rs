//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use base64::prelude::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mail_sync::error::ProviderError;
use mail_sync::gmail::api::{GmailMessage, Header, MessageBody, MessagePart};
use mail_sync::provider::{
    AddedMessage, HistoryEntry, HistoryPage, HistoryRequest, ListRequest, MailProvider,
    MessageIdPage, MessageRef, Profile, RawMessage, WatchResult,
};

pub const ME: &str = "me@example.com";
pub const ALICE: &str = "alice@partner.io";
pub const BOB: &str = "bob@vendor.io";

#[derive(Default)]
struct MailboxState {
    messages: Vec<RawMessage>,
    attachments: HashMap<String, Vec<u8>>,
    history_expired: bool,
    revoked: bool,
}

/// In-memory Gmail mailbox that records every call made against it
#[derive(Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    calls: Mutex<Vec<String>>,
    fetch_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, message: RawMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn add_attachment(&self, attachment_id: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .attachments
            .insert(attachment_id.to_string(), bytes.to_vec());
    }

    /// Make every history request fail as if the cursor were too old
    pub fn expire_history(&self) {
        self.state.lock().unwrap().history_expired = true;
    }

    /// Reject the account's credential from now on
    pub fn revoke(&self) {
        self.state.lock().unwrap().revoked = true;
    }

    /// Make every `get_message` take `delay`
    pub fn slow_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Most `get_message` calls ever running at once
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_credential(&self) -> Result<(), ProviderError> {
        if self.state.lock().unwrap().revoked {
            return Err(ProviderError::FatalAuth("invalid_grant".into()));
        }
        Ok(())
    }

    /// Messages newest first, keeping only those a query matches
    fn listing(&self, query: Option<&str>) -> Vec<RawMessage> {
        let address = query.and_then(query_address);
        let mut messages: Vec<RawMessage> = self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| address.as_deref().is_none_or(|a| involves(m, a)))
            .cloned()
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.history_id()));
        messages
    }
}

/// Address out of a `{from:a to:a cc:a bcc:a}` query
fn query_address(query: &str) -> Option<String> {
    query
        .split_whitespace()
        .map(|term| term.trim_matches(|c| c == '{' || c == '}'))
        .find_map(|term| term.strip_prefix("from:"))
        .map(str::to_lowercase)
}

fn involves(message: &RawMessage, address: &str) -> bool {
    let headers = message
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .cloned()
        .unwrap_or_default();
    headers.iter().any(|h| {
        ["From", "To", "Cc", "Bcc"].contains(&h.name.as_str())
            && h.value.to_lowercase().contains(address)
    })
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list_message_ids(&self, request: &ListRequest) -> Result<MessageIdPage, ProviderError> {
        self.record(format!(
            "list:{}:{}",
            request.query.as_deref().unwrap_or("-"),
            request.page_token.as_deref().unwrap_or("-")
        ));
        self.check_credential()?;

        let listing = self.listing(request.query.as_deref());
        let start: usize = request
            .page_token
            .as_deref()
            .map(|t| t.parse().unwrap())
            .unwrap_or(0);
        let end = (start + request.max_results as usize).min(listing.len());
        Ok(MessageIdPage {
            messages: listing[start..end]
                .iter()
                .map(|m| MessageRef::new(&m.id))
                .collect(),
            next_page_token: (end < listing.len()).then(|| end.to_string()),
        })
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        self.record(format!("get:{}", id));
        self.check_credential()?;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::transient("Requested entity was not found."))
    }

    async fn list_history(&self, request: &HistoryRequest) -> Result<HistoryPage, ProviderError> {
        self.record(format!("history:{}", request.start_cursor));
        self.check_credential()?;
        let state = self.state.lock().unwrap();
        if state.history_expired {
            return Err(ProviderError::CursorInvalid);
        }

        let start: u64 = request.start_cursor.parse().unwrap();
        let mut added: Vec<&RawMessage> = state
            .messages
            .iter()
            .filter(|m| m.history_id().is_some_and(|h| h > start))
            .collect();
        added.sort_by_key(|m| m.history_id());
        Ok(HistoryPage {
            entries: added
                .into_iter()
                .map(|m| HistoryEntry {
                    id: m.history_id.clone().unwrap_or_default(),
                    messages_added: vec![AddedMessage {
                        id: m.id.clone(),
                        label_ids: m.label_ids.clone().unwrap_or_default(),
                    }],
                })
                .collect(),
            next_page_token: None,
        })
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        self.record(format!("attachment:{}:{}", message_id, attachment_id));
        self.check_credential()?;
        self.state
            .lock()
            .unwrap()
            .attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| ProviderError::transient("Invalid attachment token"))
    }

    async fn get_profile(&self) -> Result<Profile, ProviderError> {
        self.record("profile".into());
        self.check_credential()?;
        Ok(Profile {
            email_address: ME.into(),
            history_id: None,
        })
    }

    async fn watch(&self, topic: &str) -> Result<WatchResult, ProviderError> {
        self.record(format!("watch:{}", topic));
        self.check_credential()?;
        Ok(WatchResult {
            history_id: None,
            expiration: Some("1700604800000".into()),
        })
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.record("stop".into());
        Ok(())
    }
}

fn header(name: &str, value: &str) -> Header {
    Header {
        name: name.into(),
        value: value.into(),
    }
}

fn html_part(html: &str) -> MessagePart {
    MessagePart {
        mime_type: Some("text/html".into()),
        body: Some(MessageBody {
            size: Some(html.len() as u64),
            data: Some(BASE64_URL_SAFE_NO_PAD.encode(html)),
            attachment_id: None,
        }),
        ..Default::default()
    }
}

/// A single-part HTML message
pub fn message(id: &str, history_id: u64, from: &str, to: &str, html: &str) -> RawMessage {
    let headers = vec![
        header("From", from),
        header("To", to),
        header("Subject", &format!("Message {}", id)),
        header("Message-ID", &format!("<{}@mail.example.com>", id)),
    ];
    GmailMessage {
        id: id.into(),
        thread_id: format!("t-{}", id),
        label_ids: Some(vec!["INBOX".into()]),
        snippet: String::new(),
        history_id: Some(history_id.to_string()),
        internal_date: Some((1_700_000_000_000 + history_id as i64 * 1000).to_string()),
        payload: Some(MessagePart {
            headers: Some(headers),
            ..html_part(html)
        }),
    }
}

pub fn incoming(id: &str, history_id: u64, from: &str) -> RawMessage {
    message(id, history_id, from, ME, &format!("<p>Hello from {}</p>", id))
}

pub fn draft(id: &str, history_id: u64, to: &str) -> RawMessage {
    let mut raw = message(id, history_id, ME, to, "<p>unsent</p>");
    raw.label_ids = Some(vec!["DRAFT".into()]);
    raw
}

/// Turn `raw` into multipart/mixed with a remote attachment
pub fn with_attachment(mut raw: RawMessage, filename: &str, attachment_id: &str) -> RawMessage {
    let payload = raw.payload.take().unwrap_or_default();
    let body_part = MessagePart {
        part_id: Some("0".into()),
        headers: None,
        ..payload.clone()
    };
    let attachment = MessagePart {
        part_id: Some("1".into()),
        mime_type: Some("application/pdf".into()),
        filename: Some(filename.into()),
        body: Some(MessageBody {
            size: Some(2048),
            data: None,
            attachment_id: Some(attachment_id.into()),
        }),
        ..Default::default()
    };
    raw.payload = Some(MessagePart {
        mime_type: Some("multipart/mixed".into()),
        headers: payload.headers,
        body: Some(MessageBody::default()),
        parts: Some(vec![body_part, attachment]),
        ..Default::default()
    });
    raw
}

/// Base64 Pub/Sub payload for a mailbox change
pub fn push_data(address: &str, history_id: u64) -> String {
    BASE64_STANDARD.encode(format!(
        r#"{{"emailAddress":"{}","historyId":{}}}"#,
        address, history_id
    ))
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
