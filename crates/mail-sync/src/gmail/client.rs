//! Gmail API HTTP client
//!
//! Thin blocking wrapper over the Gmail REST endpoints the sync engine uses.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::api::{
    AttachmentResponse, GmailMessage, HistoryResponse, ListMessagesResponse, ProfileResponse,
    WatchRequest, WatchResponse,
};
use super::auth::TokenSource;

/// Error indicating the history ID has expired
#[derive(Debug, thiserror::Error)]
#[error("History ID expired or invalid")]
pub struct HistoryExpiredError;

/// Gmail API client for one mailbox
pub struct GmailClient {
    auth: Arc<dyn TokenSource>,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Largest page the API accepts for `messages.list`
    pub const MAX_PAGE_SIZE: u32 = 500;

    pub fn new(auth: Arc<dyn TokenSource>) -> Self {
        Self {
            auth,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point the client at another endpoint (API emulators)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.access_token()?))
    }

    /// List message IDs, newest first
    ///
    /// # Arguments
    /// * `max_results` - Maximum number of messages to return per page (1-500)
    /// * `page_token` - Optional page token for pagination
    /// * `query` - Optional Gmail search query (`from:a to:a`)
    pub fn list_messages(
        &self,
        max_results: u32,
        page_token: Option<&str>,
        query: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url,
            max_results.clamp(1, Self::MAX_PAGE_SIZE)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        if let Some(q) = query {
            url.push_str(&format!("&q={}", urlencoding::encode(q)));
        }

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Failed to send list messages request")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")
    }

    /// Get full message details by ID
    pub fn get_message(&self, id: &str) -> Result<GmailMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id)
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .with_context(|| format!("Failed to send get message request for {}", id))?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse message response")
    }

    /// List `messageAdded` history since a given historyId
    ///
    /// # Errors
    /// Returns `HistoryExpiredError` if the history ID is too old (404 from Gmail)
    pub fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}&historyTypes=messageAdded",
            self.base_url,
            urlencoding::encode(start_history_id)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call();

        match response {
            Ok(mut resp) => resp
                .body_mut()
                .read_json()
                .context("Failed to parse history response"),
            Err(ureq::Error::StatusCode(404)) => Err(HistoryExpiredError.into()),
            Err(e) => Err(anyhow::anyhow!("Failed to fetch history: {}", e)),
        }
    }

    /// Download attachment data (base64url in the response)
    pub fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<AttachmentResponse> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url,
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Failed to send get attachment request")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse attachment response")
    }

    pub fn get_profile(&self) -> Result<ProfileResponse> {
        let url = format!("{}/users/me/profile", self.base_url);

        let mut response = ureq::get(&url)
            .header("Authorization", &self.bearer()?)
            .call()
            .context("Failed to send get profile request")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse profile response")
    }

    /// Subscribe the mailbox to push notifications on a Pub/Sub topic
    pub fn watch(&self, topic_name: &str) -> Result<WatchResponse> {
        let url = format!("{}/users/me/watch", self.base_url);
        let request = WatchRequest {
            topic_name,
            label_ids: vec!["INBOX", "SENT"],
        };

        let mut response = ureq::post(&url)
            .header("Authorization", &self.bearer()?)
            .send_json(&request)
            .context("Failed to send watch request")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse watch response")
    }

    /// Stop push notifications for the mailbox
    pub fn stop(&self) -> Result<()> {
        let url = format!("{}/users/me/stop", self.base_url);

        ureq::post(&url)
            .header("Authorization", &self.bearer()?)
            .send_empty()
            .context("Failed to send stop request")?;
        Ok(())
    }
}
