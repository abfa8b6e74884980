//! Async [`MailProvider`] over the blocking [`GmailClient`]
//!
//! Each call runs on tokio's blocking pool. Errors are classified here:
//! an expired history id becomes `CursorInvalid`, a rejected refresh token
//! becomes `FatalAuth`, and everything else is `Transient`.

use async_trait::async_trait;
use std::sync::Arc;

use super::auth::AuthRejectedError;
use super::client::{GmailClient, HistoryExpiredError};
use super::normalize::decode_base64_bytes;
use crate::error::ProviderError;
use crate::provider::{
    AddedMessage, HistoryEntry, HistoryPage, HistoryRequest, ListRequest, MailProvider, MessageIdPage,
    MessageRef, Profile, RawMessage, WatchResult,
};

pub struct GmailProvider {
    client: Arc<GmailClient>,
}

impl GmailProvider {
    pub fn new(client: GmailClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&GmailClient) -> anyhow::Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || call(&client))
            .await
            .map_err(|e| ProviderError::transient(format!("Gmail worker task failed: {}", e)))?
            .map_err(classify)
    }
}

/// Map a client error onto the provider error classes
fn classify(err: anyhow::Error) -> ProviderError {
    if err.downcast_ref::<HistoryExpiredError>().is_some() {
        return ProviderError::CursorInvalid;
    }
    if let Some(rejected) = err.downcast_ref::<AuthRejectedError>() {
        return ProviderError::FatalAuth(rejected.0.clone());
    }
    ProviderError::Transient(format!("{:#}", err))
}

#[async_trait]
impl MailProvider for GmailProvider {
    async fn list_message_ids(&self, request: &ListRequest) -> Result<MessageIdPage, ProviderError> {
        let request = request.clone();
        let response = self
            .blocking(move |client| {
                client.list_messages(
                    request.max_results,
                    request.page_token.as_deref(),
                    request.query.as_deref(),
                )
            })
            .await?;

        Ok(MessageIdPage {
            messages: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageRef::new(m.id))
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        let id = id.to_string();
        self.blocking(move |client| client.get_message(&id)).await
    }

    async fn list_history(&self, request: &HistoryRequest) -> Result<HistoryPage, ProviderError> {
        let request = request.clone();
        let response = self
            .blocking(move |client| {
                client.list_history(&request.start_cursor, request.page_token.as_deref())
            })
            .await?;

        let entries = response
            .history
            .unwrap_or_default()
            .into_iter()
            .map(|record| HistoryEntry {
                id: record.id,
                messages_added: record
                    .messages_added
                    .unwrap_or_default()
                    .into_iter()
                    .map(|added| AddedMessage {
                        id: added.message.id,
                        label_ids: added.message.label_ids.unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();

        Ok(HistoryPage {
            entries,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let message_id = message_id.to_string();
        let attachment_id = attachment_id.to_string();
        let response = self
            .blocking(move |client| client.get_attachment(&message_id, &attachment_id))
            .await?;

        let data = response.data.unwrap_or_default();
        decode_base64_bytes(&data)
            .ok_or_else(|| ProviderError::transient("attachment data is not valid base64"))
    }

    async fn get_profile(&self) -> Result<Profile, ProviderError> {
        let profile = self.blocking(|client| client.get_profile()).await?;
        Ok(Profile {
            email_address: profile.email_address,
            history_id: profile.history_id,
        })
    }

    async fn watch(&self, topic: &str) -> Result<WatchResult, ProviderError> {
        let topic = topic.to_string();
        let response = self.blocking(move |client| client.watch(&topic)).await?;
        Ok(WatchResult {
            history_id: response.history_id,
            expiration: response.expiration,
        })
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.blocking(|client| client.stop()).await
    }
}
