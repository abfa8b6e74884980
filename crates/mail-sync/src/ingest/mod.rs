//! Message ingestion
//!
//! Turns a raw provider message into downstream [`MessageRecord`]s. Two
//! strategies decide where a message lands:
//!
//! - [`IngestionStrategy::V1`] attaches it to the channel of each external
//!   party (the sender for incoming mail, every recipient for outgoing).
//! - [`IngestionStrategy::V2`] attaches it to the account owner's mailbox.
//!
//! Both share [`RecordWriter`], which makes re-ingesting the same message a
//! field-level update instead of a duplicate.
//!
//! [`MessageRecord`]: crate::models::MessageRecord

mod channel;
mod mailbox;
mod writer;

pub use channel::ChannelIngestor;
pub use mailbox::MailboxIngestor;
pub use writer::RecordWriter;

use anyhow::Result;
use async_trait::async_trait;
use std::ops::AddAssign;
use std::sync::Arc;

pub use crate::models::IngestionStrategy;
use crate::provider::{MailProvider, RawMessage};
use crate::storage::{BlobStore, ConversationDirectory, MessageStore};

/// Per-call ingestion flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Store without notifying (used for historical backfill)
    pub no_notify: bool,
}

/// Counts from writing one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub attachments_added: usize,
    pub attachments_failed: usize,
}

impl AddAssign for StoreSummary {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.attachments_added += other.attachments_added;
        self.attachments_failed += other.attachments_failed;
    }
}

/// What happened to one ingested message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Drafts are never stored
    Draft,
    /// No conversation target matched; nothing was stored
    NoTarget,
    Stored(StoreSummary),
}

/// Ingests raw provider messages for one account
#[async_trait]
pub trait MessageIngestor: Send + Sync {
    fn strategy(&self) -> IngestionStrategy;

    async fn ingest(
        &self,
        raw: &RawMessage,
        self_address: &str,
        options: IngestOptions,
    ) -> Result<IngestOutcome>;
}

/// Everything an ingestor writes to or reads from
#[derive(Clone)]
pub struct IngestContext {
    pub store: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub directory: Arc<dyn ConversationDirectory>,
    /// Used for attachment downloads; should be the account's throttled provider
    pub provider: Arc<dyn MailProvider>,
}

/// Build the ingestor for an account's strategy
pub fn build_ingestor(strategy: IngestionStrategy, ctx: IngestContext) -> Arc<dyn MessageIngestor> {
    let writer = RecordWriter::new(ctx.store, ctx.blobs, ctx.provider);
    match strategy {
        IngestionStrategy::V1 => Arc::new(ChannelIngestor::new(writer, ctx.directory)),
        IngestionStrategy::V2 => Arc::new(MailboxIngestor::new(writer, ctx.directory)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::ProviderError;
    use crate::gmail::api::{GmailMessage, Header, MessageBody, MessagePart};
    use crate::provider::{
        HistoryPage, HistoryRequest, ListRequest, MessageIdPage, Profile, WatchResult,
    };
    use crate::storage::{InMemoryBlobStore, InMemoryDirectory, InMemoryMessageStore};
    use base64::prelude::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Provider that only serves attachments, counting downloads
    #[derive(Default)]
    pub struct AttachmentProvider {
        pub attachments: HashMap<String, Vec<u8>>,
        pub downloads: Mutex<Vec<String>>,
    }

    impl AttachmentProvider {
        pub fn download_count(&self) -> usize {
            self.downloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MailProvider for AttachmentProvider {
        async fn list_message_ids(&self, _: &ListRequest) -> Result<MessageIdPage, ProviderError> {
            unimplemented!()
        }
        async fn get_message(&self, _: &str) -> Result<RawMessage, ProviderError> {
            unimplemented!()
        }
        async fn list_history(&self, _: &HistoryRequest) -> Result<HistoryPage, ProviderError> {
            unimplemented!()
        }
        async fn get_attachment(&self, _: &str, attachment_id: &str) -> Result<Vec<u8>, ProviderError> {
            self.downloads.lock().unwrap().push(attachment_id.to_string());
            self.attachments
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| ProviderError::transient("no such attachment"))
        }
        async fn get_profile(&self) -> Result<Profile, ProviderError> {
            unimplemented!()
        }
        async fn watch(&self, _: &str) -> Result<WatchResult, ProviderError> {
            unimplemented!()
        }
        async fn stop(&self) -> Result<(), ProviderError> {
            unimplemented!()
        }
    }

    pub struct Harness {
        pub store: Arc<InMemoryMessageStore>,
        pub blobs: Arc<InMemoryBlobStore>,
        pub directory: Arc<InMemoryDirectory>,
        pub provider: Arc<AttachmentProvider>,
    }

    impl Harness {
        pub fn new(provider: AttachmentProvider) -> Self {
            Self {
                store: Arc::new(InMemoryMessageStore::new()),
                blobs: Arc::new(InMemoryBlobStore::new()),
                directory: Arc::new(InMemoryDirectory::new()),
                provider: Arc::new(provider),
            }
        }

        pub fn context(&self) -> IngestContext {
            IngestContext {
                store: self.store.clone(),
                blobs: self.blobs.clone(),
                directory: self.directory.clone(),
                provider: self.provider.clone(),
            }
        }
    }

    pub fn encode(text: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(text)
    }

    pub fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// An HTML message with the given headers
    pub fn raw_message(id: &str, headers: Vec<Header>, html: &str) -> GmailMessage {
        GmailMessage {
            id: id.into(),
            label_ids: Some(vec!["INBOX".into()]),
            internal_date: Some("1700000000000".into()),
            history_id: Some("10".into()),
            payload: Some(MessagePart {
                mime_type: Some("text/html".into()),
                headers: Some(headers),
                body: Some(MessageBody {
                    size: Some(html.len() as u64),
                    data: Some(encode(html)),
                    attachment_id: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
