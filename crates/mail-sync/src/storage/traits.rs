//! Storage trait definitions

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Attachment, ConversationTarget, MessageRecord, MessageUpdate};

/// Downstream store for ingested messages
///
/// Records are unique per (`provider_message_id`, `target_id`). Writing the
/// same message twice must go through `find` + `update_fields`, never a
/// second `create`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_by_provider_id_and_target(
        &self,
        provider_message_id: &str,
        target_id: &str,
    ) -> Result<Option<MessageRecord>>;

    /// Insert a new record and return its id
    async fn create(&self, record: MessageRecord) -> Result<String>;

    /// Apply changed fields to an existing record
    async fn update_fields(&self, record_id: &str, update: &MessageUpdate) -> Result<()>;

    async fn list_attachments(&self, record_id: &str) -> Result<Vec<Attachment>>;

    async fn add_attachment(&self, record_id: &str, attachment: Attachment) -> Result<()>;
}

/// Maps normalized addresses to conversation targets
///
/// Lookups are synchronous; implementations keep their index in memory.
pub trait ConversationDirectory: Send + Sync {
    /// Channel for an external party's address
    fn resolve(&self, address: &str) -> Option<ConversationTarget>;

    /// Personal mailbox owned by the account with this address
    fn mailbox(&self, address: &str) -> Option<ConversationTarget>;
}
