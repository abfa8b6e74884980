//! Idempotent upsert of a canonical message into its targets

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::{IngestOptions, StoreSummary};
use crate::gmail::decode_base64_bytes;
use crate::models::{
    Attachment, AttachmentPart, AttachmentSource, CanonicalMessage, ConversationTarget,
    MessageRecord, MessageUpdate,
};
use crate::provider::MailProvider;
use crate::storage::{BlobKey, BlobStore, MessageStore};

/// Writes messages and attachments downstream; shared by all strategies
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn MessageStore>,
    blobs: Arc<dyn BlobStore>,
    provider: Arc<dyn MailProvider>,
}

impl RecordWriter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        blobs: Arc<dyn BlobStore>,
        provider: Arc<dyn MailProvider>,
    ) -> Self {
        Self {
            store,
            blobs,
            provider,
        }
    }

    /// Create or update one record per target, then attach missing files
    pub async fn write(
        &self,
        message: &CanonicalMessage,
        targets: &[ConversationTarget],
        options: IngestOptions,
    ) -> Result<StoreSummary> {
        let mut summary = StoreSummary::default();
        let mut contents = AttachmentContents::default();

        for target in targets {
            let existing = self
                .store
                .find_by_provider_id_and_target(&message.provider_message_id, &target.id)
                .await?;

            let record_id = match existing {
                None => {
                    let record = MessageRecord::from_message(
                        uuid::Uuid::new_v4().to_string(),
                        message,
                        target,
                        !options.no_notify,
                    );
                    let record_id = self.store.create(record).await?;
                    debug!(
                        "Created record {} for message {} on {}",
                        record_id, message.provider_message_id, target.id
                    );
                    summary.created += 1;
                    record_id
                }
                Some(record) => {
                    let update = MessageUpdate::diff(&record, message);
                    if update.is_empty() {
                        summary.unchanged += 1;
                    } else {
                        debug!(
                            "Updating record {} fields {:?}",
                            record.record_id,
                            update.changed_fields()
                        );
                        self.store.update_fields(&record.record_id, &update).await?;
                        summary.updated += 1;
                    }
                    record.record_id
                }
            };

            if !message.attachments.is_empty() {
                self.attach_missing(message, &record_id, &mut contents, &mut summary)
                    .await?;
            }
        }

        Ok(summary)
    }

    async fn attach_missing(
        &self,
        message: &CanonicalMessage,
        record_id: &str,
        contents: &mut AttachmentContents,
        summary: &mut StoreSummary,
    ) -> Result<()> {
        let last_modified = message.last_modified_millis();
        let mut existing = self.store.list_attachments(record_id).await?;

        for (index, part) in message.attachments.iter().enumerate() {
            if existing.iter().any(|a| a.same_file(&part.name, last_modified)) {
                continue;
            }

            let Some(content_ref) = contents.content_ref(index, part, message, self).await else {
                summary.attachments_failed += 1;
                continue;
            };

            let attachment = Attachment {
                name: part.name.clone(),
                mime_type: part.mime_type.clone(),
                size_bytes: part.size_bytes,
                last_modified,
                content_ref,
            };
            match self.store.add_attachment(record_id, attachment.clone()).await {
                Ok(()) => {
                    summary.attachments_added += 1;
                    existing.push(attachment);
                }
                Err(e) => {
                    warn!(
                        "Failed to store attachment {} of message {}: {:#}",
                        part.name, message.provider_message_id, e
                    );
                    summary.attachments_failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn download(&self, message: &CanonicalMessage, part: &AttachmentPart) -> Result<Vec<u8>> {
        match &part.source {
            AttachmentSource::Inline(data) => {
                decode_base64_bytes(data).context("Inline attachment data is not valid base64")
            }
            AttachmentSource::Remote(attachment_id) => Ok(self
                .provider
                .get_attachment(&message.provider_id, attachment_id)
                .await?),
        }
    }

    async fn store_blob(&self, data: Vec<u8>) -> Result<String> {
        let blobs = self.blobs.clone();
        let key = BlobKey::generate();
        let content_ref = key.as_str().to_string();
        tokio::task::spawn_blocking(move || blobs.put(&key, &data))
            .await
            .context("Blob store task failed")??;
        Ok(content_ref)
    }
}

/// Per-message cache so each attachment is downloaded and stored at most once,
/// even when the message lands on several targets
#[derive(Default)]
struct AttachmentContents {
    refs: HashMap<usize, Option<String>>,
}

impl AttachmentContents {
    async fn content_ref(
        &mut self,
        index: usize,
        part: &AttachmentPart,
        message: &CanonicalMessage,
        writer: &RecordWriter,
    ) -> Option<String> {
        if let Some(cached) = self.refs.get(&index) {
            return cached.clone();
        }

        let stored = match writer.download(message, part).await {
            Ok(data) => writer.store_blob(data).await,
            Err(e) => Err(e),
        };
        let content_ref = match stored {
            Ok(content_ref) => Some(content_ref),
            Err(e) => {
                warn!(
                    "Skipping attachment {} of message {}: {:#}",
                    part.name, message.provider_message_id, e
                );
                None
            }
        };
        self.refs.insert(index, content_ref.clone());
        content_ref
    }
}
