//! Mailbox-based ingestion: every message goes to the owner's mailbox

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

use super::{IngestOptions, IngestOutcome, IngestionStrategy, MessageIngestor, RecordWriter};
use crate::gmail::normalize_message;
use crate::provider::RawMessage;
use crate::storage::ConversationDirectory;

pub struct MailboxIngestor {
    writer: RecordWriter,
    directory: Arc<dyn ConversationDirectory>,
}

impl MailboxIngestor {
    pub fn new(writer: RecordWriter, directory: Arc<dyn ConversationDirectory>) -> Self {
        Self { writer, directory }
    }
}

#[async_trait]
impl MessageIngestor for MailboxIngestor {
    fn strategy(&self) -> IngestionStrategy {
        IngestionStrategy::V2
    }

    async fn ingest(
        &self,
        raw: &RawMessage,
        self_address: &str,
        options: IngestOptions,
    ) -> Result<IngestOutcome> {
        if raw.is_draft() {
            return Ok(IngestOutcome::Draft);
        }

        let Some(mailbox) = self.directory.mailbox(self_address) else {
            warn!("No mailbox for {}, dropping message {}", self_address, raw.id);
            return Ok(IngestOutcome::NoTarget);
        };

        let message = normalize_message(raw, self_address)?;
        let summary = self.writer.write(&message, &[mailbox], options).await?;
        Ok(IngestOutcome::Stored(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{AttachmentProvider, Harness, header, raw_message};
    use super::super::{StoreSummary, build_ingestor};
    use super::*;
    use crate::models::ConversationTarget;

    const ME: &str = "me@example.com";

    #[tokio::test]
    async fn test_both_directions_land_in_mailbox() {
        let harness = Harness::new(AttachmentProvider::default());
        harness
            .directory
            .insert(ConversationTarget::mailbox("box-me", "Me@Example.com"));
        let ingestor = build_ingestor(IngestionStrategy::V2, harness.context());
        assert_eq!(ingestor.strategy(), IngestionStrategy::V2);

        let received = raw_message(
            "in-1",
            vec![header("From", "stranger@example.org"), header("To", ME)],
            "<p>Hi</p>",
        );
        let sent = raw_message(
            "out-1",
            vec![header("From", ME), header("To", "stranger@example.org")],
            "<p>Hello back</p>",
        );

        for raw in [&received, &sent] {
            let outcome = ingestor
                .ingest(raw, ME, IngestOptions::default())
                .await
                .unwrap();
            assert_eq!(
                outcome,
                IngestOutcome::Stored(StoreSummary {
                    created: 1,
                    ..Default::default()
                })
            );
        }

        let records = harness.store.records_for_target("box-me");
        assert_eq!(records.len(), 2);
        let incoming: Vec<_> = records.iter().map(|r| (r.provider_message_id.as_str(), r.incoming)).collect();
        assert!(incoming.contains(&("in-1", true)));
        assert!(incoming.contains(&("out-1", false)));
    }

    #[tokio::test]
    async fn test_missing_mailbox_stores_nothing() {
        let harness = Harness::new(AttachmentProvider::default());
        let ingestor = build_ingestor(IngestionStrategy::V2, harness.context());

        let raw = raw_message("m1", vec![header("From", "a@example.org")], "x");
        assert_eq!(
            ingestor
                .ingest(&raw, ME, IngestOptions::default())
                .await
                .unwrap(),
            IngestOutcome::NoTarget
        );
        assert_eq!(harness.store.count(), 0);
    }

    #[tokio::test]
    async fn test_drafts_skipped() {
        let harness = Harness::new(AttachmentProvider::default());
        harness
            .directory
            .insert(ConversationTarget::mailbox("box-me", ME));
        let ingestor = build_ingestor(IngestionStrategy::V2, harness.context());

        let mut raw = raw_message("d1", vec![header("From", ME)], "draft");
        raw.label_ids = Some(vec!["DRAFT".into(), "INBOX".into()]);
        assert_eq!(
            ingestor
                .ingest(&raw, ME, IngestOptions::default())
                .await
                .unwrap(),
            IngestOutcome::Draft
        );
        assert_eq!(harness.store.count(), 0);
    }
}
