//! Channel-based ingestion: one record per external party's channel

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use super::{IngestOptions, IngestOutcome, IngestionStrategy, MessageIngestor, RecordWriter};
use crate::gmail::normalize_message;
use crate::models::{CanonicalMessage, ConversationTarget, extract_email};
use crate::provider::RawMessage;
use crate::storage::ConversationDirectory;

pub struct ChannelIngestor {
    writer: RecordWriter,
    directory: Arc<dyn ConversationDirectory>,
}

impl ChannelIngestor {
    pub fn new(writer: RecordWriter, directory: Arc<dyn ConversationDirectory>) -> Self {
        Self { writer, directory }
    }

    /// Channels of the other parties: the sender of incoming mail, or every
    /// `To`/`Cc` recipient of outgoing mail
    fn targets(&self, message: &CanonicalMessage) -> Vec<ConversationTarget> {
        let parties: Vec<&String> = if message.incoming {
            vec![&message.from]
        } else {
            message.to.iter().chain(message.cc.iter()).collect()
        };

        let mut targets: Vec<ConversationTarget> = Vec::new();
        for party in parties {
            let Some(address) = extract_email(party) else {
                continue;
            };
            if let Some(target) = self.directory.resolve(&address)
                && !targets.iter().any(|t| t.id == target.id)
            {
                targets.push(target);
            }
        }
        targets
    }
}

#[async_trait]
impl MessageIngestor for ChannelIngestor {
    fn strategy(&self) -> IngestionStrategy {
        IngestionStrategy::V1
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

        let message = normalize_message(raw, self_address)?;
        let targets = self.targets(&message);
        if targets.is_empty() {
            debug!(
                "No channel for message {} (incoming: {})",
                message.provider_message_id, message.incoming
            );
            return Ok(IngestOutcome::NoTarget);
        }

        let summary = self.writer.write(&message, &targets, options).await?;
        Ok(IngestOutcome::Stored(summary))
    }
}
