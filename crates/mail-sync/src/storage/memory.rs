//! In-memory implementations of the storage traits
//!
//! Useful for testing and development. Data is not persisted.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{ConversationDirectory, MessageStore};
use crate::models::{
    Attachment, ConversationTarget, MessageRecord, MessageUpdate, TargetKind, normalize_address,
};

#[derive(Default)]
struct MessageTables {
    records: HashMap<String, MessageRecord>,
    /// (provider_message_id, target_id) -> record_id
    by_identity: HashMap<(String, String), String>,
    attachments: HashMap<String, Vec<Attachment>>,
}

/// In-memory message store
#[derive(Default)]
pub struct InMemoryMessageStore {
    tables: RwLock<MessageTables>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MessageTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MessageTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All records, ordered by send time
    pub fn records(&self) -> Vec<MessageRecord> {
        let mut records: Vec<_> = self.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.record_id.cmp(&b.record_id)));
        records
    }

    pub fn count(&self) -> usize {
        self.read().records.len()
    }

    /// Records attached to one target
    pub fn records_for_target(&self, target_id: &str) -> Vec<MessageRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.target_id == target_id)
            .collect()
    }

    pub fn attachments_for(&self, record_id: &str) -> Vec<Attachment> {
        self.read()
            .attachments
            .get(record_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_by_provider_id_and_target(
        &self,
        provider_message_id: &str,
        target_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let tables = self.read();
        let key = (provider_message_id.to_string(), target_id.to_string());
        Ok(tables
            .by_identity
            .get(&key)
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn create(&self, record: MessageRecord) -> Result<String> {
        let mut tables = self.write();
        let key = (
            record.provider_message_id.clone(),
            record.target_id.clone(),
        );
        if tables.by_identity.contains_key(&key) {
            bail!(
                "Message {} already exists for target {}",
                record.provider_message_id,
                record.target_id
            );
        }
        let record_id = record.record_id.clone();
        tables.by_identity.insert(key, record_id.clone());
        tables.records.insert(record_id.clone(), record);
        Ok(record_id)
    }

    async fn update_fields(&self, record_id: &str, update: &MessageUpdate) -> Result<()> {
        let mut tables = self.write();
        let Some(record) = tables.records.get_mut(record_id) else {
            bail!("Message record {} not found", record_id);
        };
        update.apply(record);
        Ok(())
    }

    async fn list_attachments(&self, record_id: &str) -> Result<Vec<Attachment>> {
        Ok(self.attachments_for(record_id))
    }

    async fn add_attachment(&self, record_id: &str, attachment: Attachment) -> Result<()> {
        let mut tables = self.write();
        if !tables.records.contains_key(record_id) {
            bail!("Message record {} not found", record_id);
        }
        let list = tables.attachments.entry(record_id.to_string()).or_default();
        if list
            .iter()
            .any(|a| a.same_file(&attachment.name, attachment.last_modified))
        {
            bail!(
                "Attachment {} already stored on record {}",
                attachment.name,
                record_id
            );
        }
        list.push(attachment);
        Ok(())
    }
}

/// In-memory conversation directory
///
/// Keys are normalized addresses.
#[derive(Default)]
pub struct InMemoryDirectory {
    targets: RwLock<HashMap<(TargetKind, String), ConversationTarget>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: ConversationTarget) {
        let key = (target.kind, normalize_address(&target.address));
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, target);
    }

    pub fn remove(&self, kind: TargetKind, address: &str) -> Option<ConversationTarget> {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, normalize_address(address)))
    }

    fn lookup(&self, kind: TargetKind, address: &str) -> Option<ConversationTarget> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, normalize_address(address)))
            .cloned()
    }
}

impl ConversationDirectory for InMemoryDirectory {
    fn resolve(&self, address: &str) -> Option<ConversationTarget> {
        self.lookup(TargetKind::Channel, address)
    }

    fn mailbox(&self, address: &str) -> Option<ConversationTarget> {
        self.lookup(TargetKind::Mailbox, address)
    }
}
