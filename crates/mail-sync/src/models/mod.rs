//! Domain models for the sync engine

mod account;
mod address;
mod checkpoint;
mod message;
mod record;

pub use account::{AccountKey, AccountSetup, IncrementalStrategy, IngestionStrategy};
pub use address::{EmailAddress, extract_email, normalize_address, split_address_list};
pub use checkpoint::{SyncCheckpoint, compare_cursors, parse_history_id};
pub use message::{AttachmentPart, AttachmentSource, CanonicalMessage, CanonicalMessageBuilder};
pub use record::{Attachment, ConversationTarget, MessageRecord, MessageUpdate, TargetKind};
