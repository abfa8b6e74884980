//! Storage traits and implementations
//!
//! Downstream persistence for ingested messages, attachment content and
//! conversation lookup. Each concern is a trait so the sync engine can run
//! against in-memory stores in tests and SQLite plus files in production.

mod blob;
mod blob_file;
mod db;
mod memory;
mod sqlite;
mod traits;

pub use blob::{BlobKey, BlobStore, InMemoryBlobStore};
pub use blob_file::FileBlobStore;
pub use db::Database;
pub use memory::{InMemoryDirectory, InMemoryMessageStore};
pub use sqlite::SqliteMessageStore;
pub use traits::{ConversationDirectory, MessageStore};
