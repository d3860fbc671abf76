//! Encrypted memory store.
//!
//! Records are encrypted under per-record DEKs and persisted as rows in the
//! gateway's shared KV namespace. Sharing re-wraps a record's DEK for the
//! recipient's encryption key; soft-deleted rows are invisible to every
//! read path.

pub mod bytes;
pub mod store;
pub mod tid;

pub use bytes::Bytes;
pub use store::{ListParams, ListedRecord, MemoryStore, RecordRow, SharedRow};
pub use tid::next_tid;
