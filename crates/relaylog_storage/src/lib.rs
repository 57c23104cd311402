//! # relaylog Storage
//!
//! Durable home of the relay's message log and per-group index snapshots.
//!
//! The crate is layered:
//!
//! - [`StorageBackend`] - an opaque, append-only byte store
//!   ([`InMemoryBackend`], [`FileBackend`])
//! - a checksummed commit journal written to a backend and replayed on open
//! - [`MessageStore`] - the in-memory view rebuilt from the journal, with
//!   [`GroupTransaction`]s that stage rows and an index snapshot and publish
//!   them atomically
//!
//! ## Guarantees
//!
//! - `(timestamp, group)` is unique: a second insert of the same key is a
//!   no-op, never an overwrite
//! - A transaction holds its group exclusively from `begin` until commit or
//!   drop, so read-modify-write of a group's index is serialized
//! - Transactions on different groups run concurrently
//! - A commit is journaled and flushed before it becomes visible; a failed
//!   or dropped transaction leaves no trace
//!
//! ## Example
//!
//! ```rust
//! use relaylog_storage::{MessageStore, StoredMessage};
//!
//! let store = MessageStore::in_memory();
//!
//! let mut txn = store.begin("group-1");
//! let row = StoredMessage::new("2024-03-01T12:00:00.000Z-0000-A", "todos", "r1", "title", "S:milk");
//! assert!(txn.insert_if_absent(row.clone()));
//! assert!(!txn.insert_if_absent(row));
//! txn.put_index("{\"hash\":1}".to_string());
//! txn.commit().unwrap();
//!
//! assert_eq!(store.message_count("group-1"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;
mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::CommitRecord;
pub use memory::InMemoryBackend;
pub use store::{GroupTransaction, MessageStore, StoredMessage};
