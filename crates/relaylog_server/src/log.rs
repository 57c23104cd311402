//! The relay's message log.
//!
//! Wraps [`MessageStore`] with protocol types: messages are stored with
//! tagged values under their canonical timestamp, and each group's index
//! snapshot is kept in its JSON wire form.

use crate::error::ServerResult;
use relaylog_protocol::{HashIndex, Message, Timestamp, Value};
use relaylog_storage::{GroupTransaction, MessageStore, StoredMessage};
use std::sync::Arc;

/// Deduplicated, append-only log of messages, partitioned by group.
#[derive(Debug, Clone)]
pub struct MessageLog {
    store: Arc<MessageStore>,
}

impl MessageLog {
    /// Creates a log over `store`.
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Opens a transaction on `group_id`, waiting for any other writer of
    /// the same group to finish.
    pub fn begin(&self, group_id: &str) -> LogTransaction<'_> {
        LogTransaction {
            txn: self.store.begin(group_id),
        }
    }

    /// Returns the group's messages after `after`, ascending, skipping
    /// those written by `excluding_replica`.
    ///
    /// # Errors
    ///
    /// Fails if a stored row no longer decodes.
    pub fn query_after(
        &self,
        group_id: &str,
        after: &Timestamp,
        excluding_replica: &str,
    ) -> ServerResult<Vec<Message>> {
        let mut messages = Vec::new();
        for row in self.store.scan_after(group_id, &after.to_string()) {
            let message = decode(group_id, row)?;
            if message.timestamp.replica_id() != excluding_replica {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Returns the group's committed index, or an empty one for an unseen
    /// group.
    ///
    /// # Errors
    ///
    /// Fails if the persisted snapshot does not decode.
    pub fn index(&self, group_id: &str) -> ServerResult<HashIndex> {
        decode_index(self.store.load_index(group_id))
    }

    /// Recomputes the group's index from its stored messages.
    ///
    /// # Errors
    ///
    /// Fails if a stored timestamp no longer parses.
    pub fn rebuild_index(&self, group_id: &str) -> ServerResult<HashIndex> {
        self.store
            .messages(group_id)
            .iter()
            .try_fold(HashIndex::new(), |index, row| {
                Ok(index.insert(&Timestamp::parse(&row.timestamp)?))
            })
    }
}

/// Exclusive write access to one group of the log.
///
/// Dropping it without [`LogTransaction::commit`] discards every append and
/// the index update.
#[must_use = "a transaction does nothing unless committed"]
pub struct LogTransaction<'a> {
    txn: GroupTransaction<'a>,
}

impl LogTransaction<'_> {
    /// Appends `message` unless a message with the same timestamp is
    /// already in the group.
    ///
    /// Returns true if it was new. A duplicate never changes the stored
    /// value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the value cannot be tagged.
    pub fn append_if_absent(&mut self, message: &Message) -> ServerResult<bool> {
        let row = StoredMessage::new(
            message.timestamp.to_string(),
            message.dataset.as_str(),
            message.row.as_str(),
            message.column.as_str(),
            message.value.tag()?,
        );
        Ok(self.txn.insert_if_absent(row))
    }

    /// The group's index as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Fails if the persisted snapshot does not decode.
    pub fn index(&self) -> ServerResult<HashIndex> {
        decode_index(self.txn.index())
    }

    /// Replaces the group's index when the transaction commits.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be encoded.
    pub fn put_index(&mut self, index: &HashIndex) -> ServerResult<()> {
        self.txn.put_index(serde_json::to_string(index)?);
        Ok(())
    }

    /// Commits the appends and the index together.
    ///
    /// Returns the number of messages inserted.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot persist the transaction; nothing is
    /// applied in that case.
    pub fn commit(self) -> ServerResult<usize> {
        Ok(self.txn.commit()?)
    }
}

fn decode(group_id: &str, row: StoredMessage) -> ServerResult<Message> {
    Ok(Message {
        timestamp: Timestamp::parse(&row.timestamp)?,
        group_id: group_id.to_string(),
        dataset: row.dataset,
        row: row.row,
        column: row.column,
        value: Value::detag(&row.value)?,
    })
}

fn decode_index(snapshot: Option<String>) -> ServerResult<HashIndex> {
    match snapshot {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(HashIndex::new()),
    }
}
