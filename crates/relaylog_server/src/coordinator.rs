//! One sync round: apply a replica's batch, then compute its catch-up set.

use crate::error::{ServerError, ServerResult};
use crate::log::MessageLog;
use relaylog_protocol::{HashIndex, Message, ProtocolResult, SyncRequest, Timestamp};
use tracing::debug;

/// Result of a sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Messages the replica is missing, ascending, none of its own.
    pub messages: Vec<Message>,
    /// The group's committed index.
    pub index: HashIndex,
    /// How many of the submitted messages were new.
    pub accepted: usize,
}

/// Applies sync requests to the log.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    log: MessageLog,
    max_batch: usize,
}

impl SyncCoordinator {
    /// Creates a coordinator over `log` accepting up to `max_batch`
    /// messages per request.
    pub fn new(log: MessageLog, max_batch: usize) -> Self {
        Self { log, max_batch }
    }

    /// The log this coordinator writes to.
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Runs one sync.
    ///
    /// The batch is validated as a whole before anything is written. New
    /// messages and the group's updated index are committed together, so
    /// a failure leaves the group exactly as it was. When the request
    /// carries an index, the catch-up set holds every message from the
    /// first diverging bucket on, minus the requester's own.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidRequest`] for a missing id or an oversized
    ///   batch
    /// - [`ServerError::Protocol`] for a malformed timestamp, a value that
    ///   is not null, number or string, or an incompatible client index
    /// - [`ServerError::Storage`] if the commit fails
    pub fn sync(&self, request: SyncRequest) -> ServerResult<SyncOutcome> {
        let SyncRequest {
            group_id,
            replica_id,
            messages,
            index: client_index,
        } = request;

        if group_id.is_empty() {
            return Err(ServerError::InvalidRequest("empty groupId".into()));
        }
        if replica_id.is_empty() {
            return Err(ServerError::InvalidRequest("empty replicaId".into()));
        }
        if messages.len() > self.max_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many messages: {} > {}",
                messages.len(),
                self.max_batch
            )));
        }

        let messages = messages
            .into_iter()
            .map(|envelope| Message::from_envelope(&group_id, envelope))
            .collect::<ProtocolResult<Vec<_>>>()?;
        for message in &messages {
            message.value.tag()?;
        }
        let client_index = client_index
            .as_ref()
            .map(HashIndex::from_json)
            .transpose()?;

        let mut txn = self.log.begin(&group_id);
        let mut index = txn.index()?;
        let mut accepted = 0;
        for message in &messages {
            if txn.append_if_absent(message)? {
                index = index.insert(&message.timestamp);
                accepted += 1;
            }
        }
        txn.put_index(&index)?;
        txn.commit()?;

        let divergence = client_index.as_ref().and_then(|client| index.diff(client));
        let catch_up = match divergence {
            Some(millis) => self
                .log
                .query_after(&group_id, &Timestamp::floor(millis), &replica_id)?,
            None => Vec::new(),
        };

        debug!(
            group = %group_id,
            replica = %replica_id,
            submitted = messages.len(),
            accepted,
            divergence = ?divergence,
            returned = catch_up.len(),
            "sync applied"
        );

        Ok(SyncOutcome {
            messages: catch_up,
            index,
            accepted,
        })
    }
}
