//! JSON shapes of the sync endpoint.
//!
//! Request:
//!
//! ```json
//! {"groupId": "g", "replicaId": "A1B2C3D4E5F60708",
//!  "messages": [{"timestamp": "...", "dataset": "d", "row": "r", "column": "c", "value": 1}],
//!  "index": {"hash": 0}}
//! ```
//!
//! Response:
//!
//! ```json
//! {"status": "ok", "data": {"messages": [...], "index": {...}}}
//! ```
//!
//! Message values and the client index are kept as raw JSON here; the relay
//! validates them so that bad input surfaces as a protocol error rather than
//! a decoding failure.

use crate::merkle::HashIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Canonical timestamp string.
    pub timestamp: String,
    /// Dataset (table) name.
    pub dataset: String,
    /// Row identifier.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Null, number or string.
    pub value: Json,
}

/// A sync request from a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Group to sync.
    pub group_id: String,
    /// Requesting replica, excluded from its own catch-up set.
    pub replica_id: String,
    /// New messages, applied in order.
    #[serde(default)]
    pub messages: Vec<MessageEnvelope>,
    /// The replica's current index, if it wants a catch-up set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Json>,
}

impl SyncRequest {
    /// Creates a request with no messages and no index.
    pub fn new(group_id: impl Into<String>, replica_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            replica_id: replica_id.into(),
            messages: Vec::new(),
            index: None,
        }
    }

    /// Adds messages to send.
    pub fn with_messages(mut self, messages: Vec<MessageEnvelope>) -> Self {
        self.messages = messages;
        self
    }

    /// Attaches the replica's index.
    pub fn with_index(mut self, index: &HashIndex) -> Self {
        self.index = Some(index.to_json());
        self
    }

    /// Attaches a raw JSON index (validated by the relay).
    pub fn with_raw_index(mut self, index: Json) -> Self {
        self.index = Some(index);
        self
    }
}

/// Outcome marker of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The sync committed.
    Ok,
    /// The sync failed and had no effect.
    Error,
}

/// Payload of a successful sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    /// Catch-up set, ascending by timestamp.
    pub messages: Vec<MessageEnvelope>,
    /// The group's committed index.
    pub index: HashIndex,
}

/// A successful sync response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Always [`ResponseStatus::Ok`].
    pub status: ResponseStatus,
    /// Catch-up messages and index.
    pub data: SyncData,
}

impl SyncResponse {
    /// Creates an ok response.
    pub fn ok(messages: Vec<MessageEnvelope>, index: HashIndex) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data: SyncData { messages, index },
        }
    }
}

/// A failed sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always [`ResponseStatus::Error`].
    pub status: ResponseStatus,
    /// Machine-readable error kind.
    pub kind: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ErrorBody {
    /// Creates an error response.
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}
