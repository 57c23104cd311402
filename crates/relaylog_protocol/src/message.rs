//! Messages: timestamped writes to a logical cell.

use crate::clock::Timestamp;
use crate::error::ProtocolResult;
use crate::value::Value;
use crate::wire::MessageEnvelope;

/// A single fact in a group's log.
///
/// `(timestamp, group_id)` identifies the message. `(dataset, row, column)`
/// names the cell it writes; several messages may write the same cell at
/// different timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// When and where the write happened.
    pub timestamp: Timestamp,
    /// Group namespace the message belongs to.
    pub group_id: String,
    /// Dataset (table) name.
    pub dataset: String,
    /// Row identifier.
    pub row: String,
    /// Column name.
    pub column: String,
    /// Written value.
    pub value: Value,
}

impl Message {
    /// Validates a wire message for `group_id`.
    ///
    /// # Errors
    ///
    /// - [`crate::ProtocolError::Format`] for a malformed timestamp
    /// - [`crate::ProtocolError::Serialization`] for a value that is not
    ///   null, number or string
    pub fn from_envelope(group_id: &str, envelope: MessageEnvelope) -> ProtocolResult<Self> {
        Ok(Self {
            timestamp: Timestamp::parse(&envelope.timestamp)?,
            group_id: group_id.to_string(),
            dataset: envelope.dataset,
            row: envelope.row,
            column: envelope.column,
            value: Value::try_from(envelope.value)?,
        })
    }

    /// Converts to the wire shape.
    pub fn to_envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            timestamp: self.timestamp.to_string(),
            dataset: self.dataset.clone(),
            row: self.row.clone(),
            column: self.column.clone(),
            value: self.value.to_json(),
        }
    }
}
