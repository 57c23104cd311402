//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing, tagging or indexing protocol data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A timestamp string is not in canonical form.
    #[error("malformed timestamp {input:?}: {reason}")]
    Format {
        /// The offending input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A value is not one of null, number or string.
    #[error("unserializable value: {0}")]
    Serialization(String),

    /// A client-supplied index does not follow the bucketing scheme.
    #[error("incompatible index at {path:?}: {reason}")]
    IndexShape {
        /// Bucket path of the offending node (empty for the root).
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Physical time drifted further than the clock tolerates.
    #[error("clock drift of {drift_ms}ms exceeds the {max_ms}ms limit")]
    ClockDrift {
        /// Observed drift.
        drift_ms: u64,
        /// Configured limit.
        max_ms: u64,
    },

    /// The logical counter ran past its maximum within one millisecond.
    #[error("timestamp counter overflow")]
    CounterOverflow,

    /// A remote timestamp carries this clock's own replica id.
    #[error("remote timestamp carries local replica id {0}")]
    DuplicateReplica(String),
}

impl ProtocolError {
    pub(crate) fn format(input: &str, reason: impl Into<String>) -> Self {
        Self::Format {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn index_shape(path: &[u8], reason: impl Into<String>) -> Self {
        Self::IndexShape {
            path: path.iter().map(|d| char::from(b'0' + d)).collect(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Format { .. } => "format",
            ProtocolError::Serialization(_) => "serialization",
            ProtocolError::IndexShape { .. } => "index_shape",
            ProtocolError::ClockDrift { .. } => "clock_drift",
            ProtocolError::CounterOverflow => "counter_overflow",
            ProtocolError::DuplicateReplica(_) => "duplicate_replica",
        }
    }
}
