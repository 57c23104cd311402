//! # relaylog Protocol
//!
//! Ordering, indexing and wire types shared by relaylog replicas and the relay.
//!
//! This crate provides:
//! - [`Timestamp`] and the replica-owned [`Clock`] (hybrid logical clock)
//! - [`HashIndex`], the merkle trie over timestamps used to find divergence
//! - [`Value`] and its tagged storage encoding
//! - [`Message`] plus the JSON request/response shapes of the sync endpoint
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use relaylog_protocol::{HashIndex, Timestamp};
//!
//! let a: Timestamp = "2024-03-01T12:00:00.000Z-0000-A1B2C3D4E5F60708".parse().unwrap();
//! let b: Timestamp = "2024-03-01T12:05:00.000Z-0000-A1B2C3D4E5F60708".parse().unwrap();
//!
//! let server = HashIndex::new().insert(&a).insert(&b);
//! let client = HashIndex::new().insert(&a);
//!
//! // The first differing bucket is the minute of `b`.
//! assert_eq!(server.diff(&client), Some(b.millis()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod error;
mod merkle;
mod message;
mod value;
mod wire;

pub use clock::{
    bucket_path, bucket_start, BucketPath, Clock, ManualClock, SystemClock, Timestamp, WallClock,
    BUCKET_MILLIS, DEFAULT_MAX_DRIFT_MS, INDEX_DEPTH, INDEX_HORIZON_MS, MAX_COUNTER,
};
pub use error::{ProtocolError, ProtocolResult};
pub use merkle::HashIndex;
pub use message::Message;
pub use value::Value;
pub use wire::{ErrorBody, MessageEnvelope, ResponseStatus, SyncData, SyncRequest, SyncResponse};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
