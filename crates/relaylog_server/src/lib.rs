//! # relaylog Server
//!
//! The sync relay for relaylog replicas.
//!
//! This crate provides:
//! - [`MessageLog`]: the deduplicated, group-partitioned message log
//! - [`SyncCoordinator`]: one sync round (append, index, diff, catch-up)
//! - [`SyncServer`]: the facade a transport drives, with a JSON entry point
//!   and a liveness probe
//!
//! # Protocol
//!
//! Each request is a single transaction against one group:
//! 1. The whole batch is validated (timestamps, values, client index)
//! 2. New messages are appended and folded into the group's index
//! 3. Messages and index commit together, or not at all
//! 4. The committed index is diffed against the client's; everything
//!    from the first diverging bucket on is returned, except the
//!    requester's own messages
//!
//! Retrying a request is always safe: appends are idempotent.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod coordinator;
mod error;
mod log;
mod server;

pub use config::{ServerConfig, DEFAULT_MAX_BATCH};
pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use error::{ServerError, ServerResult};
pub use log::{LogTransaction, MessageLog};
pub use server::{SyncServer, PING_RESPONSE};
