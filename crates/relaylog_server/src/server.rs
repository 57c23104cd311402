//! The relay facade.

use crate::config::ServerConfig;
use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::error::{ServerError, ServerResult};
use crate::log::MessageLog;
use relaylog_protocol::{ErrorBody, SyncRequest, SyncResponse};
use relaylog_storage::MessageStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Payload of the liveness probe.
pub const PING_RESPONSE: &str = "ok";

/// The sync relay.
///
/// Owns the message store for the life of the process and serves sync
/// requests against it. Requests for different groups run concurrently;
/// requests for the same group are applied one at a time.
///
/// # Example
///
/// ```
/// use relaylog_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default()).unwrap();
/// let body = r#"{"groupId": "g", "replicaId": "A", "messages": [], "index": {}}"#;
///
/// // A transport would hand request bodies to handle_json and send the
/// // result back verbatim.
/// let response = server.handle_json(body);
/// assert!(response.contains(r#""status":"ok""#));
/// ```
#[derive(Debug)]
pub struct SyncServer {
    coordinator: SyncCoordinator,
    config: ServerConfig,
}

impl SyncServer {
    /// Creates a relay, opening the journal named by the configuration or
    /// keeping everything in memory when there is none.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be opened or replayed.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store = match &config.data_path {
            Some(path) => MessageStore::open(path, config.sync_on_commit)?,
            None => MessageStore::in_memory(),
        };
        info!(
            durable = store.is_durable(),
            groups = store.groups().len(),
            max_batch = config.max_batch,
            "relay ready"
        );
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Creates a relay over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<MessageStore>) -> Self {
        let coordinator = SyncCoordinator::new(MessageLog::new(store), config.max_batch);
        Self {
            coordinator,
            config,
        }
    }

    /// Runs one sync.
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::sync`].
    pub fn sync(&self, request: SyncRequest) -> ServerResult<SyncOutcome> {
        self.coordinator.sync(request)
    }

    /// Runs one sync and shapes the result as a wire response.
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::sync`].
    pub fn handle_sync(&self, request: SyncRequest) -> ServerResult<SyncResponse> {
        let outcome = self.sync(request)?;
        let messages = outcome.messages.iter().map(|m| m.to_envelope()).collect();
        Ok(SyncResponse::ok(messages, outcome.index))
    }

    /// Decodes a JSON request body, runs the sync and encodes the reply.
    ///
    /// Always returns a body: `{"status":"ok","data":...}` on success,
    /// `{"status":"error","kind":...,"reason":...}` otherwise.
    pub fn handle_json(&self, body: &str) -> String {
        let result = serde_json::from_str::<SyncRequest>(body)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))
            .and_then(|request| self.handle_sync(request))
            .and_then(|response| serde_json::to_string(&response).map_err(ServerError::from));

        match result {
            Ok(encoded) => encoded,
            Err(err) => {
                if err.is_client_error() {
                    warn!(kind = err.kind(), error = %err, "sync rejected");
                } else {
                    error!(kind = err.kind(), error = %err, "sync failed");
                }
                error_body(&err)
            }
        }
    }

    /// Liveness probe.
    pub fn ping(&self) -> &'static str {
        PING_RESPONSE
    }

    /// The relay's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The relay's message log.
    pub fn log(&self) -> &MessageLog {
        self.coordinator.log()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MessageStore> {
        self.coordinator.log().store()
    }
}

fn error_body(err: &ServerError) -> String {
    let body = ErrorBody::new(err.kind(), err.to_string());
    serde_json::to_string(&body).unwrap_or_else(|_| {
        format!(
            r#"{{"status":"error","kind":"{}","reason":"unencodable error"}}"#,
            err.kind()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};
    use tempfile::tempdir;

    const TS: &str = "2024-03-01T12:00:00.000Z-0000-A";

    fn parse(body: &str) -> Json {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn ping_is_ok() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.ping(), "ok");
    }

    #[test]
    fn json_round_trip() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let push = json!({
            "groupId": "g", "replicaId": "A",
            "messages": [{"timestamp": TS, "dataset": "d", "row": "r", "column": "c", "value": "x"}]
        });
        let reply = parse(&server.handle_json(&push.to_string()));
        assert_eq!(reply["status"], "ok");
        assert_eq!(reply["data"]["messages"], json!([]));
        assert_eq!(reply["data"]["index"]["count"], 1);

        let pull = json!({"groupId": "g", "replicaId": "B", "index": {}});
        let reply = parse(&server.handle_json(&pull.to_string()));
        assert_eq!(
            reply["data"]["messages"],
            json!([{"timestamp": TS, "dataset": "d", "row": "r", "column": "c", "value": "x"}])
        );
    }

    #[test]
    fn undecodable_body_is_an_invalid_request() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let reply = parse(&server.handle_json("{not json"));
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["kind"], "invalid_request");
        assert!(reply["reason"].as_str().unwrap().starts_with("invalid request"));
    }

    #[test]
    fn protocol_errors_carry_their_kind() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let body = json!({
            "groupId": "g", "replicaId": "A",
            "messages": [{"timestamp": "nope", "dataset": "d", "row": "r", "column": "c", "value": 1}]
        });
        let reply = parse(&server.handle_json(&body.to_string()));
        assert_eq!(reply["kind"], "format");

        let body = json!({
            "groupId": "g", "replicaId": "A",
            "messages": [{"timestamp": TS, "dataset": "d", "row": "r", "column": "c", "value": true}]
        });
        let reply = parse(&server.handle_json(&body.to_string()));
        assert_eq!(reply["kind"], "serialization");
        assert_eq!(server.store().message_count("g"), 0);
    }

    #[test]
    fn durable_relay_recovers_on_restart() {
        let dir = tempdir().unwrap();
        let config = ServerConfig::new().with_data_path(dir.path().join("relay.journal"));
        let body = json!({
            "groupId": "g", "replicaId": "A",
            "messages": [{"timestamp": TS, "dataset": "d", "row": "r", "column": "c", "value": 2.5}]
        });

        let index = {
            let server = SyncServer::new(config.clone()).unwrap();
            parse(&server.handle_json(&body.to_string()))["data"]["index"].clone()
        };

        let server = SyncServer::new(config).unwrap();
        assert_eq!(server.store().message_count("g"), 1);
        assert_eq!(server.log().index("g").unwrap().to_json(), index);
    }
}
