//! Sync command implementation.

use relaylog_protocol::ErrorBody;
use relaylog_server::SyncServer;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Runs the sync command.
///
/// Reads the request from `request` (stdin when `None`), prints the JSON
/// response and fails if the relay rejected the request.
pub fn run(server: &SyncServer, request: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let body = match request {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut body = String::new();
            io::stdin().read_to_string(&mut body)?;
            body
        }
    };

    debug!(bytes = body.len(), "read sync request");

    let (response, ok) = apply(server, &body);
    println!("{response}");
    if ok {
        Ok(())
    } else {
        Err("Sync request rejected".into())
    }
}

/// Applies one request body, returning the response and whether it
/// succeeded.
pub fn apply(server: &SyncServer, body: &str) -> (String, bool) {
    let response = server.handle_json(body);
    let ok = serde_json::from_str::<ErrorBody>(&response).is_err();
    (response, ok)
}
