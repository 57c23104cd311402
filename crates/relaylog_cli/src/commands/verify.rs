//! Verify command implementation.

use relaylog_server::SyncServer;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of groups checked.
    pub groups_checked: usize,
    /// Number of groups whose index matches their messages.
    pub valid_groups: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if every group checked out.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Rebuilds each group's index from its messages and compares it with the
/// persisted snapshot.
pub fn verify(server: &SyncServer) -> VerifyResult {
    let log = server.log();
    let mut result = VerifyResult::default();

    for group_id in server.store().groups() {
        result.groups_checked += 1;

        let persisted = match log.index(&group_id) {
            Ok(index) => index,
            Err(e) => {
                result
                    .errors
                    .push(format!("Group {group_id}: unreadable index: {e}"));
                continue;
            }
        };
        let rebuilt = match log.rebuild_index(&group_id) {
            Ok(index) => index,
            Err(e) => {
                result
                    .errors
                    .push(format!("Group {group_id}: unreadable message: {e}"));
                continue;
            }
        };

        if persisted == rebuilt {
            result.valid_groups += 1;
        } else {
            result.errors.push(format!(
                "Group {group_id}: index covers {} messages (root {:08x}), log holds {} (root {:08x})",
                persisted.len(),
                persisted.root_hash(),
                rebuilt.len(),
                rebuilt.root_hash()
            ));
        }
    }

    result
}

/// Runs the verify command.
pub fn run(server: &SyncServer) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &server.config().data_path {
        println!("Verifying journal at {path:?}");
        println!();
    }

    let result = verify(server);
    println!(
        "Groups checked: {}, valid: {}",
        result.groups_checked, result.valid_groups
    );
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Index verification passed");
        Ok(())
    } else {
        println!("✗ Index verification failed");
        Err("Verification failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylog_protocol::{HashIndex, Message, Timestamp, Value};
    use relaylog_server::ServerConfig;
    use serde_json::json;

    #[test]
    fn consistent_relay_passes() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let body = json!({
            "groupId": "g", "replicaId": "A",
            "messages": [{
                "timestamp": "2024-03-01T12:00:00.000Z-0000-A",
                "dataset": "d", "row": "r", "column": "c", "value": "x"
            }]
        });
        server.handle_json(&body.to_string());

        let result = verify(&server);
        assert!(result.is_ok());
        assert_eq!(result.groups_checked, 1);
        assert_eq!(result.valid_groups, 1);
    }

    #[test]
    fn stale_index_is_reported() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        let message = Message {
            timestamp: Timestamp::parse("2024-03-01T12:00:00.000Z-0000-A").unwrap(),
            group_id: "g".into(),
            dataset: "d".into(),
            row: "r".into(),
            column: "c".into(),
            value: Value::Null,
        };

        let mut txn = server.log().begin("g");
        txn.append_if_absent(&message).unwrap();
        txn.put_index(&HashIndex::new()).unwrap();
        txn.commit().unwrap();

        let result = verify(&server);
        assert!(!result.is_ok());
        assert_eq!(result.valid_groups, 0);
        assert!(result.errors[0].contains("Group g"));
        assert!(run(&server).is_err());
    }
}
