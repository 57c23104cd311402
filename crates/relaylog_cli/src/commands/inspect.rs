//! Inspect command implementation.

use relaylog_server::SyncServer;
use serde::Serialize;

/// Relay inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path, if the relay is durable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Total number of stored messages.
    pub message_count: usize,
    /// Per-group statistics, sorted by group id.
    pub groups: Vec<GroupStats>,
}

/// Statistics for a single group.
#[derive(Debug, Serialize)]
pub struct GroupStats {
    /// Group ID.
    pub group_id: String,
    /// Number of stored messages.
    pub message_count: usize,
    /// Number of timestamps in the persisted index.
    pub indexed: u64,
    /// Root digest of the persisted index, in hex.
    pub root_hash: String,
}

/// Gathers statistics for every group.
pub fn collect(server: &SyncServer) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = server.store();
    let mut groups = Vec::new();
    for group_id in store.groups() {
        let index = server.log().index(&group_id)?;
        groups.push(GroupStats {
            message_count: store.message_count(&group_id),
            indexed: index.len(),
            root_hash: format!("{:08x}", index.root_hash()),
            group_id,
        });
    }

    Ok(InspectResult {
        path: server
            .config()
            .data_path
            .as_ref()
            .map(|p| p.display().to_string()),
        message_count: groups.iter().map(|g| g.message_count).sum(),
        groups,
    })
}

/// Runs the inspect command.
pub fn run(server: &SyncServer, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(server)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text(&result),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    if let Some(path) = &result.path {
        println!("Journal: {path}");
    }
    println!("Groups: {}", result.groups.len());
    println!("Messages: {}", result.message_count);
    if result.groups.is_empty() {
        return;
    }
    println!();
    println!("{:<24} {:>10} {:>10} {:>10}", "GROUP", "MESSAGES", "INDEXED", "ROOT");
    for group in &result.groups {
        println!(
            "{:<24} {:>10} {:>10} {:>10}",
            group.group_id, group.message_count, group.indexed, group.root_hash
        );
    }
}
