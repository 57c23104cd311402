//! relaylog CLI
//!
//! Command-line tools for the relaylog sync relay.
//!
//! # Commands
//!
//! - `sync` - Apply a JSON sync request and print the response
//! - `inspect` - List groups with message counts and index digests
//! - `verify` - Check persisted indexes against the stored messages
//! - `ping` - Liveness probe

mod commands;

use clap::{Parser, Subcommand};
use relaylog_server::{ServerConfig, SyncServer, DEFAULT_MAX_BATCH};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// relaylog command-line tools.
#[derive(Parser)]
#[command(name = "relaylog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file (in-memory relay when omitted)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Do not fsync the journal after each commit
    #[arg(global = true, long)]
    no_fsync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a sync request and print the response
    Sync {
        /// File holding the JSON request (stdin when omitted)
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Maximum number of messages per request
        #[arg(long, default_value_t = DEFAULT_MAX_BATCH)]
        max_batch: usize,
    },

    /// List groups with message counts and index digests
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rebuild each group's index and compare it with the persisted one
    Verify,

    /// Check that the relay answers
    Ping,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServerConfig::new().with_sync_on_commit(!cli.no_fsync);
    if let Some(path) = &cli.path {
        config = config.with_data_path(path);
    }

    match cli.command {
        Commands::Sync { request, max_batch } => {
            let server = SyncServer::new(config.with_max_batch(max_batch))?;
            commands::sync::run(&server, request.as_deref())?;
        }
        Commands::Inspect { format } => {
            cli.path.as_ref().ok_or("Journal path required for inspect")?;
            let server = SyncServer::new(config)?;
            commands::inspect::run(&server, &format)?;
        }
        Commands::Verify => {
            cli.path.as_ref().ok_or("Journal path required for verify")?;
            let server = SyncServer::new(config)?;
            commands::verify::run(&server)?;
        }
        Commands::Ping => {
            let server = SyncServer::new(config)?;
            println!("{}", server.ping());
        }
        Commands::Version => {
            println!("relaylog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("relaylog protocol v{}", relaylog_protocol::VERSION);
        }
    }

    Ok(())
}
