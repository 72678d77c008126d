//! beckon-hook: CLI entry for Beckon session tracking.
//!
//! One binary serves every process that feeds or queries the daemon: agent
//! hooks configured in ~/.claude/settings.json, ccsb.v1 sidecar emitters,
//! the codex notify hook, and ad-hoc CLI queries.
//!
//! ## Subcommands
//!
//! - `handle`: Claude Code hook handler, reads JSON from stdin
//! - `ccsb`: ccsb.v1 sidecar event, reads JSON from stdin
//! - `codex-notify`: codex turn-complete notification (argument or stdin)
//! - `list` / `focus` / `acknowledge`: request/response queries

mod daemon_client;
mod handle;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beckon-hook")]
#[command(about = "Beckon session tracker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a Claude Code hook event (reads JSON from stdin)
    Handle,

    /// Ingest a ccsb.v1 sidecar event (reads JSON from stdin)
    Ccsb,

    /// Forward a codex turn-complete notification
    CodexNotify {
        /// Notification JSON; read from stdin when absent
        #[arg(value_name = "JSON")]
        payload: Option<String>,
    },

    /// Print tracked sessions as JSON
    List {
        /// Collapse agent teams to their leader row
        #[arg(long)]
        filtered: bool,
    },

    /// Focus the window and pane hosting a session
    Focus {
        /// Session id, identity key, or display index
        #[arg(value_name = "TARGET")]
        target: String,
    },

    /// Mark a waiting session as seen
    Acknowledge {
        /// Session id or identity key
        #[arg(value_name = "TARGET")]
        target: String,

        /// Clear the mark instead of setting it
        #[arg(long)]
        clear: bool,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Handle => {
            if let Err(e) = handle::run_hook() {
                tracing::error!(error = %e, "beckon-hook handle failed");
                std::process::exit(1);
            }
        }
        Commands::Ccsb => {
            if let Err(e) = handle::run_ccsb() {
                tracing::error!(error = %e, "beckon-hook ccsb failed");
                std::process::exit(1);
            }
        }
        Commands::CodexNotify { payload } => {
            // Notify delivery is best-effort - log errors but exit 0 so a dead
            // daemon never surfaces as a broken codex notify hook.
            if let Err(e) = handle::run_codex_notify(payload.as_deref()) {
                tracing::warn!(error = %e, "beckon-hook codex-notify failed");
            }
        }
        Commands::List { filtered } => run_query(daemon_client::list_sessions(filtered)),
        Commands::Focus { target } => run_query(daemon_client::focus(&target)),
        Commands::Acknowledge { target, clear } => {
            run_query(daemon_client::acknowledge(&target, clear))
        }
    }
}

/// Query subcommands print the daemon's response data and fail loudly;
/// unlike event intake there is no store fallback to hide behind.
fn run_query(result: Result<serde_json::Value, String>) {
    match result {
        Ok(data) => {
            let rendered = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
            println!("{}", rendered);
        }
        Err(e) => {
            eprintln!("beckon-hook: {}", e);
            std::process::exit(1);
        }
    }
}
