//! CLI command definitions for the `bistro` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod thread;

use clap::{Parser, Subcommand};

/// Conversational reservation host for The Modern Fork.
#[derive(Parser)]
#[command(name = "bistro", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Keep checkpoints in memory; nothing is written to disk.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on [default: server.port from config.toml].
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to [default: server.host from config.toml].
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat with the host in the terminal.
    Chat {
        /// Continue an existing thread instead of starting a new one.
        #[arg(short, long)]
        thread: Option<String>,
    },

    /// Print a thread's stored conversation.
    Show {
        /// Thread id.
        thread: String,
    },

    /// Delete a thread's checkpoint.
    Retire {
        /// Thread id.
        thread: String,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        force: bool,
    },

    /// List stored threads, most recent first.
    Threads,
}
