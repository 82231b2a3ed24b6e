use clap::{Parser, Subcommand};

/// Approval daemon: holds outgoing email until a human approves it on a
/// channel the requesting agent cannot reach.
#[derive(Parser)]
#[command(name = "approval-daemon", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon (default)
    Serve {
        /// Delete the bootstrap config and run setup again first
        #[arg(long)]
        reset: bool,
    },

    /// Ask a running daemon for its status
    Status,

    /// Delete the bootstrap config so setup runs on next start
    Reset,

    /// Queue an email for approval and wait for the verdict
    Request {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, default_value = "")]
        draft_id: String,
    },

    /// Run first-run setup without starting the daemon
    Setup,
}
