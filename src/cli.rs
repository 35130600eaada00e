use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming chat relay for hosted AI agents
#[derive(Debug, Parser)]
#[command(name = "agentchat")]
#[command(version)]
#[command(about = "Streaming chat relay for hosted AI agents", long_about = None)]
pub struct Args {
    /// Relay base URL (default: config/server_url or http://127.0.0.1:8787)
    #[arg(long = "server")]
    pub server: Option<String>,

    /// JSON file attached as context for this turn
    #[arg(long = "context", value_name = "FILE")]
    pub context: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay server
    Serve {
        /// Bind address (default: config/listen or 127.0.0.1:8787)
        #[arg(long = "listen")]
        listen: Option<String>,
    },

    /// Ask the relay whether the agent service is reachable
    Test,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
