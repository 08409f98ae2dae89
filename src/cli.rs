//! Command-line interface definition for Chatwire
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat and remote history management.

use clap::{Parser, Subcommand};

/// Chatwire - streaming chat client
///
/// Talk to a model service with incrementally rendered replies and keep
/// conversations in a remote store.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatwire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/chatwire.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Override the model service base URL
    #[arg(long, env = "CHATWIRE_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Override the conversation store base URL
    #[arg(long, env = "CHATWIRE_STORE_URL")]
    pub store_url: Option<String>,

    /// Keep sessions in memory only
    #[arg(long)]
    pub no_persist: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Chatwire
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat,

    /// Manage conversations in the remote store
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// Remote history subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored conversations, most recent first
    List,

    /// Print the messages of a stored conversation
    Show {
        /// Remote conversation identifier
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete a stored conversation
    Delete {
        /// Remote conversation identifier
        #[arg(value_name = "ID")]
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/chatwire.yaml".to_string()),
            verbose: false,
            log_json: false,
            service_url: None,
            store_url: None,
            no_persist: false,
            command: Commands::Chat,
        }
    }
}
