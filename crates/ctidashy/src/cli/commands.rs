//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::logging::LogFormat;

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.bind_addr`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the active config path)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// Dashboard account commands.
#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// List dashboard accounts and their panels
    List,

    /// Create a dashboard account with the search panel
    Add {
        /// Login name
        username: String,

        /// Password
        #[arg(short, long)]
        password: String,
    },

    /// Remove a dashboard account
    Remove {
        /// Login name
        username: String,
    },

    /// Grant a dashboard account one more panel
    Grant {
        /// Login name
        username: String,

        /// Panel name, e.g. `re_send` or `user_mgmt`
        panel: String,
    },
}

/// Manifest commands.
#[derive(Debug, Subcommand)]
pub enum ManifestCommand {
    /// List source rows whose hash is missing from the target manifest
    Compare {
        /// Low-side manifest
        source: PathBuf,

        /// High-side manifest
        target: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Plain,
    /// One JSON object per line
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Plain => Self::Plain,
            LogFormatArg::Json => Self::Json,
        }
    }
}
