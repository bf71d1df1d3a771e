//! Command-line interface for ctidashy.
//!
//! This module provides the CLI structure for the `ctidashy` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, LogFormatArg, ManifestCommand, ServeCommand, UserCommand};

/// ctidashy - CTI analyst dashboard
///
/// Serves the dashboard panels over HTTP and offers a few administrative
/// commands that work on the same files.
#[derive(Debug, Parser)]
#[command(name = "ctidashy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "plain", global = true)]
    pub log_format: LogFormatArg,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the dashboard server
    Serve(ServeCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Manage dashboard accounts
    #[command(subcommand)]
    User(UserCommand),

    /// Work with manifest files
    #[command(subcommand)]
    Manifest(ManifestCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
