//! Logging configuration for ctidashy.
//!
//! Route handlers log through `tracing`; this module installs the subscriber
//! once at startup, either as human-readable lines or as JSON for log
//! shippers.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Normal output level (info and above).
    #[default]
    Normal,
    /// Verbose output (debug and above).
    Verbose,
    /// Very verbose output (trace level).
    Trace,
}

impl Verbosity {
    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Default `EnvFilter` directive for this verbosity.
    ///
    /// Our own crate follows the verbosity; HTTP plumbing stays at `warn`
    /// unless tracing everything.
    #[must_use]
    pub fn default_directive(&self) -> String {
        let level = self.to_level_filter();
        match self {
            Self::Trace => format!("ctidashy={level},tower={level},axum={level},reqwest={level}"),
            _ => format!("ctidashy={level},tower=warn,axum=warn,reqwest=warn"),
        }
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single lines.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

/// Initialize the logging system.
///
/// This should be called once at application startup. The logging level can be
/// controlled via:
/// 1. The `verbosity` parameter
/// 2. The `RUST_LOG` environment variable (takes precedence)
///
/// # Examples
///
/// ```no_run
/// use ctidashy::logging::{init_logging, LogFormat, Verbosity};
///
/// init_logging(Verbosity::Normal, LogFormat::Plain);
/// ```
pub fn init_logging(verbosity: Verbosity, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already installed
    let _ = match format {
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
}

/// Initialize logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
