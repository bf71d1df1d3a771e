//! Error types for ctidashy.
//!
//! This module defines all error types used throughout the ctidashy crate.
//! Every variant maps onto an HTTP status so the web layer can surface it as
//! the uniform `{status: "error", message}` body.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// The main error type for ctidashy operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to write the configuration file.
    #[error("failed to save configuration to {path}: {message}")]
    ConfigSave {
        /// Path of the configuration file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// A directory or file path required by a panel is not configured.
    #[error("{what} not configured")]
    NotConfigured {
        /// Which setting is missing.
        what: String,
    },

    // === Request Errors ===
    /// A required request field was absent or empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the field.
        field: &'static str,
    },

    /// The request body, query string or path could not be read.
    #[error("{message}")]
    Rejected {
        /// Status chosen by the extractor (400, 415 or 422).
        status: StatusCode,
        /// What was wrong with the request.
        message: String,
    },

    /// A request field was present but unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A feature toggle is switched off in the configuration.
    #[error("{feature} feature is disabled")]
    FeatureDisabled {
        /// Display name of the feature.
        feature: &'static str,
    },

    /// Something the request referred to does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of thing that was looked up.
        what: &'static str,
        /// The identifier that was looked up.
        name: String,
    },

    // === Authentication Errors ===
    /// Username or password did not match.
    #[error("Invalid credentials.")]
    InvalidCredentials,

    /// The request carried no valid session.
    #[error("login required")]
    LoginRequired,

    /// The logged-in user lacks access to a panel.
    #[error("access to '{panel}' is not permitted")]
    PanelDenied {
        /// The panel id that was requested.
        panel: String,
    },

    // === Account Errors ===
    /// A dashboard user with this name already exists.
    #[error("user already exists: {username}")]
    UserExists {
        /// The conflicting username.
        username: String,
    },

    /// Email address failed validation.
    #[error("invalid email address: {email}")]
    InvalidEmail {
        /// The rejected address.
        email: String,
    },

    // === Transfer Errors ===
    /// A copied file did not match its source after the copy.
    #[error("verification failed for {path}: expected {expected} bytes, found {actual}")]
    VerificationFailed {
        /// Path of the copied file.
        path: PathBuf,
        /// Size of the source file.
        expected: u64,
        /// Size of the target file (0 when missing).
        actual: u64,
    },

    // === OpenCTI Errors ===
    /// The OpenCTI server did not answer in time.
    #[error("Request timed out")]
    UpstreamTimeout,

    /// The OpenCTI server could not be reached.
    #[error("Failed to connect to OpenCTI server: {0}")]
    UpstreamUnavailable(String),

    /// The OpenCTI server answered with a transport-level failure.
    #[error("OpenCTI request failed: {0}")]
    Upstream(String),

    /// The GraphQL response carried an `errors` array.
    #[error("GraphQL error: {message}")]
    GraphQl {
        /// The first error message reported by the server.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File system operation on a known path failed.
    #[error("failed to access {path}: {source}")]
    File {
        /// Path that was being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// CSV reading or writing failed.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// The CSV file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: csv::Error,
    },

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for ctidashy operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout
        } else if err.is_connect() {
            Self::UpstreamUnavailable(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a not-configured error for the named setting.
    #[must_use]
    pub fn not_configured(what: impl Into<String>) -> Self {
        Self::NotConfigured { what: what.into() }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Wrap a CSV error with the file it happened in.
    #[must_use]
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    /// Check if this error is an authentication or authorization failure.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::LoginRequired | Self::PanelDenied { .. }
        )
    }

    /// Check if this error came from talking to OpenCTI.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout
                | Self::UpstreamUnavailable(_)
                | Self::Upstream(_)
                | Self::GraphQl { .. }
        )
    }

    /// The HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField { .. }
            | Self::InvalidInput(_)
            | Self::InvalidEmail { .. }
            | Self::NotConfigured { .. }
            | Self::ConfigValidation { .. }
            | Self::GraphQl { .. } => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } => *status,
            Self::InvalidCredentials | Self::LoginRequired => StatusCode::UNAUTHORIZED,
            Self::PanelDenied { .. } | Self::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UserExists { .. } => StatusCode::CONFLICT,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ConfigLoad(_)
            | Self::ConfigSave { .. }
            | Self::VerificationFailed { .. }
            | Self::Io(_)
            | Self::File { .. }
            | Self::DirectoryCreate { .. }
            | Self::Csv { .. }
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
