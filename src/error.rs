//! Error types for unitfleet.
//!
//! The crate-level [`Error`] carries the fleet taxonomy: transport failures
//! (`Connection`, `Command`), caller mistakes rejected before any remote call
//! (`Configuration`, `Policy`), live-host validation results (`Validation`),
//! and lookup failures (`NotFound`).

use thiserror::Error;

use crate::connection::{CommandError, ConnectionError};

/// Result type alias for unitfleet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for unitfleet.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// A session to the host could not be established or did not survive.
    #[error("Connection to '{host}' failed: {source}")]
    Connection {
        /// Host the session was for
        host: String,
        /// Transport-level cause
        #[source]
        source: ConnectionError,
    },

    /// A command could not be executed at all. A command that ran and exited
    /// non-zero is not an error.
    #[error("Command on '{host}' could not be executed: {source}")]
    Command {
        /// Host the command was sent to
        host: String,
        /// Transport-level cause
        #[source]
        source: CommandError,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Self-contradictory or malformed caller-supplied configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Configuration checked against live host state produced blocking errors.
    #[error("Validation failed: {}", .errors.join("; "))]
    Validation {
        /// Blocking problems
        errors: Vec<String>,
        /// Advisory problems
        warnings: Vec<String>,
    },

    /// Referenced record does not exist locally.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind ("Host", "Unit")
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Operation refused for a disabled host or an unmanaged unit.
    #[error("Operation not permitted: {0}")]
    Policy(String),

    /// A uniqueness rule of the store would be violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A credential reference could not be resolved.
    #[error("Secret reference '{reference}' could not be resolved: {message}")]
    Secret {
        /// The reference in its textual form
        reference: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a connection error for a host.
    pub fn connection(host: impl Into<String>, source: ConnectionError) -> Self {
        Self::Connection {
            host: host.into(),
            source,
        }
    }

    /// Creates a command error for a host.
    pub fn command(host: impl Into<String>, source: CommandError) -> Self {
        Self::Command {
            host: host.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    /// Returns true for transport failures, where the host should be marked erroring.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Command { .. })
    }

    /// Returns true when retrying the connection may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection { source, .. } => source.is_transient(),
            Error::Command { source, .. } => matches!(source, CommandError::Timeout(_)),
            _ => false,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Connection { .. } | Error::Command { .. } => 3,
            Error::Configuration(_) | Error::Validation { .. } => 4,
            Error::NotFound { .. } => 5,
            Error::Policy(_) | Error::Conflict(_) => 6,
            Error::Secret { .. } => 7,
            _ => 1,
        }
    }
}
