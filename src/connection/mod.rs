//! Connection layer for remote host communication.
//!
//! # Overview
//!
//! A [`Session`] is one live remote-execution channel to one host. Sessions
//! are produced by a [`SessionFactory`], cached per `host:port:user` key by
//! the [`ConnectionPool`](pool::ConnectionPool), and driven through the
//! bounded [`CommandExecutor`](executor::CommandExecutor).
//!
//! # Supported Transports
//!
//! - **SSH** (via `russh`, feature `russh`, default): pure Rust, async-native
//!
//! # Example
//!
//! ```rust,ignore
//! use unitfleet::connection::{ConnectionPool, CommandExecutor, SessionTarget};
//! use unitfleet::connection::russh::RusshSessionFactory;
//!
//! let pool = ConnectionPool::new(Arc::new(RusshSessionFactory::default()));
//! let executor = CommandExecutor::new(10);
//!
//! let session = pool.acquire(&target).await?;
//! let result = executor.run(session.as_ref(), &ShellCommand::new("uptime"), timeout).await?;
//! println!("Output: {}", result.stdout);
//! ```

pub mod executor;
pub mod pool;

/// Pure Rust SSH implementation using russh.
#[cfg(feature = "russh")]
pub mod russh;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::secrets::SensitiveString;

pub use executor::CommandExecutor;
pub use pool::ConnectionPool;

/// Errors raised while establishing or keeping a session.
///
/// Each variant is a distinct failure class; none of them is retried inside
/// the connection layer.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Authentication was rejected by the remote host.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No route to the host or the TCP connection was refused.
    #[error("No valid connections: {0}")]
    Unreachable(String),

    /// The host presented a key that differs from the known one.
    #[error("Bad host key: {0}")]
    HostKeyMismatch(String),

    /// Connection timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// SSH protocol failure from the underlying implementation.
    #[error("SSH error: {0}")]
    Protocol(String),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host answered, but not with everything that was asked for.
    #[error("Incomplete response: {0}")]
    Incomplete(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ConnectionError {
    /// Failures that may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::Unreachable(_) | ConnectionError::Timeout(_) | ConnectionError::ConnectionClosed
        )
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised when a command could not be executed at all.
#[derive(Error, Debug)]
pub enum CommandError {
    /// A channel for the command could not be opened.
    #[error("Failed to open channel: {0}")]
    ChannelFailed(String),

    /// The session died while the command was running.
    #[error("Session lost during command: {0}")]
    Interrupted(String),

    /// The command did not finish within the host's timeout.
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    /// The executor has been shut down.
    #[error("Command executor is closed")]
    ExecutorClosed,
}

/// The result of executing a command on a session.
///
/// ```rust
/// use unitfleet::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.exit_ok);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.exit_ok);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command.
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub exit_ok: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            exit_ok: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            exit_ok: false,
        }
    }

    /// Build a result from an exit code.
    pub fn from_exit(exit_code: i32, stdout: String, stderr: String) -> Self {
        if exit_code == 0 {
            Self::success(stdout, stderr)
        } else {
            Self::failure(exit_code, stdout, stderr)
        }
    }

    /// Trimmed stderr, or `fallback` when stderr is empty.
    pub fn error_message(&self, fallback: impl FnOnce() -> String) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            fallback()
        } else {
            stderr.to_string()
        }
    }
}

/// A live remote-execution session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Get the session identifier (`user@host:port`)
    fn identifier(&self) -> &str;

    /// Execute a command line. A non-zero exit is a normal result.
    async fn execute(&self, command: &str) -> Result<CommandResult, CommandError>;

    /// Close the session
    async fn close(&self) -> ConnectionResult<()>;
}

/// Creates sessions for targets.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new authenticated session. Called at most once per acquire.
    async fn connect(&self, target: &SessionTarget) -> ConnectionResult<Arc<dyn Session>>;
}

/// The one credential method used for a session.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Private key file with an optional passphrase
    Key {
        /// Path to the private key
        path: PathBuf,
        /// Passphrase for an encrypted key
        passphrase: Option<SensitiveString>,
    },
    /// Password authentication
    Password(SensitiveString),
    /// Default identity files of the managing user
    Default,
}

/// Everything needed to open a session to one host.
#[derive(Debug, Clone)]
pub struct SessionTarget {
    /// Hostname or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Remote user
    pub user: String,
    /// Credential to authenticate with
    pub credential: Credential,
    /// Bound for connecting and for every command
    pub timeout: Duration,
}

impl SessionTarget {
    /// Create a target using default identity files.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            credential: Credential::Default,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the credential
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a unique key for this target (for pooling)
    pub fn pool_key(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.user)
    }
}
