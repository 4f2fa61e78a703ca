//! Systemd operations on remote hosts.
//!
//! [`RemoteSystemd`] combines the connection pool, the command executor and
//! the remote layout settings. Operations live in the submodules as further
//! `impl RemoteSystemd` blocks:
//!
//! - [`info`]: connection test and system facts
//! - [`discovery`]: unit enumeration and property parsing
//! - [`control`]: start/stop/enable/disable and log retrieval
//! - [`deploy`]: unit creation, removal and configuration validation
//! - [`overrides`]: drop-in apply, removal, validation and backups
//!
//! Transport failures inside control, deploy and override operations are
//! turned into failed outcomes. Fact gathering and discovery return them as
//! errors, because "nothing could be determined" is different from a partial
//! answer there.

pub mod control;
pub mod deploy;
pub mod discovery;
pub mod info;
pub mod overrides;
pub mod steps;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::command::ShellCommand;
use crate::config::SystemdConfig;
use crate::connection::{CommandError, CommandResult, ConnectionPool, Session};
use crate::connection::CommandExecutor;
use crate::error::{Error, Result};
use crate::model::Host;
use crate::secrets::SecretResolver;

pub use control::{ControlAction, LogPriority, LogQuery, Logs};
pub use deploy::{DeployOutcome, ValidationReport};
pub use discovery::DiscoveredUnit;
pub use info::ConnectionCheck;
pub use overrides::{OverrideApplied, OverrideContent, RestoreMode};
pub use steps::{Step, StepPlan, StepPolicy, StepReport};

/// Result of a single unit action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Remote systemd operations over pooled sessions.
pub struct RemoteSystemd {
    pool: Arc<ConnectionPool>,
    executor: CommandExecutor,
    settings: SystemdConfig,
    resolver: Arc<dyn SecretResolver>,
}

impl RemoteSystemd {
    pub fn new(
        pool: Arc<ConnectionPool>,
        executor: CommandExecutor,
        settings: SystemdConfig,
        resolver: Arc<dyn SecretResolver>,
    ) -> Self {
        Self {
            pool,
            executor,
            settings,
            resolver,
        }
    }

    pub fn settings(&self) -> &SystemdConfig {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Acquire a pooled session to the host.
    pub async fn connect(&self, host: &Host) -> Result<HostSession> {
        let target = host.session_target(self.resolver.as_ref())?;
        let key = target.pool_key();
        let session = self
            .pool
            .acquire(&target)
            .await
            .map_err(|e| Error::connection(&host.hostname, e))?;
        Ok(HostSession {
            session,
            pool: Arc::clone(&self.pool),
            executor: self.executor.clone(),
            host: host.hostname.clone(),
            key,
            timeout: target.timeout,
        })
    }

    /// `sudo systemctl`
    fn systemctl(&self) -> ShellCommand {
        ShellCommand::privileged(self.settings.escalation, "systemctl")
    }

    fn privileged(&self, program: &'static str) -> ShellCommand {
        ShellCommand::privileged(self.settings.escalation, program)
    }

    fn unit_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.settings.unit_dir.trim_end_matches('/'), file_name)
    }
}

/// A session bound to one host for the duration of an operation.
pub struct HostSession {
    session: Arc<dyn Session>,
    pool: Arc<ConnectionPool>,
    executor: CommandExecutor,
    host: String,
    key: String,
    timeout: Duration,
}

impl HostSession {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a command. Only transport failures are errors.
    ///
    /// A session lost mid-command is dropped from the pool so the next
    /// operation reconnects.
    pub async fn run(&self, command: &ShellCommand) -> Result<CommandResult> {
        match self
            .executor
            .run(self.session.as_ref(), command, self.timeout)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                if matches!(e, CommandError::Interrupted(_) | CommandError::ChannelFailed(_)) {
                    debug!(host = %self.host, error = %e, "Dropping broken session");
                    self.pool.discard(&self.key).await;
                }
                Err(Error::command(&self.host, e))
            }
        }
    }

    /// Run a command and report whether it exited zero.
    pub async fn check(&self, command: &ShellCommand) -> Result<bool> {
        Ok(self.run(command).await?.exit_ok)
    }
}
