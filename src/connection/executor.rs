//! Bounded command execution.
//!
//! All remote commands go through one [`CommandExecutor`] whose semaphore caps
//! the number of commands in flight across every host. A slow command on one
//! host holds one permit; other hosts keep running until the cap is reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::trace;

use super::{CommandError, CommandResult, Session};
use crate::command::ShellCommand;

/// Default number of concurrent remote commands.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Runs commands on sessions with a global concurrency bound.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl CommandExecutor {
    /// Create an executor allowing `pool_size` commands at once (minimum 1).
    pub fn new(pool_size: usize) -> Self {
        let capacity = pool_size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Run a command, bounded by `timeout`.
    ///
    /// A non-zero exit is returned as a normal result with `exit_ok == false`.
    /// Only transport failures and timeouts are errors.
    pub async fn run(
        &self,
        session: &dyn Session,
        command: &ShellCommand,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        self.execute(session, &command.render(), timeout).await
    }

    /// Run an already rendered command line under the same bound.
    pub async fn execute(
        &self,
        session: &dyn Session,
        rendered: &str,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CommandError::ExecutorClosed)?;

        trace!(session = %session.identifier(), command = %rendered, "Executing remote command");
        let result = tokio::time::timeout(timeout, session.execute(rendered))
            .await
            .map_err(|_| CommandError::Timeout(timeout.as_secs()))??;
        trace!(
            session = %session.identifier(),
            exit_code = %result.exit_code,
            "Command completed"
        );
        Ok(result)
    }

    /// Configured number of concurrent commands.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently in use.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further commands. Commands already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}
