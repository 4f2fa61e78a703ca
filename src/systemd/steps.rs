//! Multi-step remote operations.
//!
//! Each operation names its steps with an enum implementing [`Step`]. The
//! step's [`StepPolicy`] decides what a failure means:
//!
//! - `Fatal`: stop, run registered compensations in reverse order, fail the plan
//! - `Advisory`: log a warning and continue

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use super::HostSession;
use crate::command::ShellCommand;
use crate::connection::CommandResult;

/// What a step failure does to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    Fatal,
    Advisory,
}

/// A named step of a remote operation.
pub trait Step: fmt::Display + Send + Sync {
    fn policy(&self) -> StepPolicy;
}

/// Outcome of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub success: bool,
    pub message: String,
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

/// Runs steps on one host and records what happened.
pub struct StepPlan<'a> {
    session: &'a HostSession,
    compensations: Vec<(String, ShellCommand)>,
    actions: Vec<String>,
    warnings: Vec<String>,
    failure: Option<String>,
}

impl<'a> StepPlan<'a> {
    pub fn new(session: &'a HostSession) -> Self {
        Self {
            session,
            compensations: Vec::new(),
            actions: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    /// Register a command that undoes completed work if a later fatal step fails.
    pub fn compensate(&mut self, label: impl Into<String>, command: ShellCommand) {
        self.compensations.push((label.into(), command));
    }

    /// Run one step. Returns the command result when the step succeeded.
    ///
    /// Does nothing once a fatal step has failed.
    pub async fn run<S: Step>(&mut self, step: S, command: &ShellCommand) -> Option<CommandResult> {
        if self.failure.is_some() {
            return None;
        }

        let error = match self.session.run(command).await {
            Ok(result) if result.exit_ok => {
                debug!(host = %self.session.host(), step = %step, "Step completed");
                self.actions.push(step.to_string());
                return Some(result);
            }
            Ok(result) => result.error_message(|| format!("exit code {}", result.exit_code)),
            Err(e) => e.to_string(),
        };

        let message = format!("Failed to {}: {}", step, error);
        match step.policy() {
            StepPolicy::Advisory => {
                warn!(host = %self.session.host(), step = %step, error = %error, "Advisory step failed");
                self.warnings.push(message);
            }
            StepPolicy::Fatal => {
                warn!(host = %self.session.host(), step = %step, error = %error, "Step failed, rolling back");
                self.failure = Some(message);
                self.roll_back().await;
            }
        }
        None
    }

    async fn roll_back(&mut self) {
        while let Some((label, command)) = self.compensations.pop() {
            match self.session.run(&command).await {
                Ok(result) if result.exit_ok => {
                    self.actions.push(format!("rolled back: {}", label));
                }
                Ok(result) => self.warnings.push(format!(
                    "Rollback '{}' failed: {}",
                    label,
                    result.error_message(|| format!("exit code {}", result.exit_code))
                )),
                Err(e) => self
                    .warnings
                    .push(format!("Rollback '{}' failed: {}", label, e)),
            }
        }
    }

    /// Record an advisory problem found outside a step.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Close the plan with `message` on success, or the fatal failure.
    pub fn finish(self, message: impl Into<String>) -> StepReport {
        match self.failure {
            Some(failure) => StepReport {
                success: false,
                message: failure,
                actions_performed: self.actions,
                warnings: self.warnings,
            },
            None => StepReport {
                success: true,
                message: message.into(),
                actions_performed: self.actions,
                warnings: self.warnings,
            },
        }
    }
}
