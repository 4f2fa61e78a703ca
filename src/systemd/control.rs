//! Unit control actions and journal retrieval.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{ActionOutcome, RemoteSystemd};
use crate::command::ShellCommand;
use crate::error::Error;
use crate::model::Host;

/// The six control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
}

impl ControlAction {
    pub const ALL: [ControlAction; 6] = [
        ControlAction::Start,
        ControlAction::Stop,
        ControlAction::Restart,
        ControlAction::Reload,
        ControlAction::Enable,
        ControlAction::Disable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Reload => "reload",
            ControlAction::Enable => "enable",
            ControlAction::Disable => "disable",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            ControlAction::Start => "started",
            ControlAction::Stop => "stopped",
            ControlAction::Restart => "restarted",
            ControlAction::Reload => "reloaded",
            ControlAction::Enable => "enabled",
            ControlAction::Disable => "disabled",
        }
    }

    /// Actions after which the runtime status is worth re-reading.
    pub fn changes_runtime_state(self) -> bool {
        matches!(
            self,
            ControlAction::Start | ControlAction::Stop | ControlAction::Restart | ControlAction::Reload
        )
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "Invalid action: {}. Valid actions: start, stop, restart, reload, enable, disable",
                    s
                ))
            })
    }
}

/// Syslog priority floor for journal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPriority {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogPriority {
    /// Numeric syslog level.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl FromStr for LogPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "emerg" | "0" => Ok(LogPriority::Emerg),
            "alert" | "1" => Ok(LogPriority::Alert),
            "crit" | "2" => Ok(LogPriority::Crit),
            "err" | "error" | "3" => Ok(LogPriority::Err),
            "warning" | "warn" | "4" => Ok(LogPriority::Warning),
            "notice" | "5" => Ok(LogPriority::Notice),
            "info" | "6" => Ok(LogPriority::Info),
            "debug" | "7" => Ok(LogPriority::Debug),
            _ => Err(Error::configuration(format!("Unknown log priority '{}'", s))),
        }
    }
}

/// Journal query options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub lines: u32,
    pub since: Option<String>,
    pub until: Option<String>,
    pub priority: Option<LogPriority>,
    /// Substring filter applied after retrieval
    pub grep: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            lines: 100,
            since: None,
            until: None,
            priority: None,
            grep: None,
        }
    }
}

impl LogQuery {
    /// Build the journalctl command with the line count clamped to `1..=max_lines`.
    pub fn command(&self, escalation: crate::command::Escalation, unit: &str, max_lines: u32) -> ShellCommand {
        let lines = self.lines.clamp(1, max_lines.max(1));
        let mut cmd = ShellCommand::privileged(escalation, "journalctl")
            .arg("-u")
            .arg(unit)
            .arg("--no-pager")
            .arg("-n")
            .arg(lines.to_string());
        if let Some(since) = &self.since {
            cmd = cmd.arg("--since").arg(since.as_str());
        }
        if let Some(until) = &self.until {
            cmd = cmd.arg("--until").arg(until.as_str());
        }
        if let Some(priority) = self.priority {
            cmd = cmd.arg("-p").arg(priority.level().to_string());
        }
        cmd
    }

    /// Apply the client-side text filter.
    pub fn filter(&self, text: String) -> String {
        match self.grep.as_deref().filter(|g| !g.is_empty()) {
            Some(needle) => text
                .lines()
                .filter(|line| line.contains(needle))
                .map(|line| format!("{}\n", line))
                .collect(),
            None => text,
        }
    }
}

/// Retrieved journal text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Logs {
    pub success: bool,
    pub text: String,
    /// Counted locally from the returned text
    pub line_count: usize,
    pub error: Option<String>,
}

impl Logs {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            text: String::new(),
            line_count: 0,
            error: Some(error),
        }
    }
}

impl RemoteSystemd {
    /// Run `systemctl <action> <unit>` with privileges.
    pub async fn control_unit(&self, host: &Host, unit: &str, action: ControlAction) -> ActionOutcome {
        let command = self.systemctl().arg(action.as_str()).arg(unit);
        let outcome = async {
            let session = self.connect(host).await?;
            session.run(&command).await
        }
        .await;

        match outcome {
            Ok(result) if result.exit_ok => {
                info!(host = %host.hostname, unit, action = %action, "Unit action completed");
                ActionOutcome::ok(format!("Successfully {} {}", action.past_tense(), unit))
            }
            Ok(result) => {
                let message = result.error_message(|| format!("Failed to {} {}", action, unit));
                error!(host = %host.hostname, unit, action = %action, error = %message, "Unit action failed");
                ActionOutcome::failed(message)
            }
            Err(e) => {
                error!(host = %host.hostname, unit, action = %action, error = %e, "Unit control error");
                ActionOutcome::failed(format!("Failed to {} {}: {}", action, unit, e))
            }
        }
    }

    /// Retrieve journal lines for a unit.
    pub async fn fetch_logs(&self, host: &Host, unit: &str, query: &LogQuery) -> Logs {
        let command = query.command(self.settings.escalation, unit, self.settings.max_log_lines);
        let outcome = async {
            let session = self.connect(host).await?;
            session.run(&command).await
        }
        .await;

        match outcome {
            Ok(result) if result.exit_ok => {
                let text = query.filter(result.stdout);
                let line_count = text.lines().count();
                Logs {
                    success: true,
                    text,
                    line_count,
                    error: None,
                }
            }
            Ok(result) => Logs::failed(
                result.error_message(|| format!("Failed to read logs of {}", unit)),
            ),
            Err(e) => Logs::failed(e.to_string()),
        }
    }
}
