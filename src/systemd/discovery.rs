//! Unit discovery.
//!
//! Listing uses `systemctl list-units --output=json` and falls back to the
//! plain text table on systemd versions without JSON output. Every listed
//! `.service` unit is then described with `systemctl show`.
//!
//! Discovery never returns a partial list: a failed listing or a failed
//! `show` for any unit fails the whole call, so a remote hiccup cannot look
//! like units disappearing.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{HostSession, RemoteSystemd};
use crate::command::ShellCommand;
use crate::connection::ConnectionError;
use crate::error::{Error, Result};
use crate::model::{Dependencies, EnablementState, Host, UnitStatus};

/// A unit as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveredUnit {
    pub name: String,
    pub description: Option<String>,
    pub status: UnitStatus,
    pub enablement: EnablementState,
    pub load_state: Option<String>,
    pub active_state: Option<String>,
    pub sub_state: Option<String>,
    pub main_pid: Option<u32>,
    pub exec_start: Option<String>,
    pub exec_reload: Option<String>,
    pub exec_stop: Option<String>,
    pub restart_policy: Option<String>,
    pub unit_file_path: Option<String>,
    pub dependencies: Dependencies,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListedUnit {
    unit: String,
}

fn list_units(json: bool) -> ShellCommand {
    let cmd = ShellCommand::new("systemctl")
        .arg("list-units")
        .arg("--type=service")
        .arg("--all")
        .arg("--no-pager");
    if json {
        cmd.arg("--output=json")
    } else {
        cmd.arg("--no-legend").arg("--plain")
    }
}

fn show_unit(name: &str) -> ShellCommand {
    ShellCommand::new("systemctl")
        .arg("show")
        .arg(name)
        .arg("--no-pager")
}

/// Parse `systemctl list-units --output=json`. `None` when the output is not
/// a JSON array of units.
pub fn parse_unit_list_json(output: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<ListedUnit>>(output.trim())
        .ok()
        .map(|units| units.into_iter().map(|u| u.unit).collect())
}

/// Parse the plain text table: `UNIT LOAD ACTIVE SUB DESCRIPTION...`.
pub fn parse_unit_list_text(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(".service"))
        .filter_map(|line| {
            let line = line.trim_start().trim_start_matches(['●', '*']).trim_start();
            let columns: Vec<&str> = line.split_whitespace().collect();
            (columns.len() >= 4).then(|| columns[0].to_string())
        })
        .collect()
}

/// Split `systemctl show` output on the first `=` of each line.
pub fn parse_properties(output: &str) -> IndexMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Extract the command line from an `Exec*=` property.
///
/// systemd prints `{ path=/usr/bin/x ; argv[]=/usr/bin/x --flag ; ... }`.
fn exec_command(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.split_once("argv[]=") {
        Some((_, rest)) => {
            let argv = rest.split(" ;").next().unwrap_or(rest).trim();
            (!argv.is_empty()).then(|| argv.to_string())
        }
        None => Some(raw.to_string()),
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(String::from)
}

fn unit_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

impl DiscoveredUnit {
    /// Build a unit summary from its `systemctl show` properties.
    pub fn from_properties(name: &str, props: &IndexMap<String, String>) -> Self {
        let active_state = non_empty(props.get("ActiveState"));
        Self {
            name: name.to_string(),
            description: non_empty(props.get("Description")),
            status: UnitStatus::from_active_state(active_state.as_deref().unwrap_or("unknown")),
            enablement: EnablementState::from_unit_file_state(
                props.get("UnitFileState").map(String::as_str).unwrap_or("unknown"),
            ),
            load_state: non_empty(props.get("LoadState")),
            active_state,
            sub_state: non_empty(props.get("SubState")),
            main_pid: props
                .get("MainPID")
                .and_then(|p| p.trim().parse::<u32>().ok())
                .filter(|pid| *pid != 0),
            exec_start: props.get("ExecStart").and_then(|v| exec_command(v)),
            exec_reload: props.get("ExecReload").and_then(|v| exec_command(v)),
            exec_stop: props.get("ExecStop").and_then(|v| exec_command(v)),
            restart_policy: non_empty(props.get("Restart")),
            unit_file_path: non_empty(props.get("FragmentPath")),
            dependencies: Dependencies {
                after: unit_list(props.get("After")),
                before: unit_list(props.get("Before")),
                wants: unit_list(props.get("Wants")),
                requires: unit_list(props.get("Requires")),
                conflicts: unit_list(props.get("Conflicts")),
            },
            memory_mb: props
                .get("MemoryCurrent")
                .and_then(|m| m.trim().parse::<u64>().ok())
                .map(|bytes| bytes / (1024 * 1024)),
        }
    }
}

fn incomplete(host: &str, message: String) -> Error {
    Error::connection(host, ConnectionError::Incomplete(message))
}

impl RemoteSystemd {
    /// Enumerate and describe every service unit on the host.
    pub async fn discover_units(&self, host: &Host) -> Result<Vec<DiscoveredUnit>> {
        let session = self.connect(host).await?;
        let names = self.list_service_names(&session).await?;
        debug!(host = %host.hostname, count = names.len(), "Listed service units");

        let mut units = Vec::with_capacity(names.len());
        for name in names.iter().filter(|n| n.ends_with(".service")) {
            units.push(self.describe(&session, name).await?);
        }

        info!(host = %host.hostname, units = units.len(), "Discovered units");
        Ok(units)
    }

    /// Fetch the current properties of one unit.
    pub async fn unit_status(&self, host: &Host, name: &str) -> Result<DiscoveredUnit> {
        let session = self.connect(host).await?;
        self.describe(&session, name).await
    }

    async fn list_service_names(&self, session: &HostSession) -> Result<Vec<String>> {
        let result = session.run(&list_units(true)).await?;
        if !result.exit_ok {
            return Err(incomplete(
                session.host(),
                format!(
                    "listing units failed: {}",
                    result.error_message(|| format!("exit code {}", result.exit_code))
                ),
            ));
        }
        if let Some(names) = parse_unit_list_json(&result.stdout) {
            return Ok(names);
        }

        debug!(host = %session.host(), "JSON unit listing unavailable, using text output");
        let result = session.run(&list_units(false)).await?;
        if !result.exit_ok {
            return Err(incomplete(
                session.host(),
                format!(
                    "listing units failed: {}",
                    result.error_message(|| format!("exit code {}", result.exit_code))
                ),
            ));
        }
        Ok(parse_unit_list_text(&result.stdout))
    }

    async fn describe(&self, session: &HostSession, name: &str) -> Result<DiscoveredUnit> {
        let result = session.run(&show_unit(name)).await?;
        if !result.exit_ok {
            return Err(incomplete(
                session.host(),
                format!(
                    "could not read properties of {}: {}",
                    name,
                    result.error_message(|| format!("exit code {}", result.exit_code))
                ),
            ));
        }
        Ok(DiscoveredUnit::from_properties(
            name,
            &parse_properties(&result.stdout),
        ))
    }
}
