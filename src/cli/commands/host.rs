//! Host commands: test, info, units, control and logs

use super::CommandContext;
use crate::cli::output::format_duration;
use crate::cli::HostArgs;
use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use unitfleet::store::{Page, UnitFilter};
use unitfleet::systemd::{ControlAction, LogPriority, LogQuery};

/// Arguments for the test command
#[derive(Parser, Debug, Clone)]
pub struct TestArgs {
    #[command(flatten)]
    pub host: HostArgs,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone)]
pub struct InfoArgs {
    #[command(flatten)]
    pub host: HostArgs,
}

/// Arguments for the units command
#[derive(Parser, Debug, Clone)]
pub struct UnitsArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Only list units whose name or description contains this text
    #[arg(long)]
    pub search: Option<String>,
}

/// Arguments for the control command
#[derive(Parser, Debug, Clone)]
pub struct ControlArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Unit name, with or without `.service`
    pub unit: String,

    /// start, stop, restart, reload, enable or disable
    pub action: String,
}

/// Arguments for the logs command
#[derive(Parser, Debug, Clone)]
pub struct LogsArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Unit name, with or without `.service`
    pub unit: String,

    /// Number of lines
    #[arg(short = 'n', long, default_value = "100")]
    pub lines: u32,

    /// Show entries on or newer than this time
    #[arg(long)]
    pub since: Option<String>,

    /// Show entries on or older than this time
    #[arg(long)]
    pub until: Option<String>,

    /// Lowest priority to show (emerg .. debug)
    #[arg(long)]
    pub priority: Option<String>,

    /// Only keep lines containing this text
    #[arg(long)]
    pub grep: Option<String>,
}

impl TestArgs {
    /// Execute the test command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;

        let result = fleet.test_connection(host.id).await?;
        let host = fleet.store().get_host(host.id).await?.unwrap_or(host);
        fleet.shutdown().await;

        if ctx.output.is_json() {
            ctx.output.json(&result)?;
        } else {
            ctx.output
                .outcome(&host.connection_string(), result.success, &result.message);
            ctx.output.field("status", ctx.output.host_status(host.status));
            ctx.output.field(
                "elapsed",
                format_duration(Duration::from_millis(result.elapsed_ms)),
            );
        }
        Ok(if result.success { 0 } else { 1 })
    }
}

impl InfoArgs {
    /// Execute the info command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;

        let facts = fleet.gather_system_info(host.id).await;
        fleet.shutdown().await;
        let facts = facts?;

        if ctx.output.is_json() {
            ctx.output.json(&facts)?;
            return Ok(0);
        }

        let unknown = || "-".to_string();
        ctx.output.section(&host.hostname);
        ctx.output.field("os", facts.os_name.clone().unwrap_or_else(unknown));
        ctx.output
            .field("version", facts.os_version.clone().unwrap_or_else(unknown));
        ctx.output
            .field("kernel", facts.kernel_version.clone().unwrap_or_else(unknown));
        ctx.output
            .field("arch", facts.architecture.clone().unwrap_or_else(unknown));
        ctx.output.field(
            "cpu cores",
            facts.cpu_cores.map_or_else(unknown, |c| c.to_string()),
        );
        ctx.output.field(
            "memory",
            facts.memory_mb.map_or_else(unknown, |m| format!("{} MB", m)),
        );
        ctx.output.field(
            "disk",
            facts.disk_gb.map_or_else(unknown, |d| format!("{} GB", d)),
        );
        Ok(0)
    }
}

impl UnitsArgs {
    /// Execute the units command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;

        let discovery = fleet.discover_units(host.id, true).await;
        fleet.shutdown().await;
        let discovery = discovery?;
        if !discovery.success {
            ctx.output.error(&format!(
                "{}: {}",
                discovery.message,
                discovery.error.as_deref().unwrap_or("unknown error")
            ));
            if ctx.output.is_json() {
                ctx.output.json(&discovery)?;
            }
            return Ok(1);
        }

        let filter = UnitFilter {
            search: self.search.clone(),
            ..UnitFilter::for_host(host.id)
        };
        let units = fleet.store().list_units(&filter, Page::all()).await?;

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "discovery": discovery,
                "units": units,
            }))?;
            return Ok(0);
        }

        let rows: Vec<Vec<String>> = units
            .iter()
            .map(|u| {
                vec![
                    u.name.clone(),
                    ctx.output.unit_status(u.status),
                    u.enablement.to_string(),
                    u.main_pid.map(|p| p.to_string()).unwrap_or_default(),
                    u.description.clone().unwrap_or_default(),
                ]
            })
            .collect();
        ctx.output
            .table(&["UNIT", "STATUS", "ENABLED", "PID", "DESCRIPTION"], &rows);

        let stats = fleet.fleet_stats().await?;
        println!(
            "\n{} units: {} active, {} inactive, {} failed",
            stats.total, stats.active, stats.inactive, stats.failed
        );
        Ok(0)
    }
}

impl ControlArgs {
    /// Execute the control command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let action: ControlAction = self.action.parse()?;
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;
        let unit = ctx.unit_record(&fleet, &host, &self.unit).await?;

        let outcome = fleet.control_unit(unit.id, action).await?;
        let refreshed = fleet.store().get_unit(unit.id).await?;
        fleet.shutdown().await;

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "outcome": outcome,
                "unit": refreshed,
            }))?;
        } else {
            ctx.output.outcome(&host.hostname, outcome.success, &outcome.message);
            if let Some(unit) = refreshed.filter(|u| u.last_status_check.is_some()) {
                ctx.output.field("status", ctx.output.unit_status(unit.status));
                if let Some(error) = &unit.status_check_error {
                    ctx.output.warning(&format!("Status refresh failed: {}", error));
                }
            }
        }
        Ok(if outcome.success { 0 } else { 1 })
    }
}

impl LogsArgs {
    fn query(&self) -> Result<LogQuery> {
        let priority = self
            .priority
            .as_deref()
            .map(str::parse::<LogPriority>)
            .transpose()?;
        Ok(LogQuery {
            lines: self.lines,
            since: self.since.clone(),
            until: self.until.clone(),
            priority,
            grep: self.grep.clone(),
        })
    }

    /// Execute the logs command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let query = self.query()?;
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;
        let unit = ctx.unit_record(&fleet, &host, &self.unit).await?;

        let logs = fleet.fetch_logs(unit.id, &query).await;
        fleet.shutdown().await;
        let logs = logs?;

        if ctx.output.is_json() {
            ctx.output.json(&logs)?;
        } else if logs.success {
            ctx.output.text(&logs.text);
            ctx.output.info(&format!("{} lines", logs.line_count));
        } else {
            ctx.output
                .error(logs.error.as_deref().unwrap_or("Failed to read logs"));
        }
        ctx.output.flush();
        Ok(if logs.success { 0 } else { 1 })
    }
}
