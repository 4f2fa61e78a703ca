//! Override commands: show, apply, remove, rollback and restore

use super::{load_document, CommandContext};
use crate::cli::HostArgs;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use unitfleet::fleet::{ApplyOptions, FleetManager, OverrideOutcome, RollbackOptions};
use unitfleet::synth::OverrideConfig;

/// Arguments for the override command
#[derive(Parser, Debug, Clone)]
pub struct OverrideArgs {
    #[command(flatten)]
    pub host: HostArgs,

    #[command(subcommand)]
    pub action: OverrideAction,
}

/// Override subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum OverrideAction {
    /// Print the active drop-in and its backups
    Show {
        /// Unit name
        unit: String,
    },

    /// Install a drop-in from a YAML, JSON or TOML file
    Apply {
        /// Unit name
        unit: String,

        /// Override file
        file: PathBuf,

        /// Do not back up the current drop-in
        #[arg(long)]
        no_backup: bool,

        /// Only check the override against the host
        #[arg(long)]
        validate_only: bool,
    },

    /// Delete the drop-in
    Remove {
        /// Unit name
        unit: String,

        /// Restart the unit afterwards
        #[arg(long)]
        restart: bool,
    },

    /// Restore the newest backup of the drop-in
    Rollback {
        /// Unit name
        unit: String,

        /// Restart the unit afterwards
        #[arg(long)]
        restart: bool,
    },

    /// Restore a specific backup of the drop-in
    Restore {
        /// Unit name
        unit: String,

        /// Backup path as printed by `override show`
        backup: String,
    },
}

impl OverrideAction {
    fn unit(&self) -> &str {
        match self {
            OverrideAction::Show { unit }
            | OverrideAction::Apply { unit, .. }
            | OverrideAction::Remove { unit, .. }
            | OverrideAction::Rollback { unit, .. }
            | OverrideAction::Restore { unit, .. } => unit,
        }
    }
}

impl OverrideArgs {
    /// Execute the override command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let fleet = ctx.fleet()?;
        let result = self.run(ctx, &fleet).await;
        fleet.shutdown().await;
        result
    }

    async fn run(&self, ctx: &mut CommandContext, fleet: &FleetManager) -> Result<i32> {
        let host = ctx.register_host(fleet, &self.host).await?;
        let unit = ctx.unit_record(fleet, &host, self.action.unit()).await?;

        let outcome = match &self.action {
            OverrideAction::Show { .. } => {
                let content = fleet.get_override_content(unit.id).await?;
                let backups = fleet.list_override_backups(unit.id).await?;

                if ctx.output.is_json() {
                    ctx.output.json(&serde_json::json!({
                        "override": content,
                        "backups": backups,
                    }))?;
                } else {
                    ctx.output.section(&content.path);
                    match &content.content {
                        Some(text) if content.exists => ctx.output.text(text),
                        _ => ctx.output.text("(no override)"),
                    }
                    ctx.output.list("Backups", &backups);
                }
                return Ok(0);
            }
            OverrideAction::Apply {
                file,
                no_backup,
                validate_only,
                ..
            } => {
                let config: OverrideConfig = load_document(file)?;
                // The running state decides whether the unit is restarted.
                if let Err(e) = fleet.refresh_unit_status(unit.id).await {
                    ctx.output
                        .warning(&format!("Could not read the status of {}: {}", unit.name, e));
                }
                let options = ApplyOptions {
                    apply_immediately: true,
                    validate_only: *validate_only,
                    create_backup: !no_backup,
                };
                fleet.apply_override(unit.id, &config, options).await?
            }
            OverrideAction::Remove { restart, .. } => {
                let options = RollbackOptions {
                    remove_override: true,
                    restart_after: *restart,
                };
                fleet.rollback_override(unit.id, options).await?
            }
            OverrideAction::Rollback { restart, .. } => {
                let options = RollbackOptions {
                    remove_override: false,
                    restart_after: *restart,
                };
                fleet.rollback_override(unit.id, options).await?
            }
            OverrideAction::Restore { backup, .. } => {
                fleet.restore_override_backup(unit.id, backup).await?
            }
        };

        self.report(ctx, &host.hostname, &outcome)?;
        Ok(if outcome.success { 0 } else { 1 })
    }

    fn report(&self, ctx: &CommandContext, hostname: &str, outcome: &OverrideOutcome) -> Result<()> {
        if ctx.output.is_json() {
            return ctx.output.json(outcome);
        }

        let validate_only = matches!(
            self.action,
            OverrideAction::Apply {
                validate_only: true,
                ..
            }
        );
        if validate_only {
            if let Some(preview) = &outcome.preview {
                ctx.output.section("Preview");
                ctx.output.text(preview);
            }
        }
        ctx.output.outcome(hostname, outcome.success, &outcome.message);
        if let Some(path) = &outcome.override_path {
            ctx.output.field("override", path);
        }
        if let Some(path) = &outcome.backup_path {
            ctx.output.field("backup", path);
        }
        if let Some(report) = &outcome.validation {
            ctx.output.list("Errors", &report.errors);
        }
        ctx.output.list("Changes", &outcome.changes_applied);
        ctx.output.warnings(&outcome.warnings);
        Ok(())
    }
}
