//! Deployment commands: validate, deploy and remove

use super::synth::deployment;
use super::CommandContext;
use crate::cli::HostArgs;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use unitfleet::fleet::RemoveOptions;

/// Arguments for the validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Deployment file (YAML, JSON or TOML)
    #[arg(required_unless_present = "template")]
    pub file: Option<PathBuf>,

    /// Use a built-in template instead of a file
    #[arg(long, conflicts_with = "file")]
    pub template: Option<String>,
}

/// Arguments for the deploy command
#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Deployment file (YAML, JSON or TOML)
    #[arg(required_unless_present = "template")]
    pub file: Option<PathBuf>,

    /// Use a built-in template instead of a file
    #[arg(long, conflicts_with = "file")]
    pub template: Option<String>,

    /// Render the unit files without touching the host
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the remove command
#[derive(Parser, Debug, Clone)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub host: HostArgs,

    /// Unit name, with or without `.service`
    pub unit: String,

    /// Also remove `<unit>.timer`
    #[arg(long)]
    pub timer: bool,

    /// Remove a unit that unitfleet did not deploy
    #[arg(long)]
    pub force: bool,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let config = deployment(self.file.as_ref(), self.template.as_deref())?;
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;

        let report = fleet.validate_unit_config(host.id, &config).await;
        fleet.shutdown().await;
        let report = report?;

        if ctx.output.is_json() {
            ctx.output.json(&report)?;
        } else {
            let message = if report.valid {
                format!("{} can be deployed", config.service.base_name())
            } else {
                format!("{} has {} problem(s)", config.service.base_name(), report.errors.len())
            };
            ctx.output.outcome(&host.hostname, report.valid, &message);
            ctx.output.list("Errors", &report.errors);
            ctx.output.warnings(&report.warnings);
            ctx.output.list("Suggestions", &report.suggestions);
        }
        Ok(report.check().map_or_else(|e| e.exit_code(), |()| 0))
    }
}

impl DeployArgs {
    /// Execute the deploy command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let config = deployment(self.file.as_ref(), self.template.as_deref())?;
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;

        let outcome = fleet.deploy_unit(host.id, &config, self.dry_run).await;
        fleet.shutdown().await;
        let outcome = outcome?;

        if ctx.output.is_json() {
            ctx.output.json(&outcome)?;
            return Ok(if outcome.success { 0 } else { 1 });
        }

        if self.dry_run {
            ctx.output.banner(&format!("Dry run: {}", config.service.base_name()));
            for (name, content) in &outcome.rendered {
                ctx.output.section(name);
                ctx.output.text(content);
            }
        }
        ctx.output.outcome(&host.hostname, outcome.success, &outcome.message);
        ctx.output.list("Files", &outcome.created_files);
        ctx.output.list("Actions", &outcome.actions_performed);
        ctx.output.warnings(&outcome.warnings);
        Ok(if outcome.success { 0 } else { 1 })
    }
}

impl RemoveArgs {
    fn options(&self) -> RemoveOptions {
        RemoveOptions {
            remove_files: true,
            remove_timer: self.timer,
            confirm_foreign: self.force,
        }
    }

    /// Execute the remove command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let fleet = ctx.fleet()?;
        let host = ctx.register_host(&fleet, &self.host).await?;
        let unit = ctx.unit_record(&fleet, &host, &self.unit).await?;

        let outcome = fleet.remove_unit(unit.id, self.options()).await;
        fleet.shutdown().await;
        let outcome = outcome?;

        if ctx.output.is_json() {
            ctx.output.json(&outcome)?;
        } else {
            ctx.output.outcome(&host.hostname, outcome.success, &outcome.message);
            ctx.output.list("Actions", &outcome.actions_performed);
            ctx.output.warnings(&outcome.warnings);
            if !outcome.success && !self.force {
                ctx.output
                    .hint("Units not deployed by unitfleet need --force to be removed");
            }
        }
        Ok(if outcome.success { 0 } else { 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_always_deletes_files() {
        let args = RemoveArgs::try_parse_from(["remove", "-H", "web-1", "worker", "--force"]).unwrap();
        let options = args.options();
        assert!(options.remove_files);
        assert!(options.confirm_foreign);
        assert!(!options.remove_timer);
    }

    #[test]
    fn test_deploy_args() {
        let args = DeployArgs::try_parse_from([
            "deploy",
            "-H",
            "web-1",
            "--template",
            "web-service",
            "--dry-run",
        ])
        .unwrap();
        assert!(args.dry_run);
        assert!(args.file.is_none());

        assert!(DeployArgs::try_parse_from(["deploy", "-H", "web-1"]).is_err());
    }
}
