//! Offline commands: render, cron and templates
//!
//! None of these contact a host.

use super::{load_document, CommandContext};
use anyhow::{anyhow, Result};
use clap::Parser;
use indexmap::IndexMap;
use std::path::PathBuf;
use unitfleet::synth::{cron_to_calendar, render_service_unit, render_timer_unit, DeployConfig};
use unitfleet::templates;

/// Arguments for the render command
#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    /// Deployment file (YAML, JSON or TOML)
    #[arg(required_unless_present = "template")]
    pub file: Option<PathBuf>,

    /// Render a built-in template instead of a file
    #[arg(long, conflicts_with = "file")]
    pub template: Option<String>,
}

/// Arguments for the cron command
#[derive(Parser, Debug, Clone)]
pub struct CronArgs {
    /// Five-field cron expression, quoted
    pub expression: String,
}

/// Arguments for the templates command
#[derive(Parser, Debug, Clone)]
pub struct TemplatesArgs {
    /// Print the deployment file of one template
    #[arg(long)]
    pub show: Option<String>,
}

/// Resolve a deployment from a file or a template name
pub fn deployment(file: Option<&PathBuf>, template: Option<&str>) -> Result<DeployConfig> {
    match (file, template) {
        (_, Some(name)) => templates::find(name)
            .map(|t| t.config)
            .ok_or_else(|| anyhow!("Unknown template '{}'", name)),
        (Some(path), None) => load_document(path),
        (None, None) => Err(anyhow!("A deployment file or --template is required")),
    }
}

/// Render every file of a deployment, keyed by file name
pub fn render_files(config: &DeployConfig) -> Result<IndexMap<String, String>> {
    config.validate()?;
    let name = config.service.base_name();
    let mut files = IndexMap::new();
    files.insert(format!("{}.service", name), render_service_unit(&config.service));
    if let Some(timer) = config.requested_timer()? {
        files.insert(format!("{}.timer", name), render_timer_unit(name, timer)?);
    }
    Ok(files)
}

impl RenderArgs {
    /// Execute the render command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let config = deployment(self.file.as_ref(), self.template.as_deref())?;
        let files = render_files(&config)?;

        if ctx.output.is_json() {
            ctx.output.json(&files)?;
            return Ok(0);
        }

        for (name, content) in &files {
            ctx.output.section(name);
            ctx.output.text(content);
        }
        Ok(0)
    }
}

impl CronArgs {
    /// Execute the cron command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let calendar = cron_to_calendar(&self.expression)?;

        if ctx.output.is_json() {
            ctx.output.json(&serde_json::json!({
                "cron": self.expression,
                "on_calendar": calendar,
            }))?;
        } else {
            println!("{}", calendar);
        }
        Ok(0)
    }
}

impl TemplatesArgs {
    /// Execute the templates command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        if let Some(name) = &self.show {
            let template = templates::find(name).ok_or_else(|| anyhow!("Unknown template '{}'", name))?;
            if ctx.output.is_json() {
                ctx.output.json(&template)?;
            } else {
                ctx.output.text(&serde_yaml::to_string(&template.config)?);
            }
            return Ok(0);
        }

        let all = templates::builtin();
        if ctx.output.is_json() {
            ctx.output.json(&all)?;
            return Ok(0);
        }

        let rows: Vec<Vec<String>> = all
            .iter()
            .map(|t| {
                vec![
                    t.name.to_string(),
                    t.category.to_string(),
                    if t.config.create_timer { "yes" } else { "no" }.to_string(),
                    t.description.to_string(),
                ]
            })
            .collect();
        ctx.output.table(&["NAME", "CATEGORY", "TIMER", "DESCRIPTION"], &rows);
        ctx.output
            .hint("Use `unitfleet templates --show <name>` to print a template as a deployment file");
        Ok(0)
    }
}
