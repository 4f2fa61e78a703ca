//! Subcommands module for unitfleet CLI
//!
//! This module contains all the subcommand implementations.

pub mod deploy;
pub mod host;
pub mod overrides;
pub mod synth;

use crate::cli::output::OutputFormatter;
use crate::cli::HostArgs;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use unitfleet::config::Config;
use unitfleet::fleet::FleetManager;
use unitfleet::model::{Host, ManagedUnit, UnitSource};
use unitfleet::secrets::SecretRef;
use unitfleet::store::{MemoryStore, Page, Store, UnitFilter};
use unitfleet::synth::{base_name, service_unit_name};

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
        }
    }

    /// A fleet manager over a fresh in-memory store
    #[cfg(feature = "russh")]
    pub fn fleet(&self) -> Result<FleetManager> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Ok(FleetManager::with_ssh(self.config.clone(), store))
    }

    /// A fleet manager over a fresh in-memory store
    #[cfg(not(feature = "russh"))]
    pub fn fleet(&self) -> Result<FleetManager> {
        anyhow::bail!("unitfleet was built without SSH support (enable the `russh` feature)")
    }

    /// Record the host described on the command line
    pub async fn register_host(&self, fleet: &FleetManager, args: &HostArgs) -> Result<Host> {
        let mut host = fleet.new_host(&args.hostname, &args.user);
        host.port = args.port;
        host.key_path = args.key.as_ref().map(|k| expand_home(k));
        host.passphrase = args.passphrase_env.clone().map(SecretRef::Env);
        host.password = args.password_env.clone().map(SecretRef::Env);

        self.output.debug(&format!(
            "Target: {}",
            host.connection_string()
        ));
        Ok(fleet.store().save_host(host).await?)
    }

    /// Find or record a unit of the host by name
    pub async fn unit_record(&self, fleet: &FleetManager, host: &Host, name: &str) -> Result<ManagedUnit> {
        let existing = fleet
            .store()
            .list_units(&UnitFilter::for_host(host.id), Page::all())
            .await?;
        if let Some(unit) = existing
            .into_iter()
            .find(|u| u.canonical_name() == base_name(name))
        {
            return Ok(unit);
        }

        let unit = ManagedUnit::new(host.id, service_unit_name(name), UnitSource::Discovered);
        Ok(fleet.store().save_unit(unit).await?)
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &Path) -> String {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string_lossy().to_string()
}

/// Load a YAML, JSON or TOML document, chosen by extension
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parsed = match extension {
        "json" => serde_json::from_str(&content).map_err(anyhow::Error::from),
        "toml" => toml::from_str(&content).map_err(anyhow::Error::from),
        _ => serde_yaml::from_str(&content).map_err(anyhow::Error::from),
    };
    parsed.with_context(|| format!("Failed to parse {}", path.display()))
}
