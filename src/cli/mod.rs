//! CLI module for unitfleet
//!
//! Argument parsing and subcommand dispatch. Host-targeted commands describe
//! the host on the command line; nothing is persisted between invocations.

pub mod commands;
pub mod output;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// unitfleet - manage systemd services on remote hosts over SSH
#[derive(Parser, Debug, Clone)]
#[command(name = "unitfleet")]
#[command(version)]
#[command(about = "Manage systemd services on remote hosts over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "UNITFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render a deployment file to unit text without contacting a host
    Render(commands::synth::RenderArgs),

    /// Convert a cron expression to a systemd calendar spec
    Cron(commands::synth::CronArgs),

    /// List or show built-in deployment templates
    Templates(commands::synth::TemplatesArgs),

    /// Test the connection to a host
    Test(commands::host::TestArgs),

    /// Gather system information from a host
    Info(commands::host::InfoArgs),

    /// Discover and list the service units of a host
    Units(commands::host::UnitsArgs),

    /// Run a control action on a unit
    Control(commands::host::ControlArgs),

    /// Read the journal of a unit
    Logs(commands::host::LogsArgs),

    /// Check a deployment file against a host
    Validate(commands::deploy::ValidateArgs),

    /// Deploy a service (and optional timer) to a host
    Deploy(commands::deploy::DeployArgs),

    /// Stop, disable and delete a unit on a host
    Remove(commands::deploy::RemoveArgs),

    /// Manage drop-in overrides of a unit
    Override(commands::overrides::OverrideArgs),
}

/// Connection arguments shared by host-targeted commands
#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Hostname or address
    #[arg(short = 'H', long = "host", env = "UNITFLEET_HOST")]
    pub hostname: String,

    /// SSH port
    #[arg(short = 'p', long, default_value = "22")]
    pub port: u16,

    /// Remote user
    #[arg(short = 'u', long, env = "UNITFLEET_USER", default_value = "root")]
    pub user: String,

    /// Private key file
    #[arg(short = 'k', long)]
    pub key: Option<PathBuf>,

    /// Environment variable holding the key passphrase
    #[arg(long, requires = "key")]
    pub passphrase_env: Option<String>,

    /// Environment variable holding the SSH password
    #[arg(long, conflicts_with = "key")]
    pub password_env: Option<String>,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
