//! Configuration module for unitfleet
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/unitfleet/unitfleet.toml)
//! - User configuration (~/.config/unitfleet/unitfleet.toml)
//! - Project configuration (./unitfleet.toml)
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::command::Escalation;
use crate::connection::executor::DEFAULT_POOL_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SSH transport settings
    pub ssh: SshConfig,

    /// Remote systemd layout and privileges
    pub systemd: SystemdConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// SSH configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Default connect and command timeout for new hosts
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Default connection retries for new hosts
    pub retries: u32,

    /// Maximum concurrent remote commands across all hosts
    pub pool_size: usize,

    /// Accept host keys not present in known_hosts
    pub accept_unknown_hosts: bool,

    /// Known hosts file
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
            pool_size: DEFAULT_POOL_SIZE,
            accept_unknown_hosts: true,
            known_hosts: None,
        }
    }
}

/// Systemd settings on managed hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemdConfig {
    /// Directory unit files are written to
    pub unit_dir: String,

    /// Escalation prefix for privileged commands
    pub escalation: Escalation,

    /// Upper bound for log retrieval
    pub max_log_lines: u32,
}

impl Default for SystemdConfig {
    fn default() -> Self {
        Self {
            unit_dir: "/etc/systemd/system".to_string(),
            escalation: Escalation::Sudo,
            max_log_lines: 10_000,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (`text` or `json`)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest priority first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/unitfleet/unitfleet.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("unitfleet/unitfleet.toml"));
        }

        paths.push(PathBuf::from("unitfleet.toml"));

        if let Ok(env_config) = std::env::var("UNITFLEET_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; values the other file changed from
    /// the defaults take precedence.
    fn merge(&self, other: Config) -> Config {
        let ssh_default = SshConfig::default();
        let systemd_default = SystemdConfig::default();
        let logging_default = LoggingConfig::default();

        fn pick<T: PartialEq>(ours: &T, theirs: T, default: &T) -> T
        where
            T: Clone,
        {
            if &theirs != default {
                theirs
            } else {
                ours.clone()
            }
        }

        Config {
            ssh: SshConfig {
                timeout: pick(&self.ssh.timeout, other.ssh.timeout, &ssh_default.timeout),
                retries: pick(&self.ssh.retries, other.ssh.retries, &ssh_default.retries),
                pool_size: pick(&self.ssh.pool_size, other.ssh.pool_size, &ssh_default.pool_size),
                accept_unknown_hosts: pick(
                    &self.ssh.accept_unknown_hosts,
                    other.ssh.accept_unknown_hosts,
                    &ssh_default.accept_unknown_hosts,
                ),
                known_hosts: other.ssh.known_hosts.or_else(|| self.ssh.known_hosts.clone()),
            },
            systemd: SystemdConfig {
                unit_dir: pick(
                    &self.systemd.unit_dir,
                    other.systemd.unit_dir,
                    &systemd_default.unit_dir,
                ),
                escalation: pick(
                    &self.systemd.escalation,
                    other.systemd.escalation,
                    &systemd_default.escalation,
                ),
                max_log_lines: pick(
                    &self.systemd.max_log_lines,
                    other.systemd.max_log_lines,
                    &systemd_default.max_log_lines,
                ),
            },
            logging: LoggingConfig {
                level: pick(&self.logging.level, other.logging.level, &logging_default.level),
                format: pick(&self.logging.format, other.logging.format, &logging_default.format),
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // UNITFLEET_SSH_TIMEOUT, seconds or a humantime string
        if let Ok(timeout) = std::env::var("UNITFLEET_SSH_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.ssh.timeout = Duration::from_secs(secs);
            } else if let Ok(d) = humantime_serde::re::humantime::parse_duration(&timeout) {
                self.ssh.timeout = d;
            }
        }

        // UNITFLEET_POOL_SIZE
        if let Ok(size) = std::env::var("UNITFLEET_POOL_SIZE") {
            if let Ok(n) = size.parse() {
                self.ssh.pool_size = n;
            }
        }

        // UNITFLEET_LOG_LEVEL
        if let Ok(level) = std::env::var("UNITFLEET_LOG_LEVEL") {
            self.logging.level = level;
        }

        // UNITFLEET_LOG_FORMAT
        if let Ok(format) = std::env::var("UNITFLEET_LOG_FORMAT") {
            self.logging.format = format;
        }

        // UNITFLEET_UNIT_DIR
        if let Ok(dir) = std::env::var("UNITFLEET_UNIT_DIR") {
            self.systemd.unit_dir = dir;
        }

        // UNITFLEET_SUDO
        if let Ok(mode) = std::env::var("UNITFLEET_SUDO") {
            match mode.as_str() {
                "sudo" | "1" | "true" => self.systemd.escalation = Escalation::Sudo,
                "sudo-non-interactive" | "sudo -n" => {
                    self.systemd.escalation = Escalation::SudoNonInteractive
                }
                "none" | "0" | "false" => self.systemd.escalation = Escalation::None,
                _ => {}
            }
        }
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        Config::default().merge_from_file(&path_buf)
    }
}
