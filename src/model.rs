//! Fleet records: hosts and the units managed on them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::connection::{Credential, SessionTarget};
use crate::error::{Error, Result};
use crate::secrets::{SecretRef, SecretResolver};
use crate::synth::{DeployConfig, OverrideConfig};

/// Record identifier. `0` marks a record that has not been saved yet.
pub type RecordId = u64;

/// Connection status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    #[default]
    Offline,
    Connecting,
    Error,
    Maintenance,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
            HostStatus::Connecting => "connecting",
            HostStatus::Error => "error",
            HostStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Facts gathered from a host. Any probe may come back empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFacts {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: Option<String>,
    pub cpu_cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_gb: Option<u64>,
}

impl SystemFacts {
    /// True when no probe produced a value.
    pub fn is_empty(&self) -> bool {
        *self == SystemFacts::default()
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// A managed remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub id: RecordId,
    /// Hostname or address, unique across the fleet
    pub hostname: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Private key path; takes precedence over a password
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<SecretRef>,
    #[serde(default)]
    pub password: Option<SecretRef>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub status: HostStatus,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub facts: SystemFacts,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_discover: bool,
}

impl Host {
    /// A new, unsaved host with default settings.
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: 0,
            hostname: hostname.into(),
            display_name: None,
            description: None,
            port: default_port(),
            username: username.into(),
            key_path: None,
            passphrase: None,
            password: None,
            connect_timeout: default_timeout(),
            retries: default_retries(),
            status: HostStatus::default(),
            last_seen_at: None,
            last_error: None,
            facts: SystemFacts::default(),
            tags: IndexMap::new(),
            enabled: true,
            auto_discover: true,
        }
    }

    /// `user@host:port`
    pub fn connection_string(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }

    pub fn is_online(&self) -> bool {
        self.status == HostStatus::Online
    }

    pub fn mark_online(&mut self) {
        self.status = HostStatus::Online;
        self.last_seen_at = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_offline(&mut self, error: Option<String>) {
        self.status = HostStatus::Offline;
        self.last_error = error;
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.status = HostStatus::Error;
        self.last_error = Some(error.into());
    }

    pub fn mark_connecting(&mut self) {
        self.status = HostStatus::Connecting;
    }

    /// Merge newly gathered facts; probes that came back empty keep the old value.
    pub fn update_facts(&mut self, facts: SystemFacts) {
        let current = &mut self.facts;
        current.os_name = facts.os_name.or(current.os_name.take());
        current.os_version = facts.os_version.or(current.os_version.take());
        current.kernel_version = facts.kernel_version.or(current.kernel_version.take());
        current.architecture = facts.architecture.or(current.architecture.take());
        current.cpu_cores = facts.cpu_cores.or(current.cpu_cores);
        current.memory_mb = facts.memory_mb.or(current.memory_mb);
        current.disk_gb = facts.disk_gb.or(current.disk_gb);
    }

    /// Build the session target, resolving the one credential method in use.
    ///
    /// A key path wins over a password when both are set.
    pub fn session_target(&self, resolver: &dyn SecretResolver) -> Result<SessionTarget> {
        let credential = match (&self.key_path, &self.password) {
            (Some(path), _) => Credential::Key {
                path: path.into(),
                passphrase: self
                    .passphrase
                    .as_ref()
                    .map(|r| resolver.resolve(r))
                    .transpose()?,
            },
            (None, Some(password)) => Credential::Password(resolver.resolve(password)?),
            (None, None) => Credential::Default,
        };
        Ok(SessionTarget::new(&self.hostname, self.port, &self.username)
            .with_credential(credential)
            .with_timeout(self.connect_timeout))
    }
}

/// What manages a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    #[default]
    Systemd,
    Docker,
    Custom,
}

/// Lifecycle status, from systemd's `ActiveState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    #[default]
    Unknown,
}

impl UnitStatus {
    /// Map an `ActiveState` value. Unrecognized values map to `Unknown`.
    pub fn from_active_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "active" => UnitStatus::Active,
            "inactive" => UnitStatus::Inactive,
            "failed" => UnitStatus::Failed,
            "activating" => UnitStatus::Activating,
            "deactivating" => UnitStatus::Deactivating,
            _ => UnitStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Active => "active",
            UnitStatus::Inactive => "inactive",
            UnitStatus::Failed => "failed",
            UnitStatus::Activating => "activating",
            UnitStatus::Deactivating => "deactivating",
            UnitStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enablement, from systemd's `UnitFileState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnablementState {
    Enabled,
    Disabled,
    Static,
    Masked,
    #[default]
    Unknown,
}

impl EnablementState {
    /// Map a `UnitFileState` value. Unrecognized values map to `Unknown`.
    pub fn from_unit_file_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "enabled" => EnablementState::Enabled,
            "disabled" => EnablementState::Disabled,
            "static" => EnablementState::Static,
            "masked" => EnablementState::Masked,
            _ => EnablementState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnablementState::Enabled => "enabled",
            EnablementState::Disabled => "disabled",
            EnablementState::Static => "static",
            EnablementState::Masked => "masked",
            EnablementState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EnablementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a unit record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSource {
    /// Found on the host by discovery
    #[default]
    Discovered,
    /// Deployed by unitfleet
    Created,
}

/// Dependency lists of a unit.
///
/// Equality ignores member order; the stored order is kept for rendering.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dependencies {
    pub after: Vec<String>,
    pub before: Vec<String>,
    pub wants: Vec<String>,
    pub requires: Vec<String>,
    pub conflicts: Vec<String>,
}

fn same_members(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

impl PartialEq for Dependencies {
    fn eq(&self, other: &Self) -> bool {
        same_members(&self.after, &other.after)
            && same_members(&self.before, &other.before)
            && same_members(&self.wants, &other.wants)
            && same_members(&self.requires, &other.requires)
            && same_members(&self.conflicts, &other.conflicts)
    }
}

/// Resource usage snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<u64>,
    pub memory_limit_mb: Option<u64>,
}

/// A unit tracked on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedUnit {
    #[serde(default)]
    pub id: RecordId,
    pub host_id: RecordId,
    /// Unit name, unique per host once canonicalized to `.service`
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: UnitKind,
    #[serde(default)]
    pub unit_file_path: Option<String>,

    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub enablement: EnablementState,
    #[serde(default)]
    pub main_pid: Option<u32>,
    #[serde(default)]
    pub load_state: Option<String>,
    #[serde(default)]
    pub active_state: Option<String>,
    #[serde(default)]
    pub sub_state: Option<String>,

    #[serde(default)]
    pub exec_start: Option<String>,
    #[serde(default)]
    pub exec_reload: Option<String>,
    #[serde(default)]
    pub exec_stop: Option<String>,
    #[serde(default)]
    pub restart_policy: Option<String>,
    #[serde(default)]
    pub dependencies: Dependencies,

    #[serde(default)]
    pub is_timer: bool,
    #[serde(default)]
    pub timer_schedule: Option<String>,
    #[serde(default)]
    pub next_activation: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activation: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resources: ResourceUsage,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_check_error: Option<String>,

    #[serde(default = "default_true")]
    pub is_managed: bool,
    #[serde(default = "default_true")]
    pub is_monitored: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub source: UnitSource,
    #[serde(default)]
    pub service_config: Option<DeployConfig>,
    #[serde(default)]
    pub override_config: Option<OverrideConfig>,
}

impl ManagedUnit {
    /// A new, unsaved systemd unit record.
    pub fn new(host_id: RecordId, name: impl Into<String>, source: UnitSource) -> Self {
        Self {
            id: 0,
            host_id,
            name: name.into(),
            display_name: None,
            description: None,
            kind: UnitKind::Systemd,
            unit_file_path: None,
            status: UnitStatus::Unknown,
            enablement: EnablementState::Unknown,
            main_pid: None,
            load_state: None,
            active_state: None,
            sub_state: None,
            exec_start: None,
            exec_reload: None,
            exec_stop: None,
            restart_policy: None,
            dependencies: Dependencies::default(),
            is_timer: false,
            timer_schedule: None,
            next_activation: None,
            last_activation: None,
            resources: ResourceUsage::default(),
            started_at: None,
            last_status_check: None,
            status_check_error: None,
            is_managed: true,
            is_monitored: true,
            auto_restart: false,
            tags: IndexMap::new(),
            metadata: IndexMap::new(),
            source,
            service_config: None,
            override_config: None,
        }
    }

    /// Name without the `.service` suffix; the per-host identity of the unit.
    pub fn canonical_name(&self) -> &str {
        crate::synth::base_name(&self.name)
    }

    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }

    pub fn is_failed(&self) -> bool {
        self.status == UnitStatus::Failed
    }

    pub fn is_enabled(&self) -> bool {
        self.enablement == EnablementState::Enabled
    }

    /// Discovery may replace or delete this record.
    pub fn is_reconcilable(&self) -> bool {
        self.kind == UnitKind::Systemd && self.source == UnitSource::Discovered
    }

    /// Mark the unit as timer-activated on `schedule`.
    pub fn set_timer(&mut self, schedule: impl Into<String>) {
        self.is_timer = true;
        self.timer_schedule = Some(schedule.into());
    }

    /// Check record invariants before persisting.
    pub fn check_invariants(&self) -> Result<()> {
        if self.is_timer && self.timer_schedule.as_deref().map_or(true, str::is_empty) {
            return Err(Error::configuration(format!(
                "Unit '{}' is marked as a timer but has no schedule",
                self.name
            )));
        }
        Ok(())
    }
}
