//! Fleet operations over stored hosts and units.
//!
//! [`FleetManager`] is the composition root: it owns the connection pool,
//! the command executor, the store and the configuration, and exposes the
//! operations a front end calls by record id.
//!
//! Lookups that fail return [`Error::NotFound`]. Refusals for disabled hosts
//! and unmanaged units are decided before any remote call; operations that
//! report a result object turn them into a failed result carrying the policy
//! message, the others return [`Error::Policy`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{CommandExecutor, ConnectionPool, SessionFactory};
use crate::error::{Error, Result};
use crate::model::{Host, ManagedUnit, RecordId, SystemFacts, UnitSource, UnitStatus};
use crate::reconcile::{self, ReconcileSummary};
use crate::secrets::SecretResolver;
use crate::store::{Page, Store, UnitFilter};
use crate::synth::{render_override, DeployConfig, OverrideConfig};
use crate::systemd::deploy::suggestions;
use crate::systemd::{
    ActionOutcome, ControlAction, DeployOutcome, LogQuery, Logs, OverrideContent, RemoteSystemd,
    RestoreMode, ValidationReport,
};

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Result of a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub summary: ReconcileSummary,
    pub error: Option<String>,
}

/// Options for removing a unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Also stop the unit and delete its files on the host
    pub remove_files: bool,
    /// Also remove `<name>.timer`; implied for timer units
    pub remove_timer: bool,
    /// Allow deleting files of a unit that was not deployed by unitfleet
    pub confirm_foreign: bool,
}

/// Result of removing a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub success: bool,
    pub message: String,
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

/// Options for applying an override.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Install the drop-in now; otherwise only record it on the unit
    pub apply_immediately: bool,
    /// Check against the host and return the preview without changing anything
    pub validate_only: bool,
    pub create_backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            apply_immediately: true,
            validate_only: false,
            create_backup: true,
        }
    }
}

/// Options for rolling back an override.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOptions {
    /// Delete the drop-in; otherwise restore the newest backup
    pub remove_override: bool,
    /// Restart the unit afterwards; a failed restart is only a warning
    pub restart_after: bool,
}

/// Result of an override operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideOutcome {
    pub success: bool,
    pub message: String,
    pub changes_applied: Vec<String>,
    pub override_path: Option<String>,
    pub backup_path: Option<String>,
    pub preview: Option<String>,
    pub validation: Option<ValidationReport>,
    pub warnings: Vec<String>,
}

impl OverrideOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Unit counts across the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub failed: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_host: BTreeMap<String, usize>,
    pub timers: usize,
}

/// Entry point for fleet operations.
pub struct FleetManager {
    config: Config,
    store: Arc<dyn Store>,
    pool: Arc<ConnectionPool>,
    systemd: RemoteSystemd,
}

impl FleetManager {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        factory: Arc<dyn SessionFactory>,
        resolver: Arc<dyn SecretResolver>,
    ) -> Self {
        let executor = CommandExecutor::new(config.ssh.pool_size);
        let pool = Arc::new(ConnectionPool::with_executor(factory, executor.clone()));
        let systemd = RemoteSystemd::new(
            Arc::clone(&pool),
            executor,
            config.systemd.clone(),
            resolver,
        );
        Self {
            config,
            store,
            pool,
            systemd,
        }
    }

    /// A manager that connects over SSH and resolves secrets from the
    /// environment and files.
    #[cfg(feature = "russh")]
    pub fn with_ssh(config: Config, store: Arc<dyn Store>) -> Self {
        use crate::connection::russh::RusshSessionFactory;
        use crate::secrets::DefaultResolver;

        let factory = RusshSessionFactory::new(
            config.ssh.known_hosts.clone(),
            config.ssh.accept_unknown_hosts,
        );
        Self::new(config, store, Arc::new(factory), Arc::new(DefaultResolver))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn systemd(&self) -> &RemoteSystemd {
        &self.systemd
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// An unsaved host carrying the configured connection defaults.
    pub fn new_host(&self, hostname: impl Into<String>, username: impl Into<String>) -> Host {
        let mut host = Host::new(hostname, username);
        host.connect_timeout = self.config.ssh.timeout;
        host.retries = self.config.ssh.retries;
        host
    }

    async fn host(&self, id: RecordId) -> Result<Host> {
        self.store
            .get_host(id)
            .await?
            .ok_or_else(|| Error::not_found("Host", id))
    }

    async fn unit(&self, id: RecordId) -> Result<ManagedUnit> {
        self.store
            .get_unit(id)
            .await?
            .ok_or_else(|| Error::not_found("Unit", id))
    }

    async fn enabled_host(&self, id: RecordId) -> Result<Host> {
        let host = self.host(id).await?;
        ensure_enabled(&host)?;
        Ok(host)
    }

    /// The unit and its host, checked in that order.
    async fn unit_on_host(&self, unit_id: RecordId) -> Result<(ManagedUnit, Host)> {
        let unit = self.unit(unit_id).await?;
        let host = self.host(unit.host_id).await?;
        Ok((unit, host))
    }

    async fn save_host_logged(&self, host: Host) {
        let hostname = host.hostname.clone();
        if let Err(e) = self.store.save_host(host).await {
            warn!(host = %hostname, error = %e, "Failed to record host state");
        }
    }

    /// Check that a session can be opened and answers.
    ///
    /// Transient failures (unreachable, timeout) are retried up to the
    /// host's `retries`. The host is marked online or offline.
    pub async fn test_connection(&self, host_id: RecordId) -> Result<ConnectionTest> {
        let mut host = self.host(host_id).await?;
        let started = Instant::now();
        host.mark_connecting();

        let mut attempt = 0;
        let check = loop {
            let check = self.systemd.test_connection(&host).await;
            if check.success || !check.transient || attempt >= host.retries {
                break check;
            }
            attempt += 1;
            let delay = Duration::from_millis(500 * u64::from(attempt));
            debug!(host = %host.hostname, attempt, ?delay, "Retrying connection test");
            tokio::time::sleep(delay).await;
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = if check.success {
            host.mark_online();
            info!(host = %host.hostname, elapsed_ms, "Connection test succeeded");
            ConnectionTest {
                success: true,
                message: "Connection successful".to_string(),
                elapsed_ms,
            }
        } else {
            let error = check.error.unwrap_or_else(|| "Connection failed".to_string());
            host.mark_offline(Some(error.clone()));
            warn!(host = %host.hostname, error = %error, "Connection test failed");
            ConnectionTest {
                success: false,
                message: error,
                elapsed_ms,
            }
        };
        self.save_host_logged(host).await;
        Ok(result)
    }

    /// Gather and store system facts. A transport failure marks the host
    /// erroring and is returned.
    pub async fn gather_system_info(&self, host_id: RecordId) -> Result<SystemFacts> {
        let mut host = self.enabled_host(host_id).await?;
        match self.systemd.gather_system_info(&host).await {
            Ok(facts) => {
                host.update_facts(facts);
                host.mark_online();
                let facts = host.facts.clone();
                self.store.save_host(host).await?;
                Ok(facts)
            }
            Err(e) => {
                if e.is_transport() {
                    host.mark_error(e.to_string());
                    self.save_host_logged(host).await;
                }
                Err(e)
            }
        }
    }

    /// Discover the host's units and reconcile them into the store.
    ///
    /// Skipped, successfully, when the host has auto-discovery off and
    /// `force` is not set. A discovery failure leaves stored units untouched.
    pub async fn discover_units(&self, host_id: RecordId, force: bool) -> Result<DiscoveryResult> {
        let mut host = self.enabled_host(host_id).await?;
        if !host.auto_discover && !force {
            return Ok(DiscoveryResult {
                success: true,
                message: "Auto-discovery is disabled for this server".to_string(),
                summary: ReconcileSummary::default(),
                error: None,
            });
        }

        let discovered = match self.systemd.discover_units(&host).await {
            Ok(units) => units,
            Err(e) => {
                warn!(host = %host.hostname, error = %e, "Discovery failed");
                if e.is_transport() {
                    host.mark_error(e.to_string());
                    self.save_host_logged(host).await;
                }
                return Ok(DiscoveryResult {
                    success: false,
                    message: "Discovery failed".to_string(),
                    summary: ReconcileSummary::default(),
                    error: Some(e.to_string()),
                });
            }
        };

        let local = self
            .store
            .list_units(&UnitFilter::for_host(host.id), Page::all())
            .await?;
        let plan = reconcile::plan(host.id, &local, &discovered, Utc::now());
        let summary = reconcile::apply(self.store.as_ref(), plan).await?;

        host.mark_online();
        self.save_host_logged(host.clone()).await;
        info!(
            host = %host.hostname,
            discovered = summary.discovered,
            updated = summary.updated,
            removed = summary.removed,
            "Discovery completed"
        );
        Ok(DiscoveryResult {
            success: true,
            message: format!(
                "Discovered {} new, updated {}, removed {} units",
                summary.discovered, summary.updated, summary.removed
            ),
            summary,
            error: None,
        })
    }

    /// Run a control action on a unit, then refresh its status.
    ///
    /// A failed status refresh is recorded on the unit and logged; it does
    /// not fail the action.
    pub async fn control_unit(&self, unit_id: RecordId, action: ControlAction) -> Result<ActionOutcome> {
        let (mut unit, host) = self.unit_on_host(unit_id).await?;
        if let Err(e) = ensure_enabled(&host).and_then(|_| ensure_managed(&unit)) {
            return Ok(ActionOutcome::failed(e.to_string()));
        }

        let outcome = self.systemd.control_unit(&host, &unit.name, action).await;
        if outcome.success && action.changes_runtime_state() {
            self.refresh(&host, &mut unit).await;
        }
        Ok(outcome)
    }

    async fn refresh(&self, host: &Host, unit: &mut ManagedUnit) -> bool {
        let refreshed = match self.systemd.unit_status(host, &unit.name).await {
            Ok(remote) => {
                unit.apply_discovered(&remote, Utc::now());
                true
            }
            Err(e) => {
                warn!(host = %host.hostname, unit = %unit.name, error = %e, "Status refresh failed");
                unit.last_status_check = Some(Utc::now());
                unit.status_check_error = Some(e.to_string());
                false
            }
        };
        if let Err(e) = self.store.save_unit(unit.clone()).await {
            warn!(unit = %unit.name, error = %e, "Failed to record unit status");
        }
        refreshed
    }

    /// Re-read a unit's status from its host.
    pub async fn refresh_unit_status(&self, unit_id: RecordId) -> Result<ManagedUnit> {
        let (mut unit, host) = self.unit_on_host(unit_id).await?;
        ensure_enabled(&host)?;
        if self.refresh(&host, &mut unit).await {
            Ok(unit)
        } else {
            Err(Error::connection(
                &host.hostname,
                crate::connection::ConnectionError::Incomplete(
                    unit.status_check_error.clone().unwrap_or_default(),
                ),
            ))
        }
    }

    /// Journal lines of a unit.
    pub async fn fetch_logs(&self, unit_id: RecordId, query: &LogQuery) -> Result<Logs> {
        let (unit, host) = self.unit_on_host(unit_id).await?;
        ensure_enabled(&host)?;
        Ok(self.systemd.fetch_logs(&host, &unit.name, query).await)
    }

    /// Check a deployment against the host, with hardening suggestions.
    pub async fn validate_unit_config(&self, host_id: RecordId, config: &DeployConfig) -> Result<ValidationReport> {
        config.validate()?;
        let host = self.enabled_host(host_id).await?;
        let mut report = self.systemd.validate_config(&host, &config.service).await?;
        report.suggestions = suggestions(&config.service);
        Ok(report)
    }

    /// Deploy a unit and record it as `created`.
    ///
    /// A dry run renders the files and records nothing.
    pub async fn deploy_unit(&self, host_id: RecordId, config: &DeployConfig, dry_run: bool) -> Result<DeployOutcome> {
        config.validate()?;
        let host = self.host(host_id).await?;
        if let Err(e) = ensure_enabled(&host) {
            return Ok(failed_deploy(e.to_string()));
        }

        let name = config.service.base_name();
        let existing = self
            .store
            .list_units(&UnitFilter::for_host(host.id), Page::all())
            .await?;
        if existing.iter().any(|u| u.canonical_name() == name) {
            return Err(Error::Conflict(format!(
                "Unit '{}' already exists on {}",
                name, host.hostname
            )));
        }

        let mut outcome = self.systemd.create_unit(&host, config, dry_run).await?;
        if dry_run || !outcome.success {
            return Ok(outcome);
        }

        let mut unit = ManagedUnit::new(host.id, format!("{}.service", name), UnitSource::Created);
        unit.display_name = config.service.display_name.clone();
        unit.description = config.service.description.clone();
        unit.exec_start = Some(config.service.exec_start.clone());
        unit.exec_stop = config.service.exec_stop.clone();
        unit.exec_reload = config.service.exec_reload.clone();
        unit.restart_policy = Some(config.service.restart.as_str().to_string());
        unit.dependencies.after = config.service.after.clone();
        unit.dependencies.before = config.service.before.clone();
        unit.dependencies.wants = config.service.wants.clone();
        unit.dependencies.requires = config.service.requires.clone();
        unit.dependencies.conflicts = config.service.conflicts.clone();
        unit.unit_file_path = outcome.created_files.first().cloned();
        if let Some(timer) = config.requested_timer()? {
            if let Some(schedule) = timer.schedule()? {
                unit.set_timer(schedule);
            }
        }
        unit.service_config = Some(config.clone());

        match self.store.save_unit(unit).await {
            Ok(mut saved) => {
                self.refresh(&host, &mut saved).await;
            }
            Err(e) => {
                warn!(host = %host.hostname, unit = %name, error = %e, "Deployed unit could not be recorded");
                outcome
                    .warnings
                    .push(format!("Unit deployed but not recorded: {}", e));
            }
        }
        Ok(outcome)
    }

    /// Delete a unit record, optionally removing the unit from its host.
    ///
    /// The record is kept when removing the files fails.
    pub async fn remove_unit(&self, unit_id: RecordId, options: RemoveOptions) -> Result<RemoveOutcome> {
        let (unit, host) = self.unit_on_host(unit_id).await?;
        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        if options.remove_files {
            let allowed = ensure_enabled(&host)
                .and_then(|_| ensure_managed(&unit))
                .and_then(|_| ensure_owned(&unit, options.confirm_foreign));
            if let Err(e) = allowed {
                return Ok(RemoveOutcome {
                    success: false,
                    message: e.to_string(),
                    actions_performed: actions,
                    warnings,
                });
            }

            let report = self
                .systemd
                .remove_unit(&host, &unit.name, options.remove_timer || unit.is_timer)
                .await;
            if !report.success {
                return Ok(RemoveOutcome {
                    success: false,
                    message: report.message,
                    actions_performed: report.actions_performed,
                    warnings: report.warnings,
                });
            }
            actions = report.actions_performed;
            warnings = report.warnings;
        }

        self.store.delete_unit(unit.id).await?;
        actions.push(format!("delete record of {}", unit.name));
        info!(host = %host.hostname, unit = %unit.name, remove_files = options.remove_files, "Unit removed");
        Ok(RemoveOutcome {
            success: true,
            message: format!("Service {} removed successfully", unit.canonical_name()),
            actions_performed: actions,
            warnings,
        })
    }

    /// Validate, apply or record an override for a unit.
    pub async fn apply_override(
        &self,
        unit_id: RecordId,
        config: &OverrideConfig,
        options: ApplyOptions,
    ) -> Result<OverrideOutcome> {
        config.validate()?;
        let (mut unit, host) = self.unit_on_host(unit_id).await?;
        if let Err(e) = ensure_enabled(&host).and_then(|_| ensure_managed(&unit)) {
            return Ok(OverrideOutcome::failed(e.to_string()));
        }
        let preview = render_override(config);

        if options.validate_only {
            let report = self.systemd.validate_override(&host, &unit.name, config).await?;
            return Ok(OverrideOutcome {
                success: report.valid,
                message: if report.valid {
                    "Override configuration is valid".to_string()
                } else {
                    "Override configuration is invalid".to_string()
                },
                preview: Some(preview),
                warnings: report.warnings.clone(),
                validation: Some(report),
                ..OverrideOutcome::default()
            });
        }

        if !options.apply_immediately {
            unit.override_config = Some(config.clone());
            self.store.save_unit(unit).await?;
            return Ok(OverrideOutcome {
                success: true,
                message: "Override configuration recorded".to_string(),
                changes_applied: vec!["record override configuration".to_string()],
                preview: Some(preview),
                ..OverrideOutcome::default()
            });
        }

        let report = self.systemd.validate_override(&host, &unit.name, config).await?;
        if let Err(e) = report.check() {
            return Ok(OverrideOutcome {
                success: false,
                message: e.to_string(),
                preview: Some(preview),
                validation: Some(report),
                ..OverrideOutcome::default()
            });
        }

        let applied = self
            .systemd
            .apply_override(&host, &unit.name, config, options.create_backup)
            .await?;
        let mut outcome = OverrideOutcome {
            success: applied.success,
            message: applied.message,
            changes_applied: applied.actions_performed,
            override_path: Some(applied.override_path),
            backup_path: applied.backup_path,
            preview: Some(applied.content),
            warnings: report.warnings,
            validation: None,
        };
        outcome.warnings.extend(applied.warnings);
        if !outcome.success {
            return Ok(outcome);
        }

        unit.override_config = Some(config.clone());
        if let Err(e) = self.store.save_unit(unit.clone()).await {
            outcome
                .warnings
                .push(format!("Override applied but not recorded: {}", e));
        }
        if unit.is_active() {
            self.restart_after(&host, &unit, &mut outcome).await;
        }
        Ok(outcome)
    }

    async fn restart_after(&self, host: &Host, unit: &ManagedUnit, outcome: &mut OverrideOutcome) {
        let restart = self
            .systemd
            .control_unit(host, &unit.name, ControlAction::Restart)
            .await;
        if restart.success {
            outcome.changes_applied.push(format!("restart {}", unit.name));
        } else {
            warn!(host = %host.hostname, unit = %unit.name, error = %restart.message, "Restart after override change failed");
            outcome
                .warnings
                .push(format!("Failed to restart {}: {}", unit.name, restart.message));
        }
    }

    /// Revert a unit's override: delete it, or restore the newest backup.
    ///
    /// A restoring rollback consumes the backup it installs, so repeated
    /// rollbacks walk back through older drop-ins.
    pub async fn rollback_override(&self, unit_id: RecordId, options: RollbackOptions) -> Result<OverrideOutcome> {
        let (mut unit, host) = self.unit_on_host(unit_id).await?;
        if let Err(e) = ensure_enabled(&host).and_then(|_| ensure_managed(&unit)) {
            return Ok(OverrideOutcome::failed(e.to_string()));
        }

        let mut outcome = if options.remove_override {
            let report = self.systemd.remove_override(&host, &unit.name, false).await;
            OverrideOutcome {
                success: report.success,
                message: report.message,
                changes_applied: report.actions_performed,
                override_path: Some(self.systemd.override_paths(&unit.name).file),
                warnings: report.warnings,
                ..OverrideOutcome::default()
            }
        } else {
            let backups = match self.systemd.list_override_backups(&host, &unit.name).await {
                Ok(backups) => backups,
                Err(e) => return Ok(OverrideOutcome::failed(format!("Failed to list backups: {}", e))),
            };
            match backups.first() {
                Some(latest) => self.restore(&host, &unit, latest, RestoreMode::Consume).await?,
                None => return Ok(OverrideOutcome::failed("No override backup available to restore")),
            }
        };
        if !outcome.success {
            return Ok(outcome);
        }

        unit.override_config = None;
        if let Err(e) = self.store.save_unit(unit.clone()).await {
            outcome
                .warnings
                .push(format!("Rollback applied but not recorded: {}", e));
        }
        if options.restart_after {
            self.restart_after(&host, &unit, &mut outcome).await;
        }
        Ok(outcome)
    }

    async fn restore(
        &self,
        host: &Host,
        unit: &ManagedUnit,
        backup_path: &str,
        mode: RestoreMode,
    ) -> Result<OverrideOutcome> {
        let applied = self
            .systemd
            .restore_override_backup(host, &unit.name, backup_path, mode)
            .await?;
        let mut changes = applied.actions_performed;
        if applied.success {
            changes.push(format!("restore {}", backup_path));
        }
        Ok(OverrideOutcome {
            success: applied.success,
            message: applied.message,
            changes_applied: changes,
            override_path: Some(applied.override_path),
            backup_path: applied.backup_path,
            preview: Some(applied.content),
            warnings: applied.warnings,
            validation: None,
        })
    }

    /// Re-install a specific backup as the unit's override.
    pub async fn restore_override_backup(&self, unit_id: RecordId, backup_path: &str) -> Result<OverrideOutcome> {
        let (mut unit, host) = self.unit_on_host(unit_id).await?;
        if let Err(e) = ensure_enabled(&host).and_then(|_| ensure_managed(&unit)) {
            return Ok(OverrideOutcome::failed(e.to_string()));
        }
        let outcome = self.restore(&host, &unit, backup_path, RestoreMode::Keep).await?;
        if outcome.success {
            unit.override_config = None;
            if let Err(e) = self.store.save_unit(unit).await {
                warn!(error = %e, "Failed to record override restore");
            }
        }
        Ok(outcome)
    }

    /// The unit's active override as stored on the host.
    pub async fn get_override_content(&self, unit_id: RecordId) -> Result<OverrideContent> {
        let (unit, host) = self.unit_on_host(unit_id).await?;
        ensure_enabled(&host)?;
        self.systemd.get_override_content(&host, &unit.name).await
    }

    /// Backups of the unit's override, newest first.
    pub async fn list_override_backups(&self, unit_id: RecordId) -> Result<Vec<String>> {
        let (unit, host) = self.unit_on_host(unit_id).await?;
        ensure_enabled(&host)?;
        self.systemd.list_override_backups(&host, &unit.name).await
    }

    /// Unit counts by status, by host and for timers.
    pub async fn fleet_stats(&self) -> Result<FleetStats> {
        let units = self.store.list_units(&UnitFilter::default(), Page::all()).await?;
        let mut hostnames = BTreeMap::new();
        let mut stats = FleetStats {
            total: units.len(),
            ..FleetStats::default()
        };

        for unit in &units {
            match unit.status {
                UnitStatus::Active => stats.active += 1,
                UnitStatus::Inactive => stats.inactive += 1,
                UnitStatus::Failed => stats.failed += 1,
                _ => {}
            }
            if unit.is_timer {
                stats.timers += 1;
            }
            *stats.by_status.entry(unit.status.to_string()).or_insert(0) += 1;

            if !hostnames.contains_key(&unit.host_id) {
                let name = self
                    .store
                    .get_host(unit.host_id)
                    .await?
                    .map(|h| h.hostname)
                    .unwrap_or_else(|| unit.host_id.to_string());
                hostnames.insert(unit.host_id, name);
            }
            if let Some(hostname) = hostnames.get(&unit.host_id) {
                *stats.by_host.entry(hostname.clone()).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    /// Close all sessions and refuse further commands.
    pub async fn shutdown(&self) {
        self.systemd.executor().close();
        self.pool.close_all().await;
        info!("Fleet manager shut down");
    }
}

fn ensure_enabled(host: &Host) -> Result<()> {
    if host.enabled {
        Ok(())
    } else {
        Err(Error::policy(format!("Host '{}' is disabled", host.hostname)))
    }
}

fn ensure_managed(unit: &ManagedUnit) -> Result<()> {
    if unit.is_managed {
        Ok(())
    } else {
        Err(Error::policy(format!("Unit '{}' is not managed", unit.name)))
    }
}

fn ensure_owned(unit: &ManagedUnit, confirm_foreign: bool) -> Result<()> {
    if unit.source == UnitSource::Created || confirm_foreign {
        Ok(())
    } else {
        Err(Error::policy(format!(
            "Unit '{}' was not deployed by unitfleet; confirm to delete its files",
            unit.name
        )))
    }
}

fn failed_deploy(message: String) -> DeployOutcome {
    DeployOutcome {
        success: false,
        message,
        created_files: Vec::new(),
        rendered: Default::default(),
        actions_performed: Vec::new(),
        warnings: Vec::new(),
    }
}
