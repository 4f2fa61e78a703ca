//! Unit deployment, removal and pre-deployment validation.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use super::steps::{Step, StepPlan, StepPolicy, StepReport};
use super::{HostSession, RemoteSystemd};
use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::model::Host;
use crate::synth::{
    base_name, render_service_unit, render_timer_unit, DeployConfig, RestartPolicy, ServiceConfig,
};

/// Steps of deploying or removing a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStep {
    WriteFile(String),
    RemoveFile(String),
    DaemonReload,
    Enable(String),
    Start(String),
    Stop(String),
    Disable(String),
}

impl fmt::Display for UnitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStep::WriteFile(path) => write!(f, "write {}", path),
            UnitStep::RemoveFile(path) => write!(f, "remove {}", path),
            UnitStep::DaemonReload => write!(f, "reload systemd daemon"),
            UnitStep::Enable(unit) => write!(f, "enable {}", unit),
            UnitStep::Start(unit) => write!(f, "start {}", unit),
            UnitStep::Stop(unit) => write!(f, "stop {}", unit),
            UnitStep::Disable(unit) => write!(f, "disable {}", unit),
        }
    }
}

impl Step for UnitStep {
    fn policy(&self) -> StepPolicy {
        match self {
            UnitStep::WriteFile(_) | UnitStep::RemoveFile(_) => StepPolicy::Fatal,
            _ => StepPolicy::Advisory,
        }
    }
}

/// Result of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub success: bool,
    pub message: String,
    /// Paths written on the host; empty for dry runs and failures
    pub created_files: Vec<String>,
    /// Rendered text by file name
    pub rendered: IndexMap<String, String>,
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

/// Result of checking a configuration against a live host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    pub(crate) fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            suggestions: Vec::new(),
        }
    }

    pub(crate) fn failed(message: String) -> Self {
        Self::from_findings(vec![format!("Validation failed: {}", message)], Vec::new())
    }

    /// `Err(Error::Validation)` when the report has blocking errors.
    pub fn check(&self) -> Result<()> {
        if self.valid {
            return Ok(());
        }
        Err(Error::Validation {
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        })
    }
}

/// The program an `Exec*=` line runs, without systemd's `-@:+!` prefixes.
pub fn executable(command: &str) -> Option<String> {
    let words = shell_words::split(command).ok()?;
    let first = words.into_iter().next()?;
    let program = first.trim_start_matches(['-', '@', ':', '+', '!']);
    (!program.is_empty()).then(|| program.to_string())
}

/// Advisory hardening and robustness hints for a service.
pub fn suggestions(config: &ServiceConfig) -> Vec<String> {
    let mut hints = Vec::new();
    if config.description.is_none() {
        hints.push("Add a description so the unit is easy to identify".to_string());
    }
    if config.user.is_none() {
        hints.push("Run the service as a dedicated non-root user".to_string());
    }
    if config.restart == RestartPolicy::No {
        hints.push("Restart policy 'no' will not recover from crashes; consider 'on-failure'".to_string());
    }
    if config.no_new_privileges.is_none() {
        hints.push("Set NoNewPrivileges=yes unless the service needs to gain privileges".to_string());
    }
    if config.private_tmp.is_none() {
        hints.push("Set PrivateTmp=yes to isolate temporary files".to_string());
    }
    if executable(&config.exec_start).is_some_and(|p| !p.starts_with('/')) {
        hints.push("Use an absolute path in ExecStart".to_string());
    }
    hints
}

impl RemoteSystemd {
    fn list_unit_files(&self, unit: &str) -> ShellCommand {
        ShellCommand::new("systemctl").arg("list-unit-files").arg(unit)
    }

    /// True when systemd knows a unit file by this name.
    pub(crate) async fn unit_file_exists(&self, session: &HostSession, unit: &str) -> Result<bool> {
        let result = session.run(&self.list_unit_files(unit)).await?;
        Ok(result.exit_ok && result.stdout.contains(base_name(unit)))
    }

    /// Render and install a service (and optional timer).
    ///
    /// The timer file is written after the service file; if that fails the
    /// service file is deleted again. Reload, enable and start failures are
    /// warnings once the files are in place.
    pub async fn create_unit(&self, host: &Host, config: &DeployConfig, dry_run: bool) -> Result<DeployOutcome> {
        config.validate()?;
        let name = config.service.base_name().to_string();

        let mut rendered = IndexMap::new();
        rendered.insert(format!("{}.service", name), render_service_unit(&config.service));
        if let Some(timer) = config.requested_timer()? {
            rendered.insert(format!("{}.timer", name), render_timer_unit(&name, timer)?);
        }
        let has_timer = rendered.len() > 1;

        if dry_run {
            return Ok(DeployOutcome {
                success: true,
                message: "Dry run completed successfully".to_string(),
                created_files: Vec::new(),
                rendered,
                actions_performed: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => {
                return Ok(DeployOutcome {
                    success: false,
                    message: format!("Failed to create systemd service: {}", e),
                    created_files: Vec::new(),
                    rendered,
                    actions_performed: Vec::new(),
                    warnings: Vec::new(),
                })
            }
        };

        let escalation = self.settings.escalation;
        let mut plan = StepPlan::new(&session);
        let mut created_files = Vec::new();
        for (file_name, content) in &rendered {
            let path = self.unit_path(file_name);
            let write = ShellCommand::write_file(escalation, &path, content);
            if plan.run(UnitStep::WriteFile(path.clone()), &write).await.is_none() {
                break;
            }
            plan.compensate(
                format!("remove {}", path),
                self.privileged("rm").arg("-f").arg(path.as_str()),
            );
            created_files.push(path);
        }

        if !plan.failed() {
            plan.run(UnitStep::DaemonReload, &self.systemctl().arg("daemon-reload"))
                .await;

            let target = if has_timer {
                format!("{}.timer", name)
            } else {
                format!("{}.service", name)
            };
            if config.auto_enable {
                let cmd = self.systemctl().arg("enable").arg(target.as_str());
                plan.run(UnitStep::Enable(target.clone()), &cmd).await;
            }
            if config.auto_start {
                let cmd = self.systemctl().arg("start").arg(target.as_str());
                plan.run(UnitStep::Start(target.clone()), &cmd).await;
            }
        }

        let report = plan.finish(format!("Service {} created successfully", name));
        if report.success {
            info!(host = %host.hostname, unit = %name, files = ?created_files, has_timer, "Systemd service created");
        } else {
            created_files.clear();
        }
        Ok(DeployOutcome {
            success: report.success,
            message: report.message,
            created_files,
            rendered,
            actions_performed: report.actions_performed,
            warnings: report.warnings,
        })
    }

    /// Stop, disable and delete a unit (and optionally its timer).
    ///
    /// Stop and disable are best effort; the file deletions must succeed.
    pub async fn remove_unit(&self, host: &Host, name: &str, remove_timer: bool) -> StepReport {
        let name = base_name(name);
        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => {
                return StepReport {
                    success: false,
                    message: format!("Failed to remove systemd service: {}", e),
                    ..StepReport::default()
                }
            }
        };

        let service = format!("{}.service", name);
        let timer = format!("{}.timer", name);
        let mut plan = StepPlan::new(&session);

        let mut units = vec![service.clone()];
        if remove_timer {
            units.push(timer.clone());
        }
        for unit in &units {
            plan.run(UnitStep::Stop(unit.clone()), &self.systemctl().arg("stop").arg(unit.as_str()))
                .await;
            plan.run(
                UnitStep::Disable(unit.clone()),
                &self.systemctl().arg("disable").arg(unit.as_str()),
            )
            .await;
        }
        for unit in &units {
            let path = self.unit_path(unit);
            let cmd = self.privileged("rm").arg("-f").arg(path.as_str());
            plan.run(UnitStep::RemoveFile(path), &cmd).await;
        }
        plan.run(UnitStep::DaemonReload, &self.systemctl().arg("daemon-reload"))
            .await;

        let report = plan.finish(format!("Service {} removed successfully", name));
        if report.success {
            info!(host = %host.hostname, unit = %name, remove_timer, "Systemd service removed");
        }
        report
    }

    /// Check a service configuration against the host.
    ///
    /// Name collisions, missing executables, users and groups are errors.
    /// A missing working directory or dependency unit is a warning.
    pub async fn validate_config(&self, host: &Host, config: &ServiceConfig) -> Result<ValidationReport> {
        config.validate()?;
        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => return Ok(ValidationReport::failed(e.to_string())),
        };
        match self.check_service_config(&session, config).await {
            Ok(report) => Ok(report),
            Err(e) => Ok(ValidationReport::failed(e.to_string())),
        }
    }

    async fn check_service_config(&self, session: &HostSession, config: &ServiceConfig) -> Result<ValidationReport> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let name = config.base_name();

        if self.unit_file_exists(session, &format!("{}.service", name)).await? {
            errors.push(format!("Service {} already exists", name));
        }

        if let Some(program) = executable(&config.exec_start) {
            let found = ShellCommand::new("which")
                .arg(program.as_str())
                .quiet()
                .no_stderr()
                .or_else(ShellCommand::new("test").arg("-x").arg(program.as_str()));
            if !session.check(&found).await? {
                errors.push(format!("Command not found or not executable: {}", program));
            }
        }

        if let Some(dir) = &config.working_directory {
            if !session.check(&ShellCommand::new("test").arg("-d").arg(dir.as_str())).await? {
                warnings.push(format!("Working directory does not exist: {}", dir));
            }
        }

        if let Some(user) = &config.user {
            if !session.check(&ShellCommand::new("id").arg(user.as_str())).await? {
                errors.push(format!("User does not exist: {}", user));
            }
        }

        if let Some(group) = &config.group {
            let cmd = ShellCommand::new("getent").arg("group").arg(group.as_str());
            if !session.check(&cmd).await? {
                errors.push(format!("Group does not exist: {}", group));
            }
        }

        for dependency in config.dependencies() {
            if !self.unit_file_exists(session, dependency).await? {
                warnings.push(format!("Dependency unit not found: {}", dependency));
            }
        }

        Ok(ValidationReport::from_findings(errors, warnings))
    }
}
