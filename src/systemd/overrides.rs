//! Override drop-ins: apply, remove, validate, read back and restore.
//!
//! The active drop-in of `<unit>.service` is
//! `<unit_dir>/<unit>.service.d/override.conf`. New content is written to a
//! temporary file next to it and renamed into place, so a failed write never
//! touches the live file.

use std::fmt;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::deploy::{executable, ValidationReport};
use super::steps::{Step, StepPlan, StepPolicy, StepReport};
use super::{HostSession, RemoteSystemd};
use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::model::Host;
use crate::synth::{base_name, render_override, service_unit_name, OverrideConfig};

const OVERRIDE_FILE: &str = "override.conf";
const BACKUP_SUFFIX: &str = ".backup_";
const TEMP_SUFFIX: &str = ".tmp_";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

#[derive(Debug, Clone, PartialEq, Eq)]
enum OverrideStep {
    Backup(String),
    CreateDir(String),
    WriteTemp(String),
    Install(String),
    Chmod(String),
    DaemonReload,
    RemoveFile(String),
    RemoveBackups,
    RemoveDir(String),
    ConsumeBackup(String),
}

impl fmt::Display for OverrideStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideStep::Backup(path) => write!(f, "back up override to {}", path),
            OverrideStep::CreateDir(dir) => write!(f, "create override directory {}", dir),
            OverrideStep::WriteTemp(path) => write!(f, "write temporary file {}", path),
            OverrideStep::Install(path) => write!(f, "install override {}", path),
            OverrideStep::Chmod(path) => write!(f, "set permissions on {}", path),
            OverrideStep::DaemonReload => write!(f, "reload systemd daemon"),
            OverrideStep::RemoveFile(path) => write!(f, "remove override {}", path),
            OverrideStep::RemoveBackups => write!(f, "remove override backups"),
            OverrideStep::RemoveDir(dir) => write!(f, "remove override directory {}", dir),
            OverrideStep::ConsumeBackup(path) => write!(f, "remove restored backup {}", path),
        }
    }
}

impl Step for OverrideStep {
    fn policy(&self) -> StepPolicy {
        match self {
            OverrideStep::Chmod(_)
            | OverrideStep::RemoveBackups
            | OverrideStep::RemoveDir(_)
            | OverrideStep::ConsumeBackup(_) => StepPolicy::Advisory,
            _ => StepPolicy::Fatal,
        }
    }
}

/// Result of installing a drop-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideApplied {
    pub success: bool,
    pub message: String,
    pub override_path: String,
    /// Copy of the previous drop-in, when one existed and a backup was asked for
    pub backup_path: Option<String>,
    /// The drop-in text that was (or would have been) installed
    pub content: String,
    pub actions_performed: Vec<String>,
    pub warnings: Vec<String>,
}

/// The active drop-in as read from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideContent {
    pub exists: bool,
    pub content: Option<String>,
    pub path: String,
}

/// What happens to the drop-in being replaced by a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Back up the current drop-in and keep the restored backup.
    Keep,
    /// Step back through history: the current drop-in is discarded and the
    /// restored backup is deleted once installed.
    Consume,
}

/// Remote locations of one unit's drop-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverridePaths {
    pub unit: String,
    pub dir: String,
    pub file: String,
}

impl OverridePaths {
    /// True when `path` names a backup of this drop-in.
    pub fn is_backup(&self, path: &str) -> bool {
        path.strip_prefix(self.file.as_str())
            .and_then(|rest| rest.strip_prefix(BACKUP_SUFFIX))
            .is_some_and(|stamp| !stamp.is_empty() && !stamp.contains('/'))
    }
}

impl RemoteSystemd {
    pub fn override_paths(&self, unit: &str) -> OverridePaths {
        let unit = base_name(unit).to_string();
        let dir = self.unit_path(&format!("{}.service.d", unit));
        let file = format!("{}/{}", dir, OVERRIDE_FILE);
        OverridePaths { unit, dir, file }
    }

    /// Render and install an override.
    ///
    /// With `backup`, an existing drop-in is copied to
    /// `override.conf.backup_<timestamp>` first. An existing backup is never
    /// overwritten.
    pub async fn apply_override(
        &self,
        host: &Host,
        unit: &str,
        config: &OverrideConfig,
        backup: bool,
    ) -> Result<OverrideApplied> {
        config.validate()?;
        let paths = self.override_paths(unit);
        let content = render_override(config);
        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => return Ok(failed_apply(&paths, content, format!("Failed to apply override: {}", e))),
        };
        Ok(self.install_override(&session, &paths, content, backup).await)
    }

    async fn install_override(
        &self,
        session: &HostSession,
        paths: &OverridePaths,
        content: String,
        backup: bool,
    ) -> OverrideApplied {
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        let mut plan = StepPlan::new(session);

        let mut backup_path = None;
        if backup {
            let backed_up = match session.check(&ShellCommand::new("test").arg("-f").arg(paths.file.as_str())).await {
                Ok(true) => self
                    .free_path(session, &format!("{}{}{}", paths.file, BACKUP_SUFFIX, stamp))
                    .await
                    .map(Some),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            };
            match backed_up {
                Ok(Some(path)) => {
                    let copy = self
                        .privileged("cp")
                        .arg(paths.file.as_str())
                        .arg(path.as_str());
                    if plan.run(OverrideStep::Backup(path.clone()), &copy).await.is_some() {
                        backup_path = Some(path);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    return failed_apply(paths, content, format!("Failed to check existing override: {}", e))
                }
            }
        }

        let mkdir = self.privileged("mkdir").arg("-p").arg(paths.dir.as_str());
        plan.run(OverrideStep::CreateDir(paths.dir.clone()), &mkdir).await;

        let temp = format!("{}{}{}", paths.file, TEMP_SUFFIX, stamp);
        let write = ShellCommand::write_file(self.settings.escalation, &temp, &content);
        if plan.run(OverrideStep::WriteTemp(temp.clone()), &write).await.is_some() {
            plan.compensate(
                format!("remove {}", temp),
                self.privileged("rm").arg("-f").arg(temp.as_str()),
            );
        }

        // Same directory, so the rename is atomic
        let install = self
            .privileged("mv")
            .arg("-f")
            .arg(temp.as_str())
            .arg(paths.file.as_str());
        plan.run(OverrideStep::Install(paths.file.clone()), &install).await;

        let chmod = self.privileged("chmod").arg("644").arg(paths.file.as_str());
        plan.run(OverrideStep::Chmod(paths.file.clone()), &chmod).await;
        plan.run(OverrideStep::DaemonReload, &self.systemctl().arg("daemon-reload"))
            .await;

        let report = plan.finish("Override configuration applied successfully");
        if report.success {
            info!(
                host = %session.host(),
                unit = %paths.unit,
                path = %paths.file,
                backup = ?backup_path,
                "Override applied"
            );
        }
        OverrideApplied {
            success: report.success,
            message: report.message,
            override_path: paths.file.clone(),
            backup_path,
            content,
            actions_performed: report.actions_performed,
            warnings: report.warnings,
        }
    }

    /// `path`, or `path_<n>` for the first `n` not already taken.
    async fn free_path(&self, session: &HostSession, path: &str) -> Result<String> {
        let mut candidate = path.to_string();
        let mut n = 1;
        while session.check(&ShellCommand::new("test").arg("-e").arg(candidate.as_str())).await? {
            candidate = format!("{}_{}", path, n);
            n += 1;
        }
        Ok(candidate)
    }

    /// Delete the active drop-in, optionally with its backups.
    pub async fn remove_override(&self, host: &Host, unit: &str, remove_backups: bool) -> StepReport {
        let paths = self.override_paths(unit);
        let outcome = async {
            let session = self.connect(host).await?;
            let exists = session
                .check(&ShellCommand::new("test").arg("-f").arg(paths.file.as_str()))
                .await?;
            Ok::<_, Error>((session, exists))
        }
        .await;

        let session = match outcome {
            Ok((_, false)) => {
                return StepReport {
                    success: true,
                    message: "No override configuration found to remove".to_string(),
                    ..StepReport::default()
                }
            }
            Ok((session, true)) => session,
            Err(e) => {
                return StepReport {
                    success: false,
                    message: format!("Failed to remove override: {}", e),
                    ..StepReport::default()
                }
            }
        };

        let mut plan = StepPlan::new(&session);
        let rm = self.privileged("rm").arg("-f").arg(paths.file.as_str());
        plan.run(OverrideStep::RemoveFile(paths.file.clone()), &rm).await;
        if remove_backups {
            let rm = self
                .privileged("rm")
                .arg("-f")
                .glob(paths.file.as_str(), ".backup_*");
            plan.run(OverrideStep::RemoveBackups, &rm).await;
        }
        let rmdir = self
            .privileged("rmdir")
            .arg("--ignore-fail-on-non-empty")
            .arg(paths.dir.as_str());
        plan.run(OverrideStep::RemoveDir(paths.dir.clone()), &rmdir).await;
        plan.run(OverrideStep::DaemonReload, &self.systemctl().arg("daemon-reload"))
            .await;

        let report = plan.finish("Override configuration removed successfully");
        if report.success {
            info!(host = %host.hostname, unit = %paths.unit, remove_backups, "Override removed");
        }
        report
    }

    /// Check an override against the host.
    ///
    /// The unit must exist; nothing else is checked when it does not.
    pub async fn validate_override(
        &self,
        host: &Host,
        unit: &str,
        config: &OverrideConfig,
    ) -> Result<ValidationReport> {
        config.validate()?;
        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => return Ok(ValidationReport::failed(e.to_string())),
        };
        match self.check_override(&session, unit, config).await {
            Ok(report) => Ok(report),
            Err(e) => Ok(ValidationReport::failed(e.to_string())),
        }
    }

    async fn check_override(
        &self,
        session: &HostSession,
        unit: &str,
        config: &OverrideConfig,
    ) -> Result<ValidationReport> {
        let unit = base_name(unit);
        if !self.unit_file_exists(session, &service_unit_name(unit)).await? {
            return Ok(ValidationReport::from_findings(
                vec![format!("Service {} does not exist on the server", unit)],
                Vec::new(),
            ));
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(user) = &config.user {
            if !session.check(&ShellCommand::new("id").arg("-u").arg(user.as_str())).await? {
                errors.push(format!("User does not exist: {}", user));
            }
        }
        if let Some(group) = &config.group {
            let cmd = ShellCommand::new("getent").arg("group").arg(group.as_str());
            if !session.check(&cmd).await? {
                errors.push(format!("Group does not exist: {}", group));
            }
        }

        if let Some(dir) = &config.working_directory {
            if !session.check(&ShellCommand::new("test").arg("-d").arg(dir.as_str())).await? {
                warnings.push(format!("Working directory does not exist: {}", dir));
            }
        }

        let commands = [
            &config.exec_start,
            &config.exec_stop,
            &config.exec_reload,
            &config.exec_start_pre,
            &config.exec_start_post,
        ];
        for program in commands
            .into_iter()
            .flatten()
            .filter_map(|c| executable(c))
            .filter(|p| p.starts_with('/'))
        {
            if !session.check(&ShellCommand::new("test").arg("-x").arg(program.as_str())).await? {
                warnings.push(format!("Executable not found: {}", program));
            }
        }

        for path in config.referenced_paths() {
            let path = path.trim_start_matches('-');
            if !session.check(&ShellCommand::new("test").arg("-e").arg(path)).await? {
                warnings.push(format!("Path does not exist: {}", path));
            }
        }

        if let Some(file) = &config.environment_file {
            let file = file.trim_start_matches('-');
            if !session.check(&ShellCommand::new("test").arg("-f").arg(file)).await? {
                warnings.push(format!("Environment file not found: {}", file));
            }
        }

        for dependency in config.dependencies() {
            if !self.unit_file_exists(session, dependency).await? {
                warnings.push(format!("Dependency unit not found: {}", dependency));
            }
        }

        Ok(ValidationReport::from_findings(errors, warnings))
    }

    /// Read the active drop-in.
    pub async fn get_override_content(&self, host: &Host, unit: &str) -> Result<OverrideContent> {
        let paths = self.override_paths(unit);
        let session = self.connect(host).await?;
        let result = session
            .run(&self.privileged("cat").arg(paths.file.as_str()).no_stderr())
            .await?;
        Ok(OverrideContent {
            exists: result.exit_ok,
            content: result.exit_ok.then_some(result.stdout),
            path: paths.file,
        })
    }

    /// Backups of the drop-in, newest first.
    pub async fn list_override_backups(&self, host: &Host, unit: &str) -> Result<Vec<String>> {
        let paths = self.override_paths(unit);
        let session = self.connect(host).await?;
        let listing = ShellCommand::new("ls")
            .arg("-1t")
            .glob(paths.file.as_str(), ".backup_*")
            .no_stderr();
        let result = session.run(&listing).await?;
        if !result.exit_ok {
            return Ok(Vec::new());
        }
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| paths.is_backup(line))
            .map(String::from)
            .collect())
    }

    /// Re-install a previous drop-in from one of its backups.
    ///
    /// With [`RestoreMode::Keep`] the drop-in being replaced is backed up
    /// first. With [`RestoreMode::Consume`] it is dropped and the backup is
    /// deleted after a successful install.
    pub async fn restore_override_backup(
        &self,
        host: &Host,
        unit: &str,
        backup_path: &str,
        mode: RestoreMode,
    ) -> Result<OverrideApplied> {
        let paths = self.override_paths(unit);
        if !paths.is_backup(backup_path) {
            return Err(Error::configuration(format!(
                "'{}' is not a backup of {}",
                backup_path, paths.file
            )));
        }

        let session = match self.connect(host).await {
            Ok(session) => session,
            Err(e) => {
                return Ok(failed_apply(&paths, String::new(), format!("Failed to restore override: {}", e)))
            }
        };
        let content = match session
            .run(&self.privileged("cat").arg(backup_path).no_stderr())
            .await
        {
            Ok(result) if result.exit_ok => result.stdout,
            Ok(_) => {
                return Ok(failed_apply(
                    &paths,
                    String::new(),
                    format!("Backup file not found: {}", backup_path),
                ))
            }
            Err(e) => {
                return Ok(failed_apply(&paths, String::new(), format!("Failed to restore override: {}", e)))
            }
        };

        let mut applied = self
            .install_override(&session, &paths, content, mode == RestoreMode::Keep)
            .await;
        if applied.success && mode == RestoreMode::Consume {
            let mut plan = StepPlan::new(&session);
            let rm = self.privileged("rm").arg("-f").arg(backup_path);
            plan.run(OverrideStep::ConsumeBackup(backup_path.to_string()), &rm).await;
            let report = plan.finish("");
            applied.actions_performed.extend(report.actions_performed);
            applied.warnings.extend(report.warnings);
        }
        Ok(applied)
    }
}

fn failed_apply(paths: &OverridePaths, content: String, message: String) -> OverrideApplied {
    OverrideApplied {
        success: false,
        message,
        override_path: paths.file.clone(),
        backup_path: None,
        content,
        actions_performed: Vec::new(),
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> OverridePaths {
        OverridePaths {
            unit: "app".into(),
            dir: "/etc/systemd/system/app.service.d".into(),
            file: "/etc/systemd/system/app.service.d/override.conf".into(),
        }
    }

    #[test]
    fn test_backup_path_recognition() {
        let paths = paths();
        assert!(paths.is_backup("/etc/systemd/system/app.service.d/override.conf.backup_20240101_120000"));
        assert!(paths.is_backup("/etc/systemd/system/app.service.d/override.conf.backup_20240101_120000_042137"));
        assert!(paths.is_backup("/etc/systemd/system/app.service.d/override.conf.backup_20240101_120000_042137_1"));
        assert!(!paths.is_backup("/etc/systemd/system/app.service.d/override.conf.tmp_20240101_120000_042137"));
        assert!(!paths.is_backup("/etc/systemd/system/app.service.d/override.conf"));
        assert!(!paths.is_backup("/etc/systemd/system/app.service.d/override.conf.backup_"));
        assert!(!paths.is_backup("/etc/systemd/system/app.service.d/override.conf.backup_x/../../passwd"));
        assert!(!paths.is_backup("/etc/shadow"));
    }

    #[test]
    fn test_step_policies() {
        assert_eq!(OverrideStep::Backup("/b".into()).policy(), StepPolicy::Fatal);
        assert_eq!(OverrideStep::DaemonReload.policy(), StepPolicy::Fatal);
        assert_eq!(OverrideStep::Chmod("/f".into()).policy(), StepPolicy::Advisory);
        assert_eq!(OverrideStep::RemoveBackups.policy(), StepPolicy::Advisory);
        assert_eq!(OverrideStep::ConsumeBackup("/b".into()).policy(), StepPolicy::Advisory);
        assert_eq!(OverrideStep::WriteTemp("/t".into()).policy(), StepPolicy::Fatal);
        assert_eq!(
            OverrideStep::Install("/f".into()).to_string(),
            "install override /f"
        );
    }
}
