//! Override drop-in rendering.
//!
//! An [`OverrideConfig`] holds only the directives to change. Rendered, it
//! becomes `<unit>.service.d/override.conf`.
//!
//! In a drop-in an `Exec*=` assignment appends to the commands of the base
//! unit, so every overridden `Exec*=` directive is preceded by an empty
//! assignment that clears the inherited value first. An empty dependency
//! list renders as that empty assignment alone.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{
    check_environment, check_value, check_values, render_sections, validate_unit_name,
    RestartPolicy, Section, ServiceType,
};
use crate::error::{Error, Result};

/// Sparse set of directive overrides for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    // [Unit]
    pub description: Option<String>,
    pub after: Option<Vec<String>>,
    pub before: Option<Vec<String>>,
    pub wants: Option<Vec<String>>,
    pub requires: Option<Vec<String>>,
    pub conflicts: Option<Vec<String>>,

    // [Service]
    pub service_type: Option<ServiceType>,
    pub exec_start: Option<String>,
    pub exec_stop: Option<String>,
    pub exec_reload: Option<String>,
    pub exec_start_pre: Option<String>,
    pub exec_start_post: Option<String>,
    pub restart: Option<RestartPolicy>,
    pub restart_sec: Option<u64>,
    pub timeout_start_sec: Option<u64>,
    pub timeout_stop_sec: Option<u64>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub working_directory: Option<String>,
    pub umask: Option<String>,
    pub environment_file: Option<String>,
    pub no_new_privileges: Option<bool>,
    pub private_tmp: Option<bool>,
    pub protect_system: Option<String>,
    pub protect_home: Option<bool>,
    pub standard_output: Option<String>,
    pub standard_error: Option<String>,
    pub syslog_identifier: Option<String>,
    pub environment: IndexMap<String, String>,
    pub read_only_paths: Vec<String>,
    pub inaccessible_paths: Vec<String>,

    // [Install]
    pub wanted_by: Option<Vec<String>>,
    pub required_by: Option<Vec<String>>,
    pub also: Option<Vec<String>>,
}

impl OverrideConfig {
    fn unit_lists(&self) -> [(&'static str, Option<&Vec<String>>); 8] {
        [
            ("After", self.after.as_ref()),
            ("Before", self.before.as_ref()),
            ("Wants", self.wants.as_ref()),
            ("Requires", self.requires.as_ref()),
            ("Conflicts", self.conflicts.as_ref()),
            ("WantedBy", self.wanted_by.as_ref()),
            ("RequiredBy", self.required_by.as_ref()),
            ("Also", self.also.as_ref()),
        ]
    }

    fn exec_commands(&self) -> [(&'static str, Option<&String>); 5] {
        [
            ("ExecStart", self.exec_start.as_ref()),
            ("ExecStop", self.exec_stop.as_ref()),
            ("ExecReload", self.exec_reload.as_ref()),
            ("ExecStartPre", self.exec_start_pre.as_ref()),
            ("ExecStartPost", self.exec_start_post.as_ref()),
        ]
    }

    fn text_fields(&self) -> [(&'static str, Option<&String>); 10] {
        [
            ("Description", self.description.as_ref()),
            ("User", self.user.as_ref()),
            ("Group", self.group.as_ref()),
            ("WorkingDirectory", self.working_directory.as_ref()),
            ("UMask", self.umask.as_ref()),
            ("EnvironmentFile", self.environment_file.as_ref()),
            ("ProtectSystem", self.protect_system.as_ref()),
            ("StandardOutput", self.standard_output.as_ref()),
            ("StandardError", self.standard_error.as_ref()),
            ("SyslogIdentifier", self.syslog_identifier.as_ref()),
        ]
    }

    /// True when no directive would be rendered.
    pub fn is_empty(&self) -> bool {
        self.unit_lists().iter().all(|(_, v)| v.is_none())
            && self.exec_commands().iter().all(|(_, v)| v.is_none())
            && self.text_fields().iter().all(|(_, v)| v.is_none())
            && self.service_type.is_none()
            && self.restart.is_none()
            && self.restart_sec.is_none()
            && self.timeout_start_sec.is_none()
            && self.timeout_stop_sec.is_none()
            && self.no_new_privileges.is_none()
            && self.private_tmp.is_none()
            && self.protect_home.is_none()
            && self.environment.is_empty()
            && self.read_only_paths.is_empty()
            && self.inaccessible_paths.is_empty()
    }

    /// Reject empty overrides and values that would corrupt the drop-in.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::configuration("Override contains no directives"));
        }
        for (key, values) in self.unit_lists() {
            for unit in values.into_iter().flatten() {
                validate_unit_name(unit).map_err(|_| {
                    Error::configuration(format!("Invalid unit '{}' in {}", unit, key))
                })?;
            }
        }
        for (key, value) in self.exec_commands().into_iter().chain(self.text_fields()) {
            if let Some(value) = value {
                check_value(key, value)?;
            }
        }
        check_values("ReadOnlyPaths", &self.read_only_paths)?;
        check_values("InaccessiblePaths", &self.inaccessible_paths)?;
        check_environment(&self.environment)
    }

    /// Paths the override refers to on the host, for existence checks.
    pub fn referenced_paths(&self) -> impl Iterator<Item = &String> {
        self.read_only_paths.iter().chain(&self.inaccessible_paths)
    }

    /// Dependency units named by the override.
    pub fn dependencies(&self) -> impl Iterator<Item = &String> {
        [&self.after, &self.before, &self.wants, &self.requires]
            .into_iter()
            .flatten()
            .flatten()
    }
}

/// Render drop-in text for an override.
pub fn render_override(config: &OverrideConfig) -> String {
    let mut unit = Section::new("Unit");
    unit.opt("Description", config.description.as_ref());
    for (key, values) in &config.unit_lists()[..5] {
        unit_list(&mut unit, key, *values);
    }

    let mut service = Section::new("Service");
    service.opt("Type", config.service_type.map(ServiceType::as_str));
    for (key, command) in config.exec_commands() {
        if let Some(command) = command {
            service.reset(key);
            service.set(key, command);
        }
    }
    service.opt("Restart", config.restart.map(RestartPolicy::as_str));
    service.opt("RestartSec", config.restart_sec.map(|s| s.to_string()));
    service.opt("TimeoutStartSec", config.timeout_start_sec.map(|s| s.to_string()));
    service.opt("TimeoutStopSec", config.timeout_stop_sec.map(|s| s.to_string()));
    service.opt("User", config.user.as_ref());
    service.opt("Group", config.group.as_ref());
    service.opt("WorkingDirectory", config.working_directory.as_ref());
    service.opt("UMask", config.umask.as_ref());
    service.opt("EnvironmentFile", config.environment_file.as_ref());
    service.flag("NoNewPrivileges", config.no_new_privileges);
    service.flag("PrivateTmp", config.private_tmp);
    service.opt("ProtectSystem", config.protect_system.as_ref());
    service.flag("ProtectHome", config.protect_home);
    service.opt("StandardOutput", config.standard_output.as_ref());
    service.opt("StandardError", config.standard_error.as_ref());
    service.opt("SyslogIdentifier", config.syslog_identifier.as_ref());
    service.environment(&config.environment);
    service.repeated("ReadOnlyPaths", &config.read_only_paths);
    service.repeated("InaccessiblePaths", &config.inaccessible_paths);

    let mut install = Section::new("Install");
    for (key, values) in &config.unit_lists()[5..] {
        unit_list(&mut install, key, *values);
    }

    render_sections(&[unit, service, install])
}

fn unit_list(section: &mut Section, key: &str, values: Option<&Vec<String>>) {
    match values {
        Some(values) if values.is_empty() => section.reset(key),
        Some(values) => section.joined(key, values),
        None => {}
    }
}
