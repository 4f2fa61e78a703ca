//! Service unit configuration and rendering.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{
    base_name, check_environment, check_value, check_values, render_sections,
    validate_unit_name, Section, TimerConfig,
};
use crate::error::{Error, Result};

/// Systemd service `Type=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Simple,
    Exec,
    Forking,
    Oneshot,
    Dbus,
    Notify,
    Idle,
}

impl ServiceType {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Simple => "simple",
            ServiceType::Exec => "exec",
            ServiceType::Forking => "forking",
            ServiceType::Oneshot => "oneshot",
            ServiceType::Dbus => "dbus",
            ServiceType::Notify => "notify",
            ServiceType::Idle => "idle",
        }
    }
}

/// Systemd service `Restart=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnSuccess,
    #[default]
    OnFailure,
    OnAbnormal,
    OnAbort,
    OnWatchdog,
}

impl RestartPolicy {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnSuccess => "on-success",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::OnAbnormal => "on-abnormal",
            RestartPolicy::OnAbort => "on-abort",
            RestartPolicy::OnWatchdog => "on-watchdog",
        }
    }
}

fn journal() -> String {
    "journal".to_string()
}

/// Full description of a service unit to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unit name, with or without `.service`
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,

    // [Unit]
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub wants: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,

    // [Service]
    #[serde(default)]
    pub service_type: ServiceType,
    pub exec_start: String,
    #[serde(default)]
    pub exec_start_pre: Option<String>,
    #[serde(default)]
    pub exec_start_post: Option<String>,
    #[serde(default)]
    pub exec_stop: Option<String>,
    #[serde(default)]
    pub exec_reload: Option<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default)]
    pub restart_sec: Option<u64>,
    #[serde(default)]
    pub timeout_start_sec: Option<u64>,
    #[serde(default)]
    pub timeout_stop_sec: Option<u64>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub umask: Option<String>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
    #[serde(default)]
    pub environment_file: Option<String>,
    #[serde(default)]
    pub no_new_privileges: Option<bool>,
    #[serde(default)]
    pub private_tmp: Option<bool>,
    #[serde(default)]
    pub protect_system: Option<String>,
    #[serde(default)]
    pub protect_home: Option<bool>,
    #[serde(default)]
    pub read_only_paths: Vec<String>,
    #[serde(default)]
    pub inaccessible_paths: Vec<String>,
    #[serde(default = "journal")]
    pub standard_output: String,
    #[serde(default = "journal")]
    pub standard_error: String,
    #[serde(default)]
    pub syslog_identifier: Option<String>,

    // [Install]
    #[serde(default)]
    pub wanted_by: Vec<String>,
    #[serde(default)]
    pub required_by: Vec<String>,
    #[serde(default)]
    pub also: Vec<String>,
}

impl ServiceConfig {
    /// A minimal service running `exec_start`.
    pub fn new(name: impl Into<String>, exec_start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            after: Vec::new(),
            before: Vec::new(),
            wants: Vec::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            service_type: ServiceType::default(),
            exec_start: exec_start.into(),
            exec_start_pre: None,
            exec_start_post: None,
            exec_stop: None,
            exec_reload: None,
            restart: RestartPolicy::default(),
            restart_sec: None,
            timeout_start_sec: None,
            timeout_stop_sec: None,
            user: None,
            group: None,
            working_directory: None,
            umask: None,
            environment: IndexMap::new(),
            environment_file: None,
            no_new_privileges: None,
            private_tmp: None,
            protect_system: None,
            protect_home: None,
            read_only_paths: Vec::new(),
            inaccessible_paths: Vec::new(),
            standard_output: journal(),
            standard_error: journal(),
            syslog_identifier: None,
            wanted_by: Vec::new(),
            required_by: Vec::new(),
            also: Vec::new(),
        }
    }

    /// Unit name without the `.service` suffix.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    /// Every declared dependency unit, in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.after
            .iter()
            .chain(&self.before)
            .chain(&self.wants)
            .chain(&self.requires)
    }

    /// Check the configuration for contradictions and unsafe values.
    pub fn validate(&self) -> Result<()> {
        validate_unit_name(&self.name)?;
        if self.exec_start.trim().is_empty() {
            return Err(Error::configuration("exec_start must not be empty"));
        }

        let scalars = [
            ("description", self.description.as_deref()),
            ("exec_start", Some(self.exec_start.as_str())),
            ("exec_start_pre", self.exec_start_pre.as_deref()),
            ("exec_start_post", self.exec_start_post.as_deref()),
            ("exec_stop", self.exec_stop.as_deref()),
            ("exec_reload", self.exec_reload.as_deref()),
            ("user", self.user.as_deref()),
            ("group", self.group.as_deref()),
            ("working_directory", self.working_directory.as_deref()),
            ("umask", self.umask.as_deref()),
            ("environment_file", self.environment_file.as_deref()),
            ("protect_system", self.protect_system.as_deref()),
            ("standard_output", Some(self.standard_output.as_str())),
            ("standard_error", Some(self.standard_error.as_str())),
            ("syslog_identifier", self.syslog_identifier.as_deref()),
        ];
        for (field, value) in scalars {
            if let Some(value) = value {
                check_value(field, value)?;
            }
        }

        for (field, values) in [
            ("after", &self.after),
            ("before", &self.before),
            ("wants", &self.wants),
            ("requires", &self.requires),
            ("conflicts", &self.conflicts),
            ("wanted_by", &self.wanted_by),
            ("required_by", &self.required_by),
            ("also", &self.also),
        ] {
            for unit in values {
                validate_unit_name(unit).map_err(|_| {
                    Error::configuration(format!("Invalid unit '{}' in {}", unit, field))
                })?;
            }
        }
        check_values("read_only_paths", &self.read_only_paths)?;
        check_values("inaccessible_paths", &self.inaccessible_paths)?;
        check_environment(&self.environment)
    }
}

fn default_true() -> bool {
    true
}

/// A service to deploy, optionally with a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(flatten)]
    pub service: ServiceConfig,
    /// Also install `<name>.timer`
    #[serde(default)]
    pub create_timer: bool,
    #[serde(default)]
    pub timer: Option<TimerConfig>,
    /// Enable after installing
    #[serde(default = "default_true")]
    pub auto_enable: bool,
    /// Start after installing
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl DeployConfig {
    /// Wrap a service config with the default install behaviour.
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service,
            create_timer: false,
            timer: None,
            auto_enable: true,
            auto_start: true,
        }
    }

    /// Attach a timer.
    pub fn with_timer(mut self, timer: TimerConfig) -> Self {
        self.create_timer = true;
        self.timer = Some(timer);
        self
    }

    /// The timer config when a timer is requested.
    ///
    /// Fails when `create_timer` is set without a timer config.
    pub fn requested_timer(&self) -> Result<Option<&TimerConfig>> {
        match (self.create_timer, &self.timer) {
            (false, _) => Ok(None),
            (true, Some(timer)) => Ok(Some(timer)),
            (true, None) => Err(Error::configuration(
                "create_timer is set but no timer configuration was given",
            )),
        }
    }

    /// Reject self-contradictory deployments before anything is rendered.
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        if let Some(timer) = self.requested_timer()? {
            timer.validate()?;
        }
        Ok(())
    }
}

/// Render a complete `.service` unit.
pub fn render_service_unit(config: &ServiceConfig) -> String {
    let mut unit = Section::new("Unit");
    unit.opt("Description", config.description.as_ref());
    unit.joined("After", &config.after);
    unit.joined("Before", &config.before);
    unit.joined("Wants", &config.wants);
    unit.joined("Requires", &config.requires);
    unit.joined("Conflicts", &config.conflicts);

    let mut service = Section::new("Service");
    service.set("Type", config.service_type.as_str());
    service.set("ExecStart", &config.exec_start);
    service.opt("ExecStartPre", config.exec_start_pre.as_ref());
    service.opt("ExecStartPost", config.exec_start_post.as_ref());
    service.opt("ExecStop", config.exec_stop.as_ref());
    service.opt("ExecReload", config.exec_reload.as_ref());
    service.set("Restart", config.restart.as_str());
    service.opt("RestartSec", config.restart_sec.map(|s| s.to_string()));
    service.opt("TimeoutStartSec", config.timeout_start_sec.map(|s| s.to_string()));
    service.opt("TimeoutStopSec", config.timeout_stop_sec.map(|s| s.to_string()));
    service.opt("User", config.user.as_ref());
    service.opt("Group", config.group.as_ref());
    service.opt("WorkingDirectory", config.working_directory.as_ref());
    service.opt("UMask", config.umask.as_ref());
    service.environment(&config.environment);
    service.opt("EnvironmentFile", config.environment_file.as_ref());
    service.flag("NoNewPrivileges", config.no_new_privileges);
    service.flag("PrivateTmp", config.private_tmp);
    service.opt("ProtectSystem", config.protect_system.as_ref());
    service.flag("ProtectHome", config.protect_home);
    service.repeated("ReadOnlyPaths", &config.read_only_paths);
    service.repeated("InaccessiblePaths", &config.inaccessible_paths);
    service.set("StandardOutput", &config.standard_output);
    service.set("StandardError", &config.standard_error);
    service.opt("SyslogIdentifier", config.syslog_identifier.as_ref());

    let mut install = Section::new("Install");
    if config.wanted_by.is_empty() {
        install.set("WantedBy", "multi-user.target");
    } else {
        install.joined("WantedBy", &config.wanted_by);
    }
    install.joined("RequiredBy", &config.required_by);
    install.joined("Also", &config.also);

    render_sections(&[unit, service, install])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_service_defaults() {
        let config = ServiceConfig::new("hello", "/usr/bin/hello");
        assert_eq!(
            render_service_unit(&config),
            "[Service]\n\
             Type=simple\n\
             ExecStart=/usr/bin/hello\n\
             Restart=on-failure\n\
             StandardOutput=journal\n\
             StandardError=journal\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn test_full_service_rendering() {
        let mut config = ServiceConfig::new("api.service", "/opt/api/bin/api --port 8080");
        config.description = Some("API server".into());
        config.after = vec!["network.target".into(), "postgresql.service".into()];
        config.wants = vec!["network-online.target".into()];
        config.service_type = ServiceType::Notify;
        config.restart = RestartPolicy::Always;
        config.restart_sec = Some(5);
        config.user = Some("api".into());
        config.environment.insert("RUST_LOG".into(), "info".into());
        config.environment.insert("GREETING".into(), "hello world".into());
        config.no_new_privileges = Some(true);
        config.protect_home = Some(false);
        config.read_only_paths = vec!["/etc".into(), "/usr".into()];
        config.wanted_by = vec!["multi-user.target".into(), "graphical.target".into()];

        assert_eq!(
            render_service_unit(&config),
            "[Unit]\n\
             Description=API server\n\
             After=network.target postgresql.service\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=notify\n\
             ExecStart=/opt/api/bin/api --port 8080\n\
             Restart=always\n\
             RestartSec=5\n\
             User=api\n\
             Environment=RUST_LOG=info\n\
             Environment=\"GREETING=hello world\"\n\
             NoNewPrivileges=yes\n\
             ProtectHome=no\n\
             ReadOnlyPaths=/etc\n\
             ReadOnlyPaths=/usr\n\
             StandardOutput=journal\n\
             StandardError=journal\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target graphical.target\n"
        );
    }

    #[test]
    fn test_timer_flag_without_config_rejected() {
        let mut config = DeployConfig::new(ServiceConfig::new("job", "/usr/bin/job"));
        config.create_timer = true;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_injection() {
        let config = ServiceConfig::new("job", "/bin/true\n[Install]\nWantedBy=evil.target");
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::new("job", "/bin/true");
        config.environment.insert("BAD NAME".into(), "x".into());
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::new("job", "/bin/true");
        config.after = vec!["net work.target".into()];
        assert!(config.validate().is_err());

        assert!(ServiceConfig::new("job", "   ").validate().is_err());
    }

    #[test]
    fn test_deploy_config_defaults_from_json() {
        let config: DeployConfig = serde_json::from_str(
            r#"{"name": "worker", "exec_start": "/usr/bin/worker", "restart": "on-abnormal"}"#,
        )
        .unwrap();
        assert!(config.auto_enable);
        assert!(config.auto_start);
        assert!(!config.create_timer);
        assert_eq!(config.service.restart, RestartPolicy::OnAbnormal);
        assert_eq!(config.service.standard_output, "journal");
        assert!(config.validate().is_ok());
    }
}
