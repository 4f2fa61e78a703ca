//! Built-in deployment presets.

use serde::Serialize;

use crate::synth::{DeployConfig, RestartPolicy, ServiceConfig, ServiceType, TimerConfig};

/// A named starting point for a deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub config: DeployConfig,
}

fn service(name: &str, description: &str, exec_start: &str, user: &str, workdir: &str) -> ServiceConfig {
    let mut config = ServiceConfig::new(name, exec_start);
    config.description = Some(description.to_string());
    config.user = Some(user.to_string());
    config.group = Some(user.to_string());
    config.working_directory = Some(workdir.to_string());
    config
}

fn timer(calendar: &str, accuracy: &str) -> TimerConfig {
    TimerConfig {
        persistent: Some(true),
        accuracy_sec: Some(accuracy.to_string()),
        ..TimerConfig::calendar(calendar)
    }
}

fn python_app() -> Template {
    let mut svc = service(
        "my-python-app",
        "A Python application service",
        "uv run python main.py",
        "app",
        "/opt/app",
    );
    svc.display_name = Some("My Python Application".into());
    svc.environment.insert("PYTHONPATH".into(), "/opt/app".into());
    svc.environment.insert("ENV".into(), "production".into());
    Template {
        name: "python-app",
        description: "Python application service with uv",
        category: "application",
        config: DeployConfig::new(svc),
    }
}

fn scheduled_task() -> Template {
    let mut svc = service(
        "my-scheduled-task",
        "A scheduled task service",
        "/usr/bin/python3 /opt/scripts/task.py",
        "scripts",
        "/opt/scripts",
    );
    svc.display_name = Some("My Scheduled Task".into());
    svc.service_type = ServiceType::Oneshot;
    svc.restart = RestartPolicy::No;
    let mut config = DeployConfig::new(svc).with_timer(timer("daily", "1min"));
    config.auto_start = false;
    Template {
        name: "scheduled-task",
        description: "Scheduled task service with timer",
        category: "timer",
        config,
    }
}

fn web_service() -> Template {
    let mut svc = service(
        "my-web-service",
        "A web service",
        "/usr/bin/node server.js",
        "www-data",
        "/opt/webapp",
    );
    svc.display_name = Some("My Web Service".into());
    svc.restart_sec = Some(5);
    svc.after = vec!["network.target".into()];
    svc.wants = vec!["network.target".into()];
    svc.environment.insert("NODE_ENV".into(), "production".into());
    svc.environment.insert("PORT".into(), "3000".into());
    Template {
        name: "web-service",
        description: "Web service with networking",
        category: "web",
        config: DeployConfig::new(svc),
    }
}

fn backup_script() -> Template {
    let mut svc = service(
        "backup-service",
        "Automated backup service",
        "/opt/scripts/backup.sh",
        "backup",
        "/opt/scripts",
    );
    svc.display_name = Some("Backup Service".into());
    svc.service_type = ServiceType::Oneshot;
    svc.environment.insert("BACKUP_DIR".into(), "/backups".into());
    svc.environment.insert("RETENTION_DAYS".into(), "30".into());
    let mut config = DeployConfig::new(svc).with_timer(timer("*-*-* 02:00:00", "5min"));
    config.auto_start = false;
    Template {
        name: "backup-script",
        description: "Backup script with timer",
        category: "backup",
        config,
    }
}

/// All built-in presets.
pub fn builtin() -> Vec<Template> {
    vec![python_app(), scheduled_task(), web_service(), backup_script()]
}

/// Look up a preset by name.
pub fn find(name: &str) -> Option<Template> {
    builtin().into_iter().find(|t| t.name == name)
}
