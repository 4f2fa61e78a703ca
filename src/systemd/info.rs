//! Connection test and system fact gathering.

use serde::Serialize;
use tracing::{debug, warn};

use super::RemoteSystemd;
use crate::command::ShellCommand;
use crate::connection::ConnectionError;
use crate::error::{Error, Result};
use crate::model::{Host, SystemFacts};

/// Marker echoed back by a successful connection test.
pub const TEST_MARKER: &str = "test_successful";

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub error: Option<String>,
    /// The failure may clear up on a later attempt
    #[serde(skip)]
    pub transient: bool,
}

fn os_release(field: &'static str) -> ShellCommand {
    // field is a fixed `^NAME=` style pattern
    ShellCommand::new("grep")
        .flag(field)
        .arg("/etc/os-release")
        .pipe(ShellCommand::new("cut").arg("-d=").arg("-f2-"))
        .pipe(ShellCommand::new("tr").arg("-d").arg("\""))
}

/// The fact probes, one command per field.
fn probes() -> [(&'static str, ShellCommand); 7] {
    [
        ("os_name", os_release("'^NAME='")),
        ("os_version", os_release("'^VERSION='")),
        ("kernel_version", ShellCommand::new("uname").arg("-r")),
        ("architecture", ShellCommand::new("uname").arg("-m")),
        ("cpu_cores", ShellCommand::new("nproc")),
        (
            "memory_mb",
            ShellCommand::script("awk '/^MemTotal:/ {print int($2/1024)}' /proc/meminfo"),
        ),
        (
            "disk_gb",
            ShellCommand::script("df -BG / | tail -1 | awk '{print int($2)}'"),
        ),
    ]
}

/// Parse an all-digit probe output.
fn parse_count<T: std::str::FromStr>(value: &str) -> Option<T> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

impl RemoteSystemd {
    /// Open (or reuse) a session and check it answers with the marker.
    pub async fn test_connection(&self, host: &Host) -> ConnectionCheck {
        let outcome = async {
            let session = self.connect(host).await?;
            session
                .run(&ShellCommand::new("echo").arg(TEST_MARKER))
                .await
        }
        .await;

        match outcome {
            Ok(result) if result.exit_ok && result.stdout.contains(TEST_MARKER) => ConnectionCheck {
                success: true,
                error: None,
                transient: false,
            },
            Ok(result) => ConnectionCheck {
                success: false,
                error: Some(format!(
                    "Test command failed: {}",
                    result.error_message(|| "unexpected output".to_string())
                )),
                transient: false,
            },
            Err(e) => ConnectionCheck {
                success: false,
                error: Some(e.to_string()),
                transient: e.is_transient(),
            },
        }
    }

    /// Run the fact battery.
    ///
    /// A failed probe leaves its field empty. The call fails only when no
    /// session could be opened or every probe failed.
    pub async fn gather_system_info(&self, host: &Host) -> Result<SystemFacts> {
        let session = self.connect(host).await?;
        let mut facts = SystemFacts::default();
        let mut answered = 0usize;
        let mut last_error = None;

        for (field, command) in probes() {
            let value = match session.run(&command).await {
                Ok(result) if result.exit_ok => {
                    answered += 1;
                    result.stdout.trim().to_string()
                }
                Ok(result) => {
                    debug!(host = %host.hostname, field, stderr = %result.stderr.trim(), "Fact probe failed");
                    continue;
                }
                Err(e) => {
                    warn!(host = %host.hostname, field, error = %e, "Fact probe failed");
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            if value.is_empty() {
                continue;
            }
            match field {
                "os_name" => facts.os_name = Some(value),
                "os_version" => facts.os_version = Some(value),
                "kernel_version" => facts.kernel_version = Some(value),
                "architecture" => facts.architecture = Some(value),
                "cpu_cores" => facts.cpu_cores = parse_count(&value),
                "memory_mb" => facts.memory_mb = parse_count(&value),
                "disk_gb" => facts.disk_gb = parse_count(&value),
                _ => {}
            }
        }

        if answered == 0 {
            return Err(Error::connection(
                &host.hostname,
                ConnectionError::Incomplete(format!(
                    "no system information probe succeeded{}",
                    last_error.map(|e| format!(" ({})", e)).unwrap_or_default()
                )),
            ));
        }
        Ok(facts)
    }
}
