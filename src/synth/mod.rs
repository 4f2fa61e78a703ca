//! Unit file synthesis.
//!
//! Pure functions that turn structured configuration into systemd unit text.
//! Nothing in this module performs I/O; the same input always renders the
//! same bytes.
//!
//! Sections are emitted in the fixed order `[Unit]`, `[Service]`, `[Timer]`,
//! `[Install]`, separated by one blank line. A section with no directives is
//! left out entirely.

pub mod cron;
pub mod dropin;
pub mod service;
pub mod timer;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

pub use cron::cron_to_calendar;
pub use dropin::{render_override, OverrideConfig};
pub use service::{render_service_unit, DeployConfig, RestartPolicy, ServiceConfig, ServiceType};
pub use timer::{render_timer_unit, TimerConfig};

/// Regex for validating unit names, with or without the `.service` suffix
static UNIT_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_:][a-zA-Z0-9_:@.\\-]*$").expect("Invalid unit name regex")
});

/// Regex for environment variable names
static ENV_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid env name regex"));

/// Longest unit name systemd accepts.
const MAX_UNIT_NAME: usize = 255;

/// Check a unit name against systemd's unit-name syntax.
pub fn validate_unit_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_UNIT_NAME {
        return Err(Error::configuration(format!(
            "Unit name must be 1 to {} characters",
            MAX_UNIT_NAME
        )));
    }
    if !UNIT_NAME_REGEX.is_match(name) || base_name(name).is_empty() {
        return Err(Error::configuration(format!(
            "Invalid unit name '{}': only letters, digits and ':_.@-\\' are allowed",
            name
        )));
    }
    Ok(())
}

/// Unit name without the `.service` suffix.
pub fn base_name(name: &str) -> &str {
    name.strip_suffix(".service").unwrap_or(name)
}

/// Unit name with the `.service` suffix.
pub fn service_unit_name(name: &str) -> String {
    format!("{}.service", base_name(name))
}

/// Reject values that would break out of a single directive line.
pub(crate) fn check_value(field: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(Error::configuration(format!(
            "Field '{}' must not contain line breaks",
            field
        )));
    }
    Ok(())
}

pub(crate) fn check_values<'a>(
    field: &str,
    values: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    values.into_iter().try_for_each(|v| check_value(field, v))
}

pub(crate) fn check_environment(environment: &IndexMap<String, String>) -> Result<()> {
    for (key, value) in environment {
        if !ENV_NAME_REGEX.is_match(key) {
            return Err(Error::configuration(format!(
                "Invalid environment variable name '{}'",
                key
            )));
        }
        check_value(key, value)?;
    }
    Ok(())
}

/// Render one `Environment=` assignment, quoting when systemd would split it.
fn environment_line(key: &str, value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || c == '\'');
    if needs_quotes {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}={}\"", key, escaped)
    } else {
        format!("{}={}", key, value)
    }
}

/// Directives for one section, in insertion order.
#[derive(Debug)]
pub(crate) struct Section {
    name: &'static str,
    lines: Vec<String>,
}

impl Section {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            lines: Vec::new(),
        }
    }

    pub(crate) fn set(&mut self, key: &str, value: impl AsRef<str>) {
        self.lines.push(format!("{}={}", key, value.as_ref()));
    }

    pub(crate) fn opt(&mut self, key: &str, value: Option<impl AsRef<str>>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }

    /// Single line, members separated by one space. Skipped when empty.
    pub(crate) fn joined(&mut self, key: &str, values: &[String]) {
        if !values.is_empty() {
            self.set(key, values.join(" "));
        }
    }

    /// One directive line per element.
    pub(crate) fn repeated(&mut self, key: &str, values: &[String]) {
        for value in values {
            self.set(key, value);
        }
    }

    pub(crate) fn flag(&mut self, key: &str, value: Option<bool>) {
        if let Some(value) = value {
            self.set(key, if value { "yes" } else { "no" });
        }
    }

    /// Empty assignment, which clears list settings inherited from the base unit.
    pub(crate) fn reset(&mut self, key: &str) {
        self.lines.push(format!("{}=", key));
    }

    pub(crate) fn environment(&mut self, environment: &IndexMap<String, String>) {
        for (key, value) in environment {
            self.set("Environment", environment_line(key, value));
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Join non-empty sections into unit file text.
pub(crate) fn render_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut block = format!("[{}]\n", s.name);
            for line in &s.lines {
                block.push_str(line);
                block.push('\n');
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}
