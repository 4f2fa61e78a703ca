//! Output formatting for the unitfleet CLI
//!
//! Human mode prints colored, line-oriented text. JSON mode prints exactly
//! one JSON document per command on stdout; messages go to stderr as JSON
//! objects so stdout stays parseable.

use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

use unitfleet::model::{HostStatus, UnitStatus};

/// Output formatter for human and JSON modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print the single JSON document of a command
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print the outcome line of an operation
    pub fn outcome(&self, host: &str, success: bool, message: &str) {
        if self.json_mode {
            return;
        }

        let (status, host) = if self.use_color {
            let status = if success {
                "ok".green().to_string()
            } else {
                "failed".red().bold().to_string()
            };
            (status, host.bright_white().bold().to_string())
        } else {
            let status = if success { "ok" } else { "failed" };
            (status.to_string(), host.to_string())
        };
        println!("{}: [{}] => {}", status, host, message);
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        self.message("error", "ERROR:", message, |s| s.red().bold().to_string());
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        self.message("warning", "WARNING:", message, |s| {
            s.yellow().bold().to_string()
        });
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        self.message("hint", "HINT:", message, |s| s.cyan().bold().to_string());
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }
        self.message("info", "INFO:", message, |s| s.blue().to_string());
    }

    /// Print a debug message (requires higher verbosity)
    pub fn debug(&self, message: &str) {
        if self.verbosity < 2 {
            return;
        }
        self.message("debug", "DEBUG:", message, |s| s.magenta().to_string());
    }

    fn message(&self, kind: &str, label: &str, message: &str, paint: impl Fn(&str) -> String) {
        if self.json_mode {
            let line = serde_json::json!({
                "type": kind,
                "message": message
            });
            eprintln!("{}", line);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", paint(label), message);
        } else {
            eprintln!("{} {}", label, message);
        }
    }

    /// Print a `key: value` line
    pub fn field(&self, key: &str, value: impl std::fmt::Display) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("  {:<16} {}", format!("{}:", key).bright_black(), value);
        } else {
            println!("  {:<16} {}", format!("{}:", key), value);
        }
    }

    /// Print a list of items
    pub fn list(&self, title: &str, items: &[String]) {
        if self.json_mode || items.is_empty() {
            return;
        }

        if self.use_color {
            println!("\n{}:", title.bright_white().bold());
        } else {
            println!("\n{}:", title);
        }

        for item in items {
            if self.use_color {
                println!("  {} {}", "-".bright_black(), item);
            } else {
                println!("  - {}", item);
            }
        }
    }

    /// Print warnings collected by an operation
    pub fn warnings(&self, warnings: &[String]) {
        for warning in warnings {
            self.warning(warning);
        }
    }

    /// Print verbatim text, such as a rendered unit file
    pub fn text(&self, text: &str) {
        if self.json_mode {
            return;
        }
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.json_mode {
            return;
        }

        // Calculate column widths
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let header_line = headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ");
        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

        if self.use_color {
            println!("{}", header_line.bright_white().bold());
            println!("{}", sep.join("-+-").bright_black());
        } else {
            println!("{}", header_line);
            println!("{}", sep.join("-+-"));
        }

        for row in rows {
            let line = row
                .iter()
                .enumerate()
                .filter(|(i, _)| *i < widths.len())
                .map(|(i, cell)| format!("{:width$}", cell, width = widths[i]))
                .collect::<Vec<_>>()
                .join(" | ");
            println!("{}", line);
        }
    }

    /// A unit status, colored by health
    pub fn unit_status(&self, status: UnitStatus) -> String {
        if !self.use_color {
            return status.to_string();
        }
        match status {
            UnitStatus::Active => status.as_str().green().to_string(),
            UnitStatus::Failed => status.as_str().red().bold().to_string(),
            UnitStatus::Inactive => status.as_str().bright_black().to_string(),
            _ => status.as_str().yellow().to_string(),
        }
    }

    /// A host status, colored by reachability
    pub fn host_status(&self, status: HostStatus) -> String {
        if !self.use_color {
            return status.to_string();
        }
        match status {
            HostStatus::Online => status.to_string().green().to_string(),
            HostStatus::Offline | HostStatus::Error => status.to_string().red().bold().to_string(),
            _ => status.to_string().yellow().to_string(),
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Format a duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;
        format!("{}h {}m {}s", hours, mins, secs)
    } else if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
