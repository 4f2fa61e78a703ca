//! Cron expression to `OnCalendar=` conversion.
//!
//! Supported input:
//! - the `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight` and `@hourly` shortcuts, mapped to systemd keywords
//! - five-field `minute hour day month weekday`, converted field by field into
//!   `[weekday ]*-month-day hour:minute:00` with `*` passed through

use crate::error::{Error, Result};

/// Cron weekday numbers (0 and 7 are Sunday) to systemd weekday names.
const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn shortcut(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("yearly"),
        "@monthly" => Some("monthly"),
        "@weekly" => Some("weekly"),
        "@daily" | "@midnight" => Some("daily"),
        "@hourly" => Some("hourly"),
        _ => None,
    }
}

fn check_field(expr: &str, name: &str, value: &str) -> Result<()> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/'));
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "Invalid cron expression '{}': bad {} field '{}'",
            expr, name, value
        )))
    }
}

/// Convert a cron expression into a systemd calendar specification.
///
/// ```rust
/// use unitfleet::synth::cron_to_calendar;
///
/// assert_eq!(cron_to_calendar("@daily").unwrap(), "daily");
/// assert_eq!(cron_to_calendar("0 2 * * *").unwrap(), "*-*-* 2:0:00");
/// assert_eq!(cron_to_calendar("30 6 * * 1").unwrap(), "Mon *-*-* 6:30:00");
/// ```
pub fn cron_to_calendar(expr: &str) -> Result<String> {
    let expr = expr.trim();
    if let Some(keyword) = shortcut(expr) {
        return Ok(keyword.to_string());
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields.as_slice() else {
        return Err(Error::configuration(format!(
            "Invalid cron expression '{}': expected 5 fields, got {}",
            expr,
            fields.len()
        )));
    };

    for (name, value) in [
        ("minute", minute),
        ("hour", hour),
        ("day", day),
        ("month", month),
        ("weekday", weekday),
    ] {
        check_field(expr, name, value)?;
    }

    let mut calendar = String::new();
    if *weekday != "*" {
        if weekday.chars().all(|c| c.is_ascii_digit()) {
            let day_name = weekday
                .parse::<usize>()
                .ok()
                .and_then(|n| WEEKDAYS.get(n))
                .ok_or_else(|| {
                    Error::configuration(format!(
                        "Invalid cron expression '{}': weekday '{}' out of range",
                        expr, weekday
                    ))
                })?;
            calendar.push_str(day_name);
        } else {
            calendar.push_str(weekday);
        }
        calendar.push(' ');
    }
    calendar.push_str(&format!("*-{}-{} {}:{}:00", month, day, hour, minute));
    Ok(calendar)
}
