//! Timer unit configuration and rendering.

use serde::{Deserialize, Serialize};

use super::{base_name, check_value, cron_to_calendar, render_sections, Section};
use crate::error::{Error, Result};

/// Schedule for a `.timer` unit.
///
/// At least one trigger is required. `on_calendar` and `cron` are two
/// spellings of the same trigger and cannot both be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// systemd calendar spec (`daily`, `*-*-* 02:00:00`)
    pub on_calendar: Option<String>,
    /// Cron expression, converted to `OnCalendar=`
    pub cron: Option<String>,
    pub on_boot_sec: Option<String>,
    pub on_startup_sec: Option<String>,
    pub on_unit_active_sec: Option<String>,
    pub on_unit_inactive_sec: Option<String>,
    pub accuracy_sec: Option<String>,
    pub randomized_delay_sec: Option<String>,
    pub persistent: Option<bool>,
    pub wake_system: Option<bool>,
}

impl TimerConfig {
    /// A calendar-triggered timer.
    pub fn calendar(spec: impl Into<String>) -> Self {
        Self {
            on_calendar: Some(spec.into()),
            ..Self::default()
        }
    }

    /// A cron-triggered timer.
    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            cron: Some(expr.into()),
            ..Self::default()
        }
    }

    /// Effective `OnCalendar=` value, if any.
    pub fn calendar_spec(&self) -> Result<Option<String>> {
        match (&self.on_calendar, &self.cron) {
            (Some(_), Some(_)) => Err(Error::configuration(
                "Timer cannot have both on_calendar and cron",
            )),
            (Some(spec), None) => Ok(Some(spec.clone())),
            (None, Some(expr)) => cron_to_calendar(expr).map(Some),
            (None, None) => Ok(None),
        }
    }

    /// Short description of when the timer fires, for unit records.
    pub fn schedule(&self) -> Result<Option<String>> {
        if let Some(spec) = self.calendar_spec()? {
            return Ok(Some(spec));
        }
        Ok(self
            .monotonic()
            .into_iter()
            .find_map(|(key, value)| value.map(|v| format!("{}={}", key, v))))
    }

    fn monotonic(&self) -> [(&'static str, Option<&String>); 4] {
        [
            ("OnBootSec", self.on_boot_sec.as_ref()),
            ("OnStartupSec", self.on_startup_sec.as_ref()),
            ("OnUnitActiveSec", self.on_unit_active_sec.as_ref()),
            ("OnUnitInactiveSec", self.on_unit_inactive_sec.as_ref()),
        ]
    }

    /// Reject timers without a trigger, with conflicting triggers, or with
    /// values that do not fit on one line.
    pub fn validate(&self) -> Result<()> {
        let calendar = self.calendar_spec()?;
        if calendar.is_none() && self.monotonic().iter().all(|(_, v)| v.is_none()) {
            return Err(Error::configuration(
                "Timer needs at least one trigger (on_calendar, cron or On*Sec)",
            ));
        }

        if let Some(spec) = &calendar {
            check_value("on_calendar", spec)?;
        }
        for (field, value) in self.monotonic() {
            if let Some(value) = value {
                check_value(field, value)?;
            }
        }
        for (field, value) in [
            ("accuracy_sec", &self.accuracy_sec),
            ("randomized_delay_sec", &self.randomized_delay_sec),
        ] {
            if let Some(value) = value {
                check_value(field, value)?;
            }
        }
        Ok(())
    }
}

/// Render the `.timer` unit that activates `<name>.service`.
pub fn render_timer_unit(name: &str, timer: &TimerConfig) -> Result<String> {
    let name = base_name(name);

    let mut unit = Section::new("Unit");
    unit.set("Description", format!("Timer for {}", name));
    unit.set("Requires", format!("{}.service", name));

    let mut section = Section::new("Timer");
    section.opt("OnCalendar", timer.calendar_spec()?);
    for (key, value) in timer.monotonic() {
        section.opt(key, value);
    }
    section.opt("AccuracySec", timer.accuracy_sec.as_ref());
    section.opt("RandomizedDelaySec", timer.randomized_delay_sec.as_ref());
    section.flag("Persistent", timer.persistent);
    section.flag("WakeSystem", timer.wake_system);

    let mut install = Section::new("Install");
    install.set("WantedBy", "timers.target");

    Ok(render_sections(&[unit, section, install]))
}
