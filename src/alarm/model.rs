use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, AlarmResult};

const DEFAULT_DAILY_TIMES: [(u8, u8); 5] = [(9, 0), (11, 0), (14, 0), (17, 0), (19, 0)];

/// A recurring daily alarm.
///
/// Identity is `(hour, minute, name)`: two alarms with the same time and
/// label are the same alarm regardless of their enabled flag.
#[derive(Debug, Clone)]
pub struct Alarm {
    hour: u8,
    minute: u8,
    enabled: bool,
    name: String,
}

impl Alarm {
    pub fn new(hour: u32, minute: u32, name: impl Into<String>) -> AlarmResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(AlarmError::InvalidTime { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
            enabled: true,
            name: name.into(),
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn matches(&self, hour: u8, minute: u8, name: &str) -> bool {
        self.hour == hour && self.minute == minute && self.name == name
    }
}

impl PartialEq for Alarm {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.hour, other.minute, &other.name)
    }
}

impl Eq for Alarm {}

impl Hash for Alarm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hour.hash(state);
        self.minute.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.enabled { "on" } else { "off" };
        write!(
            f,
            "{:02}:{:02} {} [{state}]",
            self.hour, self.minute, self.name
        )
    }
}

/// On-disk shape of one entry in `managed_alarms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmRecord {
    pub hour: u32,
    pub minute: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub name: String,
}

impl AlarmRecord {
    pub fn into_alarm(self) -> AlarmResult<Alarm> {
        Ok(Alarm::new(self.hour, self.minute, self.name)?.with_enabled(self.enabled))
    }
}

impl From<&Alarm> for AlarmRecord {
    fn from(alarm: &Alarm) -> Self {
        Self {
            hour: u32::from(alarm.hour),
            minute: u32::from(alarm.minute),
            enabled: alarm.enabled,
            name: alarm.name.clone(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Parses user input of the form `HH:MM`, `H:MM` or a bare hour `H`.
pub fn parse_time(input: &str) -> AlarmResult<(u8, u8)> {
    let trimmed = input.trim();
    let invalid = || AlarmError::InvalidFormat(input.to_string());

    let (hour_text, minute_text) = match trimmed.split_once(':') {
        Some((hour, minute)) => (hour, minute),
        None => (trimmed, "0"),
    };
    let minute_text = if minute_text.is_empty() {
        "0"
    } else {
        minute_text
    };
    let hour = hour_text.trim().parse::<u32>().map_err(|_| invalid())?;
    let minute = minute_text.trim().parse::<u32>().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(AlarmError::InvalidTime { hour, minute });
    }
    Ok((hour as u8, minute as u8))
}

/// The template alarms installed when no settings file exists.
pub fn default_alarms() -> Vec<Alarm> {
    DEFAULT_DAILY_TIMES
        .iter()
        .map(|&(hour, minute)| Alarm {
            hour,
            minute,
            enabled: true,
            name: format!("Daily {hour:02}:{minute:02}"),
        })
        .collect()
}
