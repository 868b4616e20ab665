use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::alarm::model::{Alarm, AlarmRecord, default_alarms};
use crate::alarm::schedule::AlarmSchedule;
use crate::ping::monitor::{DEFAULT_MAX_ERRORS_BEFORE_ALERT, MonitorConfig};

pub const DEFAULT_DNS_SERVER: &str = "8.8.8.8";
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 1;

/// Persisted settings. Keys this crate does not use are carried through
/// load and save untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub dns_server: String,
    pub ping_timeout: u64,
    pub ping_interval: u64,
    pub max_errors_before_alert: u32,
    pub repeat_poor_alert: bool,
    pub alarms: Vec<Alarm>,
    extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dns_server: DEFAULT_DNS_SERVER.to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT_SECS,
            ping_interval: DEFAULT_PING_INTERVAL_SECS,
            max_errors_before_alert: DEFAULT_MAX_ERRORS_BEFORE_ALERT,
            repeat_poor_alert: false,
            alarms: default_alarms(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            host: self.dns_server.clone(),
            interval: Duration::from_secs(self.ping_interval.max(1)),
            timeout: Duration::from_secs(self.ping_timeout.max(1)),
            max_errors_before_alert: self.max_errors_before_alert.max(1),
            repeat_poor_alert: self.repeat_poor_alert,
        }
    }

    pub fn store_schedule(&mut self, schedule: &AlarmSchedule) {
        self.alarms = schedule.alarms().to_vec();
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default = "default_dns_server")]
    dns_server: String,
    #[serde(default = "default_ping_timeout")]
    ping_timeout: u64,
    #[serde(default = "default_ping_interval")]
    ping_interval: u64,
    #[serde(default = "default_max_errors")]
    max_errors_before_alert: u32,
    #[serde(default)]
    repeat_poor_alert: bool,
    /// Entries stay raw so one malformed record cannot reject the file.
    #[serde(default)]
    managed_alarms: Option<Vec<Value>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_dns_server() -> String {
    DEFAULT_DNS_SERVER.to_string()
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_SECS
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

fn default_max_errors() -> u32 {
    DEFAULT_MAX_ERRORS_BEFORE_ALERT
}

pub fn parse_settings_text(content: &str) -> Result<Settings> {
    let raw = serde_json::from_str::<SettingsFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    let alarms = match raw.managed_alarms {
        Some(records) => validate_alarm_records(records),
        None => default_alarms(),
    };

    Ok(Settings {
        dns_server: raw.dns_server,
        ping_timeout: raw.ping_timeout,
        ping_interval: raw.ping_interval,
        max_errors_before_alert: raw.max_errors_before_alert,
        repeat_poor_alert: raw.repeat_poor_alert,
        alarms,
        extra: raw.extra,
    })
}

fn validate_alarm_records(records: Vec<Value>) -> Vec<Alarm> {
    let mut seen = HashSet::new();
    let mut alarms = Vec::with_capacity(records.len());
    for (index, value) in records.into_iter().enumerate() {
        let record = match serde_json::from_value::<AlarmRecord>(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!("skipping malformed stored alarm #{index}: {err}");
                continue;
            }
        };
        let alarm = match record.into_alarm() {
            Ok(alarm) => alarm,
            Err(err) => {
                tracing::warn!("skipping stored alarm: {err}");
                continue;
            }
        };
        if !seen.insert(alarm.clone()) {
            tracing::warn!(%alarm, "skipping duplicate stored alarm");
            continue;
        }
        alarms.push(alarm);
    }
    alarms
}

/// JSON settings file on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads settings, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load(&self) -> Settings {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no settings file, using defaults");
            return Settings::default();
        }
        match self.load_strict() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!("{err:#}; using default settings");
                Settings::default()
            }
        }
    }

    /// Loads settings that are about to be rewritten. A missing file yields
    /// defaults, but an unreadable one is an error so it is never clobbered.
    pub fn load_for_update(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        self.load_strict()
    }

    pub fn load_strict(&self) -> Result<Settings> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read settings file {}", self.path.display()))?;
        parse_settings_text(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let managed_alarms = settings
            .alarms
            .iter()
            .map(|alarm| serde_json::to_value(AlarmRecord::from(alarm)))
            .collect::<Result<Vec<_>, _>>()?;
        let payload = SettingsFile {
            dns_server: settings.dns_server.clone(),
            ping_timeout: settings.ping_timeout,
            ping_interval: settings.ping_interval,
            max_errors_before_alert: settings.max_errors_before_alert,
            repeat_poor_alert: settings.repeat_poor_alert,
            managed_alarms: Some(managed_alarms),
            extra: settings.extra.clone(),
        };
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.path, format!("{text}\n"))
            .with_context(|| format!("unable to write settings file {}", self.path.display()))?;
        Ok(())
    }
}
