use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::alarm::schedule::{AlarmSchedule, TimeDisplayMode, format_next_fire};
use crate::config::Settings;
use crate::ping::history::ProbeHistory;
use crate::ping::monitor::MonitorConfig;
use crate::ping::prober::HostProber;

/// Probes `config.host` `count` times, `config.interval` apart.
pub fn run_probes(prober: &dyn HostProber, config: &MonitorConfig, count: usize) -> ProbeHistory {
    let mut history = ProbeHistory::default();
    for index in 0..count {
        if index > 0 {
            thread::sleep(config.interval);
        }
        history.record(prober.probe(&config.host, config.timeout));
    }
    history
}

pub fn write_probe_summary(out: &mut impl Write, history: &ProbeHistory) -> Result<()> {
    writeln!(
        out,
        "Probes: {}  Failed: {}  Loss: {:.1}%",
        history.total(),
        history.failures(),
        history.loss_percent()
    )?;
    match (
        history.min_latency_ms(),
        history.average_latency_ms(),
        history.max_latency_ms(),
    ) {
        (Some(min), Some(avg), Some(max)) => writeln!(
            out,
            "Latency min/avg/max: {min:.1}/{avg:.1}/{max:.1} ms"
        )?,
        _ => writeln!(out, "Latency min/avg/max: -")?,
    }
    Ok(())
}

pub fn write_schedule(
    out: &mut impl Write,
    schedule: &AlarmSchedule,
    mode: TimeDisplayMode,
) -> Result<()> {
    if schedule.is_empty() {
        writeln!(out, "No alarms configured")?;
        return Ok(());
    }
    for alarm in schedule.alarms() {
        writeln!(
            out,
            "  {alarm}  next: {}",
            format_next_fire(schedule.next_fire_for(alarm), mode)
        )?;
    }
    Ok(())
}

pub fn run_diagnostics(
    out: &mut impl Write,
    settings_path: &Path,
    settings: &Settings,
    schedule: &AlarmSchedule,
    prober: Option<&dyn HostProber>,
) -> Result<()> {
    let config = settings.monitor_config();
    writeln!(out, "PingClock diagnostics")?;
    writeln!(out, "Settings file: {}", settings_path.display())?;
    writeln!(
        out,
        "Ping target: {} (interval {}s, timeout {}s, alert after {} failures)",
        config.host,
        config.interval.as_secs(),
        config.timeout.as_secs(),
        config.max_errors_before_alert
    )?;
    let enabled = schedule.alarms().iter().filter(|a| a.enabled()).count();
    writeln!(
        out,
        "Managed alarms: {} ({enabled} enabled)",
        schedule.len()
    )?;
    write_schedule(out, schedule, TimeDisplayMode::Hour24)?;

    if let Some(first) = schedule.next_fires().first() {
        writeln!(
            out,
            "Next ring: {} ({})",
            format_next_fire(Some(first.at), TimeDisplayMode::Hour24),
            first.alarm.name()
        )?;
    }

    if let Some(prober) = prober {
        writeln!(out, "Running 3 probes against {}...", config.host)?;
        let quick = MonitorConfig {
            interval: Duration::from_millis(200),
            ..config
        };
        let history = run_probes(prober, &quick, 3);
        write_probe_summary(out, &history)?;
    }
    Ok(())
}
