use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pingclock::alarm::model::{Alarm, parse_time};
use pingclock::alarm::monitor::{AlarmMonitor, AlarmTicker};
use pingclock::alarm::schedule::{AlarmSchedule, TimeDisplayMode};
use pingclock::clock::SystemClock;
use pingclock::config::{ConfigStore, Settings};
use pingclock::diagnostics::{run_diagnostics, run_probes, write_probe_summary, write_schedule};
use pingclock::error::AlarmError;
use pingclock::notify::{Notification, StatusKind};
use pingclock::ping::history::ProbeHistory;
use pingclock::ping::monitor::PingMonitor;
use pingclock::ping::prober::{HostProber, ProbeResult, SystemProber};
use pingclock::sound::{LogSound, SoundPlayer};

#[derive(Parser, Debug)]
#[command(
    name = "pingclock",
    version,
    about = "Recurring alarms and DNS reachability monitoring"
)]
struct Cli {
    #[arg(long, global = true, default_value = "settings.json")]
    config: PathBuf,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ping and alarm monitors until interrupted.
    Run(RunArgs),
    /// Probe the target host a few times and print a summary.
    Probe(ProbeArgs),
    /// Print the effective settings and upcoming alarms.
    Diagnostics {
        /// Also probe the configured host.
        #[arg(long)]
        probe: bool,
    },
    /// Manage the stored alarm list.
    #[command(subcommand)]
    Alarms(AlarmCommand),
}

#[derive(Args, Debug)]
struct TargetArgs {
    #[arg(long)]
    host: Option<String>,

    /// Probe timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds between probes.
    #[arg(long)]
    interval: Option<u64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Only run the alarm monitor.
    #[arg(long)]
    no_ping: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, default_value_t = 4)]
    count: usize,
}

#[derive(Args, Debug)]
struct AlarmTarget {
    /// Alarm time as HH:MM.
    time: String,

    #[arg(long, default_value = "")]
    name: String,
}

#[derive(Subcommand, Debug)]
enum AlarmCommand {
    /// List alarms with their next ring time.
    List {
        #[arg(long = "12h")]
        hour12: bool,
    },
    Add {
        #[command(flatten)]
        target: AlarmTarget,

        #[arg(long)]
        disabled: bool,
    },
    Remove(AlarmTarget),
    Enable(AlarmTarget),
    Disable(AlarmTarget),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let directive = if verbose {
        "pingclock=debug"
    } else {
        "pingclock=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let store = ConfigStore::new(&cli.config);
    match cli.command {
        Command::Run(args) => run_monitors(&store, args),
        Command::Probe(args) => run_probe(&store, args),
        Command::Diagnostics { probe } => {
            let settings = store.load();
            let schedule = build_schedule(&settings)?;
            let prober = SystemProber::new();
            let prober = if probe {
                Some(&prober as &dyn HostProber)
            } else {
                None
            };
            run_diagnostics(
                &mut io::stdout().lock(),
                store.path(),
                &settings,
                &schedule,
                prober,
            )
        }
        Command::Alarms(command) => run_alarm_command(&store, command),
    }
}

fn apply_target(settings: &mut Settings, target: &TargetArgs) -> Result<()> {
    if let Some(host) = &target.host {
        if host.trim().is_empty() {
            bail!("--host must not be empty");
        }
        settings.dns_server = host.trim().to_string();
    }
    if let Some(timeout) = target.timeout {
        if timeout == 0 {
            bail!("--timeout must be greater than zero");
        }
        settings.ping_timeout = timeout;
    }
    if let Some(interval) = target.interval {
        if interval == 0 {
            bail!("--interval must be greater than zero");
        }
        settings.ping_interval = interval;
    }
    Ok(())
}

fn build_schedule(settings: &Settings) -> Result<AlarmSchedule> {
    AlarmSchedule::with_alarms(settings.alarms.clone(), Local::now())
        .context("stored alarms are inconsistent")
}

fn run_monitors(store: &ConfigStore, args: RunArgs) -> Result<()> {
    let mut settings = store.load();
    apply_target(&mut settings, &args.target)?;
    let schedule = Arc::new(Mutex::new(build_schedule(&settings)?));

    let (tx, rx) = mpsc::channel::<Notification>();
    let sink = Arc::new(tx);
    let sound: Arc<dyn SoundPlayer> = Arc::new(LogSound::new());

    let mut alarm_monitor = AlarmMonitor::new(AlarmTicker::new(
        Arc::clone(&schedule),
        Arc::new(SystemClock),
        sink.clone(),
        Arc::clone(&sound),
    ));
    alarm_monitor.start()?;

    let mut ping_monitor = if args.no_ping {
        None
    } else {
        let mut monitor = PingMonitor::new(
            settings.monitor_config(),
            Arc::new(SystemProber::new()),
            sink.clone(),
            Arc::clone(&sound),
        );
        monitor.start()?;
        Some(monitor)
    };
    drop(sink);

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    tracing::info!(
        host = %settings.dns_server,
        alarms = settings.alarms.len(),
        "monitors running"
    );
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut history = ProbeHistory::default();
    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("interrupted");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(notification) => report(&notification, &mut history),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(monitor) = ping_monitor.as_mut() {
        monitor.stop();
    }
    alarm_monitor.stop();
    sound.stop();

    if history.total() > 0 {
        write_probe_summary(&mut io::stdout().lock(), &history)?;
    }
    Ok(())
}

fn report(notification: &Notification, history: &mut ProbeHistory) {
    match notification {
        Notification::PingResult { latency_ms } => {
            history.record(ProbeResult::reachable(*latency_ms, Local::now()));
            tracing::info!("ping ok: {latency_ms:.1} ms");
        }
        Notification::PingFailed { elapsed } => {
            history.record(ProbeResult::unreachable(Local::now()));
            tracing::warn!(
                "ping failed: {:.1}s since last success",
                elapsed.as_secs_f64()
            );
        }
        Notification::PingStatus {
            kind: StatusKind::Poor,
            ..
        } => tracing::warn!("connection status: poor"),
        Notification::PingStatus { .. } => tracing::debug!("connection status: good"),
        Notification::AlarmRing { name, hour, minute } => {
            tracing::info!("ALARM {hour:02}:{minute:02} {name}");
        }
    }
}

fn run_probe(store: &ConfigStore, args: ProbeArgs) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be greater than zero");
    }
    let mut settings = store.load();
    apply_target(&mut settings, &args.target)?;
    let config = settings.monitor_config();
    let history = run_probes(&SystemProber::new(), &config, args.count);

    let mut out = io::stdout().lock();
    for result in history.iter() {
        let stamp = result.timestamp.format("%H:%M:%S");
        match result.latency_ms {
            Some(latency) if result.success => {
                writeln!(out, "[{stamp}] {} reachable: {latency:.1} ms", config.host)?
            }
            _ => writeln!(out, "[{stamp}] {} unreachable", config.host)?,
        }
    }
    write_probe_summary(&mut out, &history)
}

fn alarm_from_target(target: &AlarmTarget) -> Result<Alarm> {
    let (hour, minute) = parse_time(&target.time)?;
    Ok(Alarm::new(u32::from(hour), u32::from(minute), target.name.clone())?)
}

fn run_alarm_command(store: &ConfigStore, command: AlarmCommand) -> Result<()> {
    if let AlarmCommand::List { hour12 } = command {
        let schedule = build_schedule(&store.load())?;
        let mode = if hour12 {
            TimeDisplayMode::Hour12
        } else {
            TimeDisplayMode::Hour24
        };
        return write_schedule(&mut io::stdout().lock(), &schedule, mode);
    }

    let mut settings = store
        .load_for_update()
        .context("refusing to rewrite settings that failed to load")?;
    let mut schedule = build_schedule(&settings)?;
    let now = Local::now();

    match command {
        AlarmCommand::List { .. } => return Ok(()),
        AlarmCommand::Add { target, disabled } => {
            let alarm = alarm_from_target(&target)?.with_enabled(!disabled);
            schedule.add(alarm.clone(), now)?;
            println!("Added {alarm}");
        }
        AlarmCommand::Remove(target) => {
            let alarm = alarm_from_target(&target)?;
            let removed = schedule.remove(&HashSet::from([alarm.clone()]), now);
            if removed == 0 {
                return Err(not_found(&alarm).into());
            }
            println!("Removed {alarm}");
        }
        AlarmCommand::Enable(target) => {
            let alarm = alarm_from_target(&target)?;
            schedule.set_enabled(&alarm, true, now)?;
            println!("Enabled {alarm}");
        }
        AlarmCommand::Disable(target) => {
            let alarm = alarm_from_target(&target)?;
            schedule.set_enabled(&alarm, false, now)?;
            println!("Disabled {}", alarm.with_enabled(false));
        }
    }

    settings.store_schedule(&schedule);
    store.save(&settings)
}

fn not_found(alarm: &Alarm) -> AlarmError {
    AlarmError::NotFound {
        hour: alarm.hour(),
        minute: alarm.minute(),
        name: alarm.name().to_string(),
    }
}
