use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::MonitorError;
use crate::notify::{Notification, NotificationSink, StatusKind};
use crate::ping::prober::{HostProber, ProbeResult};
use crate::sound::{SoundKind, SoundPlayer};
use crate::worker::{MonitorState, Worker};

pub const DEFAULT_MAX_ERRORS_BEFORE_ALERT: u32 = 3;

/// Immutable settings for one monitor run. Changing any of them means
/// building a new [`PingMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub host: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_errors_before_alert: u32,
    /// Re-send the poor-connection status on every failing probe past the
    /// threshold instead of only when the threshold is crossed.
    pub repeat_poor_alert: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: "8.8.8.8".to_string(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            max_errors_before_alert: DEFAULT_MAX_ERRORS_BEFORE_ALERT,
            repeat_poor_alert: false,
        }
    }
}

/// Consecutive-failure bookkeeping, independent of threads and sockets.
#[derive(Debug, Clone)]
pub struct PingTracker {
    consecutive_errors: u32,
    last_success: DateTime<Local>,
    max_errors_before_alert: u32,
    repeat_poor_alert: bool,
}

impl PingTracker {
    pub fn new(config: &MonitorConfig, started: DateTime<Local>) -> Self {
        Self {
            consecutive_errors: 0,
            last_success: started,
            max_errors_before_alert: config.max_errors_before_alert.max(1),
            repeat_poor_alert: config.repeat_poor_alert,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn last_success(&self) -> DateTime<Local> {
        self.last_success
    }

    /// Folds one probe outcome into the state and returns what to publish.
    pub fn record(&mut self, result: &ProbeResult) -> Vec<Notification> {
        if let (true, Some(latency_ms)) = (result.success, result.latency_ms) {
            self.consecutive_errors = 0;
            self.last_success = result.timestamp;
            return vec![
                Notification::PingResult { latency_ms },
                Notification::PingStatus {
                    success: true,
                    kind: StatusKind::Good,
                },
            ];
        }

        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let elapsed = (result.timestamp - self.last_success)
            .to_std()
            .unwrap_or_default();
        let mut events = vec![Notification::PingFailed { elapsed }];

        let crossed = self.consecutive_errors == self.max_errors_before_alert;
        let beyond = self.consecutive_errors > self.max_errors_before_alert;
        if crossed || (beyond && self.repeat_poor_alert) {
            events.push(Notification::PingStatus {
                success: false,
                kind: StatusKind::Poor,
            });
        }
        events
    }
}

/// One probe-and-publish step of the ping loop.
pub struct PingLoop {
    config: MonitorConfig,
    prober: Arc<dyn HostProber>,
    tracker: PingTracker,
    sink: Arc<dyn NotificationSink>,
    sound: Arc<dyn SoundPlayer>,
}

impl PingLoop {
    pub fn new(
        config: MonitorConfig,
        prober: Arc<dyn HostProber>,
        sink: Arc<dyn NotificationSink>,
        sound: Arc<dyn SoundPlayer>,
    ) -> Self {
        let tracker = PingTracker::new(&config, Local::now());
        Self {
            config,
            prober,
            tracker,
            sink,
            sound,
        }
    }

    pub fn tracker(&self) -> &PingTracker {
        &self.tracker
    }

    pub fn step(&mut self) -> ProbeResult {
        let result = self.prober.probe(&self.config.host, self.config.timeout);
        let events = self.tracker.record(&result);

        match result.latency_ms {
            Some(latency_ms) if result.success => {
                tracing::debug!(host = %self.config.host, latency_ms, "ping ok");
            }
            _ => tracing::debug!(
                host = %self.config.host,
                consecutive = self.tracker.consecutive_errors(),
                "ping failed"
            ),
        }

        for event in events {
            if matches!(
                event,
                Notification::PingStatus {
                    kind: StatusKind::Poor,
                    ..
                }
            ) {
                tracing::warn!(
                    host = %self.config.host,
                    consecutive = self.tracker.consecutive_errors(),
                    "poor connection"
                );
                self.sound.play(SoundKind::Error);
            }
            self.sink.notify(event);
        }
        result
    }
}

/// Repeatedly probes the configured host on a background thread.
pub struct PingMonitor {
    ping_loop: Option<PingLoop>,
    interval: Duration,
    worker: Worker,
}

impl PingMonitor {
    pub fn new(
        config: MonitorConfig,
        prober: Arc<dyn HostProber>,
        sink: Arc<dyn NotificationSink>,
        sound: Arc<dyn SoundPlayer>,
    ) -> Self {
        let interval = config.interval;
        Self {
            ping_loop: Some(PingLoop::new(config, prober, sink, sound)),
            interval,
            worker: Worker::new("ping"),
        }
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.worker.ensure_idle()?;
        let Some(mut ping_loop) = self.ping_loop.take() else {
            return Err(MonitorError::AlreadyStarted("ping"));
        };
        let interval = self.interval;
        self.worker.spawn(move |stop| {
            while !stop.is_stopped() {
                ping_loop.step();
                if !stop.sleep(interval) {
                    break;
                }
            }
        })
    }

    /// Blocks until the loop has exited. The monitor cannot be restarted.
    pub fn stop(&mut self) {
        self.worker.stop();
    }

    pub fn state(&self) -> MonitorState {
        self.worker.state()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::notify::RecordingSink;

    /// Replays a fixed sequence of outcomes, then keeps failing.
    struct ScriptedProber {
        outcomes: Mutex<VecDeque<Option<f64>>>,
        start: DateTime<Local>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(outcomes: &[Option<f64>], start: DateTime<Local>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                start,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl HostProber for ScriptedProber {
        fn probe(&self, _host: &str, _timeout: Duration) -> ProbeResult {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) as i64;
            let timestamp = self.start + chrono::Duration::seconds(call + 1);
            let next = self
                .outcomes
                .lock()
                .expect("lock")
                .pop_front()
                .flatten();
            match next {
                Some(latency) => ProbeResult::reachable(latency, timestamp),
                None => ProbeResult::unreachable(timestamp),
            }
        }
    }

    #[derive(Default)]
    struct CountingSound {
        errors: AtomicUsize,
    }

    impl SoundPlayer for CountingSound {
        fn play(&self, kind: SoundKind) {
            if kind == SoundKind::Error {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        fn stop(&self) {}
    }

    fn start_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 1, 15, 12, 0, 0)
            .single()
            .expect("valid")
    }

    fn poor_count(events: &[Notification]) -> usize {
        events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    Notification::PingStatus {
                        kind: StatusKind::Poor,
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn success_resets_errors_and_reports_latency() {
        let start = start_time();
        let mut tracker = PingTracker::new(&MonitorConfig::default(), start);
        tracker.record(&ProbeResult::unreachable(start));
        assert_eq!(tracker.consecutive_errors(), 1);

        let later = start + chrono::Duration::seconds(5);
        let events = tracker.record(&ProbeResult::reachable(14.2, later));
        assert_eq!(tracker.consecutive_errors(), 0);
        assert_eq!(tracker.last_success(), later);
        assert_eq!(
            events,
            vec![
                Notification::PingResult { latency_ms: 14.2 },
                Notification::PingStatus {
                    success: true,
                    kind: StatusKind::Good,
                },
            ]
        );
    }

    #[test]
    fn failure_reports_time_since_last_success() {
        let start = start_time();
        let mut tracker = PingTracker::new(&MonitorConfig::default(), start);
        let events = tracker.record(&ProbeResult::unreachable(
            start + chrono::Duration::milliseconds(2_500),
        ));
        assert_eq!(
            events,
            vec![Notification::PingFailed {
                elapsed: Duration::from_millis(2_500),
            }]
        );
    }

    #[test]
    fn poor_status_fires_once_per_threshold_crossing() {
        let start = start_time();
        let mut tracker = PingTracker::new(&MonitorConfig::default(), start);
        let failure = ProbeResult::unreachable(start);

        let mut poor_after = Vec::new();
        for _ in 0..6 {
            poor_after.push(poor_count(&tracker.record(&failure)));
        }
        assert_eq!(poor_after, vec![0, 0, 1, 0, 0, 0]);

        tracker.record(&ProbeResult::reachable(10.0, start));
        let again: usize = (0..3)
            .map(|_| poor_count(&tracker.record(&failure)))
            .sum();
        assert_eq!(again, 1);
    }

    #[test]
    fn repeat_policy_alerts_every_tick_past_threshold() {
        let start = start_time();
        let config = MonitorConfig {
            repeat_poor_alert: true,
            ..MonitorConfig::default()
        };
        let mut tracker = PingTracker::new(&config, start);
        let failure = ProbeResult::unreachable(start);
        let counts = (0..5)
            .map(|_| poor_count(&tracker.record(&failure)))
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn loop_step_publishes_and_plays_error_sound() {
        let start = start_time();
        let prober = Arc::new(ScriptedProber::new(
            &[Some(9.5), None, None, None, None],
            start,
        ));
        let sink = RecordingSink::new();
        let sound = Arc::new(CountingSound::default());
        let mut ping_loop = PingLoop::new(
            MonitorConfig::default(),
            prober,
            Arc::new(sink.clone()),
            sound.clone(),
        );

        let first = ping_loop.step();
        assert!(first.success);
        for _ in 0..4 {
            assert!(!ping_loop.step().success);
        }

        let events = sink.take();
        assert_eq!(events[0], Notification::PingResult { latency_ms: 9.5 });
        assert_eq!(poor_count(&events), 1);
        assert_eq!(sound.errors.load(Ordering::Relaxed), 1);
        assert_eq!(ping_loop.tracker().consecutive_errors(), 4);
    }

    #[test]
    fn threaded_monitor_probes_until_stopped() {
        let prober = Arc::new(ScriptedProber::new(&[Some(1.0); 64], start_time()));
        let sink = RecordingSink::new();
        let config = MonitorConfig {
            interval: Duration::from_millis(10),
            ..MonitorConfig::default()
        };
        let mut monitor = PingMonitor::new(
            config,
            prober.clone(),
            Arc::new(sink.clone()),
            Arc::new(CountingSound::default()),
        );
        assert_eq!(monitor.state(), MonitorState::Idle);
        monitor.start().expect("start");
        std::thread::sleep(Duration::from_millis(60));
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);

        let probes = prober.calls.load(Ordering::Relaxed);
        assert!(probes >= 1);
        // Two notifications per successful probe, none after stop returned.
        assert_eq!(sink.len(), probes * 2);
        assert!(matches!(monitor.start(), Err(MonitorError::Stopped("ping"))));
    }
}
