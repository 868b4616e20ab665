use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Timelike};

use crate::alarm::model::Alarm;
use crate::alarm::schedule::AlarmSchedule;
use crate::clock::Clock;
use crate::error::MonitorError;
use crate::notify::{Notification, NotificationSink};
use crate::sound::{SoundKind, SoundPlayer};
use crate::worker::{MonitorState, Worker};

pub const ALARM_TICK: Duration = Duration::from_secs(1);

/// The schedule as shared between the editor (sole writer of the alarm set)
/// and the alarm monitor (reads `due`, writes only the trigger memory).
pub type SharedSchedule = Arc<Mutex<AlarmSchedule>>;

/// One pass of the due check. Runs on the monitor thread, or directly in
/// tests with a manual clock.
pub struct AlarmTicker {
    schedule: SharedSchedule,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    sound: Arc<dyn SoundPlayer>,
    last_midnight_reset: Option<NaiveDate>,
}

impl AlarmTicker {
    pub fn new(
        schedule: SharedSchedule,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        sound: Arc<dyn SoundPlayer>,
    ) -> Self {
        Self {
            schedule,
            clock,
            sink,
            sound,
            last_midnight_reset: None,
        }
    }

    /// Rings every alarm due at the current minute and returns them.
    pub fn tick(&mut self) -> Vec<Alarm> {
        let now = self.clock.now();
        let today = now.date_naive();
        let due = {
            let mut schedule = self
                .schedule
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if now.hour() == 0 && now.minute() == 0 && self.last_midnight_reset != Some(today) {
                schedule.clear_triggers();
                self.last_midnight_reset = Some(today);
                tracing::info!(%today, "cleared daily alarm triggers");
            }

            let due = schedule.due(now);
            for alarm in &due {
                schedule.mark_fired(alarm, now);
            }
            due
        };

        for alarm in &due {
            tracing::info!(
                name = alarm.name(),
                "alarm ringing at {:02}:{:02}",
                alarm.hour(),
                alarm.minute()
            );
            self.sink.notify(Notification::AlarmRing {
                name: alarm.name().to_string(),
                hour: alarm.hour(),
                minute: alarm.minute(),
            });
            self.sound.play(SoundKind::Alarm);
        }
        due
    }
}

/// Background loop that ticks an [`AlarmTicker`] once per `tick_interval`.
pub struct AlarmMonitor {
    ticker: Option<AlarmTicker>,
    tick_interval: Duration,
    worker: Worker,
}

impl AlarmMonitor {
    pub fn new(ticker: AlarmTicker) -> Self {
        Self::with_tick_interval(ticker, ALARM_TICK)
    }

    pub fn with_tick_interval(ticker: AlarmTicker, tick_interval: Duration) -> Self {
        Self {
            ticker: Some(ticker),
            tick_interval,
            worker: Worker::new("alarm"),
        }
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.worker.ensure_idle()?;
        let Some(mut ticker) = self.ticker.take() else {
            return Err(MonitorError::AlreadyStarted("alarm"));
        };
        let interval = self.tick_interval;
        self.worker.spawn(move |stop| {
            while !stop.is_stopped() {
                ticker.tick();
                if !stop.sleep(interval) {
                    break;
                }
            }
        })
    }

    /// Blocks until the loop has exited.
    pub fn stop(&mut self) {
        self.worker.stop();
    }

    pub fn state(&self) -> MonitorState {
        self.worker.state()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Local, TimeZone};

    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::RecordingSink;

    #[derive(Default)]
    struct CountingSound {
        alarms: AtomicUsize,
    }

    impl SoundPlayer for CountingSound {
        fn play(&self, kind: SoundKind) {
            if kind == SoundKind::Alarm {
                self.alarms.fetch_add(1, Ordering::Relaxed);
            }
        }

        fn stop(&self) {}
    }

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 1, day, hour, minute, second)
            .single()
            .expect("unambiguous local time")
    }

    fn ticker_with(
        alarms: Vec<Alarm>,
        start: DateTime<Local>,
    ) -> (AlarmTicker, ManualClock, RecordingSink, Arc<CountingSound>) {
        let schedule = AlarmSchedule::with_alarms(alarms, start).expect("valid schedule");
        let clock = ManualClock::new(start);
        let sink = RecordingSink::new();
        let sound = Arc::new(CountingSound::default());
        let ticker = AlarmTicker::new(
            Arc::new(Mutex::new(schedule)),
            Arc::new(clock.clone()),
            Arc::new(sink.clone()),
            sound.clone(),
        );
        (ticker, clock, sink, sound)
    }

    #[test]
    fn rings_once_within_matching_minute() {
        let morning = Alarm::new(9, 0, "Morning").expect("valid");
        let (mut ticker, clock, sink, sound) = ticker_with(vec![morning], at(15, 8, 59, 59));

        assert!(ticker.tick().is_empty());

        clock.set(at(15, 9, 0, 0));
        assert_eq!(ticker.tick().len(), 1);
        clock.set(at(15, 9, 0, 30));
        assert!(ticker.tick().is_empty());
        clock.set(at(15, 9, 1, 0));
        assert!(ticker.tick().is_empty());

        assert_eq!(
            sink.take(),
            vec![Notification::AlarmRing {
                name: "Morning".to_string(),
                hour: 9,
                minute: 0,
            }]
        );
        assert_eq!(sound.alarms.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn midnight_clear_happens_once_per_day() {
        let midnight = Alarm::new(0, 0, "Midnight").expect("valid");
        let (mut ticker, clock, sink, _sound) = ticker_with(vec![midnight], at(14, 23, 59, 0));

        clock.set(at(15, 0, 0, 0));
        assert_eq!(ticker.tick().len(), 1);
        // Later ticks in the same midnight minute must not clear again.
        clock.set(at(15, 0, 0, 1));
        assert!(ticker.tick().is_empty());
        clock.set(at(15, 0, 0, 59));
        assert!(ticker.tick().is_empty());

        clock.set(at(16, 0, 0, 0));
        assert_eq!(ticker.tick().len(), 1);
        assert_eq!(sink.take().len(), 2);
    }

    #[test]
    fn alarms_sharing_a_minute_ring_together() {
        let (mut ticker, clock, sink, _sound) = ticker_with(
            vec![
                Alarm::new(7, 30, "Wake").expect("valid"),
                Alarm::new(7, 30, "Meds").expect("valid"),
                Alarm::new(7, 30, "Off").expect("valid").with_enabled(false),
            ],
            at(15, 7, 0, 0),
        );
        clock.set(at(15, 7, 30, 10));
        let rung = ticker.tick();
        assert_eq!(rung.len(), 2);
        assert_eq!(sink.take().len(), 2);
    }

    #[test]
    fn threaded_monitor_rings_and_stops() {
        let morning = Alarm::new(9, 0, "Morning").expect("valid");
        let (ticker, _clock, sink, _sound) = ticker_with(vec![morning], at(15, 9, 0, 0));
        let mut monitor = AlarmMonitor::with_tick_interval(ticker, Duration::from_millis(10));
        assert_eq!(monitor.state(), MonitorState::Idle);

        monitor.start().expect("start");
        assert_eq!(monitor.state(), MonitorState::Running);
        std::thread::sleep(Duration::from_millis(80));
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);

        assert_eq!(sink.take().len(), 1);
        assert!(matches!(monitor.start(), Err(MonitorError::Stopped("alarm"))));
    }
}
