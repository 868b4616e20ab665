use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::MonitorError;

const STOP_POLL: Duration = Duration::from_millis(50);

/// Lifecycle of a background monitor. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

/// Cooperative cancellation flag handed to a monitor loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration` unless stopped first. Returns `false` when the
    /// loop should exit.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(STOP_POLL));
        }
    }

    fn raise(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// One background thread with blocking, join-on-stop semantics.
pub(crate) struct Worker {
    name: &'static str,
    state: MonitorState,
    stop: StopSignal,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: MonitorState::Idle,
            stop: StopSignal::default(),
            join: None,
        }
    }

    pub(crate) fn state(&self) -> MonitorState {
        self.state
    }

    /// Fails unless the worker has never been started.
    pub(crate) fn ensure_idle(&self) -> Result<(), MonitorError> {
        match self.state {
            MonitorState::Idle => Ok(()),
            MonitorState::Running => Err(MonitorError::AlreadyStarted(self.name)),
            MonitorState::Stopped => Err(MonitorError::Stopped(self.name)),
        }
    }

    pub(crate) fn spawn<F>(&mut self, body: F) -> Result<(), MonitorError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        self.ensure_idle()?;
        let stop = self.stop.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-monitor", self.name))
            .spawn(move || body(stop));
        self.adopt(spawned)
    }

    /// A failed spawn consumed the loop body, so the worker is finished.
    fn adopt(&mut self, spawned: io::Result<JoinHandle<()>>) -> Result<(), MonitorError> {
        match spawned {
            Ok(join) => {
                self.join = Some(join);
                self.state = MonitorState::Running;
                tracing::info!(monitor = self.name, "monitor started");
                Ok(())
            }
            Err(source) => {
                self.state = MonitorState::Stopped;
                tracing::error!(monitor = self.name, "failed to spawn monitor thread: {source}");
                Err(MonitorError::Spawn {
                    name: self.name,
                    source,
                })
            }
        }
    }

    /// Signals the loop and waits for it to exit.
    pub(crate) fn stop(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.stop.raise();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!(monitor = self.name, "monitor thread panicked");
        }
        self.state = MonitorState::Stopped;
        tracing::info!(monitor = self.name, "monitor stopped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn stop_joins_running_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&iterations);
        let mut worker = Worker::new("test");
        worker
            .spawn(move |stop| {
                while !stop.is_stopped() {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if !stop.sleep(Duration::from_millis(5)) {
                        break;
                    }
                }
            })
            .expect("spawn");
        assert_eq!(worker.state(), MonitorState::Running);

        thread::sleep(Duration::from_millis(30));
        worker.stop();
        assert_eq!(worker.state(), MonitorState::Stopped);
        let seen = iterations.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(iterations.load(Ordering::Relaxed), seen);
        assert!(seen > 0);
    }

    #[test]
    fn stopped_worker_cannot_restart() {
        let mut worker = Worker::new("test");
        worker.stop();
        let err = worker.spawn(|_| {}).expect_err("restart should fail");
        assert!(matches!(err, MonitorError::Stopped("test")));
    }

    #[test]
    fn running_worker_rejects_second_spawn() {
        let mut worker = Worker::new("test");
        worker
            .spawn(|stop| while stop.sleep(Duration::from_millis(5)) {})
            .expect("spawn");
        let err = worker.spawn(|_| {}).expect_err("second spawn should fail");
        assert!(matches!(err, MonitorError::AlreadyStarted("test")));
        worker.stop();
    }

    #[test]
    fn failed_spawn_leaves_worker_stopped() {
        let mut worker = Worker::new("test");
        let err = worker
            .adopt(Err(io::Error::other("thread limit reached")))
            .expect_err("spawn failure is reported");
        assert!(matches!(err, MonitorError::Spawn { name: "test", .. }));
        assert_eq!(worker.state(), MonitorState::Stopped);

        let err = worker.spawn(|_| {}).expect_err("retry should fail");
        assert!(matches!(err, MonitorError::Stopped("test")));
    }

    #[test]
    fn long_sleep_returns_early_on_stop() {
        let signal = StopSignal::default();
        let sleeper = signal.clone();
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let completed = sleeper.sleep(Duration::from_secs(30));
            (completed, started.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        signal.raise();
        let (completed, elapsed) = handle.join().expect("join");
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }
}
