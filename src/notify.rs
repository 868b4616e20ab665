use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Connection quality reported alongside ping outcomes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusKind {
    Good,
    Poor,
}

/// Events the monitors publish for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PingResult { latency_ms: f64 },
    /// A probe failed; `elapsed` is the time since the last successful probe.
    PingFailed { elapsed: Duration },
    PingStatus { success: bool, kind: StatusKind },
    AlarmRing { name: String, hour: u8, minute: u8 },
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for Sender<Notification> {
    fn notify(&self, notification: Notification) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.send(notification);
    }
}

/// Collects notifications in memory. Clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
