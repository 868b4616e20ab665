use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};

/// Source of wall-clock time for the monitors.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Local>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let start = Local
            .with_ymd_and_hms(2026, 1, 15, 8, 59, 59)
            .single()
            .expect("valid");
        let clock = ManualClock::new(start);
        let observer = clock.clone();
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(observer.now(), start + chrono::Duration::seconds(1));

        clock.set(start);
        assert_eq!(observer.now(), start);
    }
}
