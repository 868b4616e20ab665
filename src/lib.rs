//! Headless alarm scheduling and host reachability monitoring.
//!
//! [`alarm::monitor::AlarmMonitor`] rings recurring daily alarms from a
//! shared [`alarm::schedule::AlarmSchedule`]; [`ping::monitor::PingMonitor`]
//! probes a host on a fixed interval and reports connection quality. Both
//! publish [`notify::Notification`]s to a caller-supplied sink.

pub mod alarm;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod notify;
pub mod ping;
pub mod sound;
pub mod worker;
