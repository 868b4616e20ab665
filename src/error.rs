use thiserror::Error;

/// Errors raised synchronously by alarm construction and schedule edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    #[error("invalid alarm time {hour:02}:{minute:02} (hour 0-23, minute 0-59)")]
    InvalidTime { hour: u32, minute: u32 },

    #[error("alarm '{name}' at {hour:02}:{minute:02} already exists")]
    Duplicate { hour: u8, minute: u8, name: String },

    #[error("no alarm '{name}' at {hour:02}:{minute:02}")]
    NotFound { hour: u8, minute: u8, name: String },

    #[error("invalid time format '{0}', expected HH:MM")]
    InvalidFormat(String),
}

pub type AlarmResult<T> = std::result::Result<T, AlarmError>;

/// Lifecycle errors for the background monitors.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{0} monitor was already started")]
    AlreadyStarted(&'static str),

    #[error("{0} monitor has stopped and cannot be restarted")]
    Stopped(&'static str),

    #[error("failed to spawn {name} monitor thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
