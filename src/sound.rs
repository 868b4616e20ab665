use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SoundKind {
    Alarm,
    Error,
}

/// Playback capability. Implementations own looping and device handling.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, kind: SoundKind);
    fn stop(&self);
}

/// Plays nothing.
#[derive(Debug, Default)]
pub struct SilentSound;

impl SoundPlayer for SilentSound {
    fn play(&self, _kind: SoundKind) {}

    fn stop(&self) {}
}

/// Writes playback requests to the log instead of an audio device.
#[derive(Debug, Default)]
pub struct LogSound {
    ringing: AtomicBool,
}

impl LogSound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing.load(Ordering::Relaxed)
    }
}

impl SoundPlayer for LogSound {
    fn play(&self, kind: SoundKind) {
        match kind {
            SoundKind::Alarm => {
                // A new ring replaces one still playing.
                if self.ringing.swap(true, Ordering::Relaxed) {
                    tracing::debug!("restarting alarm sound");
                }
                tracing::info!("alarm sound playing");
            }
            SoundKind::Error => tracing::warn!("error sound"),
        }
    }

    fn stop(&self) {
        if self.ringing.swap(false, Ordering::Relaxed) {
            tracing::info!("alarm sound stopped");
        }
    }
}
