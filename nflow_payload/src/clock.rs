//! Wall-clock sources for header construction.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time, expressed as the offset from the Unix epoch.
pub trait Clock {
    /// The current wall-clock time
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
/// A clock that reads the operating system's real time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}
