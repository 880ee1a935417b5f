//! Module for time measurement and blocking waits.

use std::{
    thread,
    time::{Duration, Instant},
};

pub struct OsalTimer {
    stop_time: Instant,
}

impl OsalTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stop_time: Instant::now() + timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.stop_time
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.stop_time.saturating_duration_since(Instant::now())
    }
}

/// Sleep the calling thread, never past the timer's stop time.
pub fn usleep(timer: &OsalTimer, interval: Duration) {
    let sleep = interval.min(timer.remaining());
    if !sleep.is_zero() {
        thread::sleep(sleep);
    }
}
