//! Tick-driven countdown.
//!
//! A `Countdown` owns no thread and no platform timer. The caller delivers
//! one `tick()` per elapsed second; the countdown reports expiry exactly once.
//! Both the poll timers and the pomodoro timer are built from it.

use serde::{Deserialize, Serialize};

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    /// Not running, or already expired.
    Idle,
    /// One second consumed, time remains.
    Running { remaining_secs: u64 },
    /// Remaining time just reached zero.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    total_secs: u64,
    remaining_secs: u64,
    running: bool,
    expired: bool,
}

impl Countdown {
    /// A stopped countdown loaded with `total_secs`.
    pub fn new(total_secs: u64) -> Self {
        Self {
            total_secs,
            remaining_secs: total_secs,
            running: false,
            expired: false,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Start (or resume) counting. Returns `false` if nothing changed.
    pub fn start(&mut self) -> bool {
        if self.running || self.expired {
            return false;
        }
        self.running = true;
        true
    }

    /// Stop counting, keeping the remaining time. Returns `false` if nothing changed.
    pub fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    /// Stop counting for good; later ticks are ignored until `restart`.
    pub fn cancel(&mut self) {
        self.running = false;
    }

    /// Load a new duration and stop.
    pub fn restart(&mut self, total_secs: u64) {
        *self = Self::new(total_secs);
    }

    /// Restore the full duration and stop.
    pub fn rewind(&mut self) {
        self.remaining_secs = self.total_secs;
        self.running = false;
        self.expired = false;
    }

    pub fn tick(&mut self) -> CountdownTick {
        if !self.running || self.expired {
            return CountdownTick::Idle;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.running = false;
            self.expired = true;
            return CountdownTick::Expired;
        }
        CountdownTick::Running {
            remaining_secs: self.remaining_secs,
        }
    }
}
