//! Study/break pomodoro timer.
//!
//! Like the countdown it is built on, the pomodoro timer has no internal
//! thread; the session coordinator forwards one `tick()` per second.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Studying -> BreakVoting -> OnBreak -> Ended
//!            ^                          |
//!            +------ next round --------+
//! ```
//!
//! `running` is orthogonal to the phase so that a pause resumes into the
//! same phase. When the study countdown expires the timer parks in
//! `BreakVoting`; the coordinator runs the break-activity poll and calls
//! [`PomodoroTimer::begin_break`] with the winner.

use serde::{Deserialize, Serialize};

use super::countdown::{Countdown, CountdownTick};
use crate::error::SessionError;

/// Durations shared by every member of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    pub study_duration_secs: u64,
    pub break_duration_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            study_duration_secs: 25 * 60,
            break_duration_secs: 5 * 60,
        }
    }
}

/// Inclusive range accepted for study and break durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBounds {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self {
            min_secs: 60,
            max_secs: 3600,
        }
    }
}

impl DurationBounds {
    pub fn check(&self, field: &'static str, secs: u64) -> Result<(), SessionError> {
        if secs < self.min_secs || secs > self.max_secs {
            return Err(SessionError::InvalidDuration {
                field,
                secs,
                min: self.min_secs,
                max: self.max_secs,
            });
        }
        Ok(())
    }

    pub fn validate(&self, config: &TimerConfig) -> Result<(), SessionError> {
        self.check("study_duration_secs", config.study_duration_secs)?;
        self.check("break_duration_secs", config.break_duration_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PomodoroPhase {
    Idle,
    Studying,
    BreakVoting,
    OnBreak,
    Ended,
}

/// Emitted by [`PomodoroTimer::tick`] when a countdown reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseEnd {
    /// Study time is over; the break-activity poll should open.
    StudyFinished { round: u32 },
    /// Break is over. `final_round` means the session is ready to close.
    BreakFinished { round: u32, final_round: bool },
}

/// Point-in-time view of the pomodoro for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PomodoroSnapshot {
    pub phase: PomodoroPhase,
    pub running: bool,
    pub remaining_secs: u64,
    pub total_secs: u64,
    pub round: u32,
    pub rounds: u32,
    pub break_activity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PomodoroTimer {
    config: TimerConfig,
    bounds: DurationBounds,
    rounds: u32,
    round: u32,
    phase: PomodoroPhase,
    countdown: Countdown,
    #[serde(default)]
    break_activity: Option<String>,
}

impl PomodoroTimer {
    /// Create an idle timer. `rounds` below one is treated as one.
    pub fn new(
        config: TimerConfig,
        bounds: DurationBounds,
        rounds: u32,
    ) -> Result<Self, SessionError> {
        bounds.validate(&config)?;
        Ok(Self {
            config,
            bounds,
            rounds: rounds.max(1),
            round: 1,
            phase: PomodoroPhase::Idle,
            countdown: Countdown::new(config.study_duration_secs),
            break_activity: None,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> PomodoroPhase {
        self.phase
    }

    pub fn config(&self) -> TimerConfig {
        self.config
    }

    pub fn bounds(&self) -> DurationBounds {
        self.bounds
    }

    pub fn is_running(&self) -> bool {
        self.countdown.is_running()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.countdown.remaining_secs()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn break_activity(&self) -> Option<&str> {
        self.break_activity.as_deref()
    }

    pub fn snapshot(&self) -> PomodoroSnapshot {
        PomodoroSnapshot {
            phase: self.phase,
            running: self.is_running(),
            remaining_secs: self.countdown.remaining_secs(),
            total_secs: self.countdown.total_secs(),
            round: self.round,
            rounds: self.rounds,
            break_activity: self.break_activity.clone(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Change the durations. The phase in progress keeps its remaining
    /// time; the next phase picks up the new values. Out-of-range values
    /// leave the previous configuration in place.
    pub fn configure(&mut self, study_secs: u64, break_secs: u64) -> Result<(), SessionError> {
        let config = TimerConfig {
            study_duration_secs: study_secs,
            break_duration_secs: break_secs,
        };
        self.bounds.validate(&config)?;
        self.config = config;
        if self.phase == PomodoroPhase::Idle {
            self.countdown.restart(study_secs);
        }
        Ok(())
    }

    /// Begin studying from `Idle`, or set the running flag in an active phase.
    pub fn start(&mut self) -> bool {
        match self.phase {
            PomodoroPhase::Idle => {
                self.phase = PomodoroPhase::Studying;
                self.countdown.restart(self.config.study_duration_secs);
                self.countdown.start()
            }
            PomodoroPhase::Studying | PomodoroPhase::OnBreak => self.countdown.start(),
            PomodoroPhase::BreakVoting | PomodoroPhase::Ended => false,
        }
    }

    pub fn pause(&mut self) -> bool {
        match self.phase {
            PomodoroPhase::Studying | PomodoroPhase::OnBreak => self.countdown.pause(),
            _ => false,
        }
    }

    /// Resume a paused phase. Unlike `start`, never leaves `Idle`.
    pub fn resume(&mut self) -> bool {
        match self.phase {
            PomodoroPhase::Studying | PomodoroPhase::OnBreak => self.countdown.start(),
            _ => false,
        }
    }

    /// Flip the running flag. Returns the new running state.
    pub fn toggle(&mut self) -> bool {
        if self.is_running() {
            self.pause();
        } else {
            self.start();
        }
        self.is_running()
    }

    /// Stop and restore the full duration of the current phase.
    pub fn reset(&mut self) -> bool {
        match self.phase {
            PomodoroPhase::Studying | PomodoroPhase::OnBreak => {
                self.countdown.rewind();
                true
            }
            _ => false,
        }
    }

    /// Leave `BreakVoting` for the break itself.
    pub fn begin_break(&mut self, activity: impl Into<String>) -> bool {
        if self.phase != PomodoroPhase::BreakVoting {
            return false;
        }
        self.phase = PomodoroPhase::OnBreak;
        self.break_activity = Some(activity.into());
        self.countdown.restart(self.config.break_duration_secs);
        self.countdown.start();
        true
    }

    pub fn stop(&mut self) {
        self.countdown.cancel();
        self.phase = PomodoroPhase::Ended;
    }

    /// Put the timer into `phase` with a full countdown, as when a device
    /// reloads a session it has no local timer state for.
    pub fn rehydrate(&mut self, phase: PomodoroPhase, round: u32, break_activity: Option<String>) {
        self.round = round.clamp(1, self.rounds);
        self.break_activity = break_activity;
        self.phase = phase;
        match phase {
            PomodoroPhase::Idle | PomodoroPhase::Studying => {
                self.countdown.restart(self.config.study_duration_secs);
                if phase == PomodoroPhase::Studying {
                    self.countdown.start();
                }
            }
            PomodoroPhase::OnBreak => {
                self.countdown.restart(self.config.break_duration_secs);
                self.countdown.start();
            }
            PomodoroPhase::BreakVoting | PomodoroPhase::Ended => {
                self.countdown.restart(0);
            }
        }
    }

    /// Call once per second. Returns `Some(PhaseEnd)` when a phase finishes.
    pub fn tick(&mut self) -> Option<PhaseEnd> {
        if self.countdown.tick() != CountdownTick::Expired {
            return None;
        }
        match self.phase {
            PomodoroPhase::Studying => {
                self.phase = PomodoroPhase::BreakVoting;
                Some(PhaseEnd::StudyFinished { round: self.round })
            }
            PomodoroPhase::OnBreak => {
                let round = self.round;
                let final_round = round >= self.rounds;
                if final_round {
                    self.phase = PomodoroPhase::Ended;
                } else {
                    self.round += 1;
                    self.break_activity = None;
                    self.phase = PomodoroPhase::Studying;
                    self.countdown.restart(self.config.study_duration_secs);
                    self.countdown.start();
                }
                Some(PhaseEnd::BreakFinished { round, final_round })
            }
            _ => None,
        }
    }
}
