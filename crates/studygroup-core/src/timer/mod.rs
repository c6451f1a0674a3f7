mod countdown;
mod pomodoro;

pub use countdown::{Countdown, CountdownTick};
pub use pomodoro::{
    DurationBounds, PhaseEnd, PomodoroPhase, PomodoroSnapshot, PomodoroTimer, TimerConfig,
};
