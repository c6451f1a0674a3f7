//! # Studygroup Core Library
//!
//! Core logic for coordinating collaborative study sessions: a group agrees
//! on a location by vote, studies on a shared pomodoro timer, votes on a
//! break activity, and either starts the next round or ends the session.
//! The `studygroup` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timers**: Tick-driven countdowns. Nothing here spawns a thread; the
//!   caller invokes `tick()` once per second.
//! - **Polls**: Multi-select vote tallies with a closing countdown and a
//!   random tie-break.
//! - **Replication**: Every member keeps a copy of the session in their own
//!   user record. Changes are fanned out per member, with a retry queue for
//!   copies that failed to land.
//! - **Storage**: SQLite-backed user records and TOML configuration.
//!
//! ## Key Components
//!
//! - [`SessionCoordinator`]: Session state machine, one per user per device
//! - [`PomodoroTimer`]: Study/break timer
//! - [`PollTimer`]: Fixed-duration poll
//! - [`RecordStore`]: User record persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod poll;
pub mod replication;
pub mod session;
pub mod storage;
pub mod timer;

pub use error::{ConfigError, SessionError, StoreError};
pub use events::Event;
pub use poll::{PollKind, PollOutcome, PollPhase, PollTimer, TallyView, VoteTally};
pub use replication::{PropagationReport, Propagator, RetryQueue, StorePropagator};
pub use session::{
    LocalState, Session, SessionCoordinator, SessionId, SessionPhase, SessionSettings,
    SessionStatus, UserId,
};
pub use storage::{Config, MemoryRecordStore, RecordStore, SqliteRecordStore, UserRecord};
pub use timer::{DurationBounds, PhaseEnd, PomodoroPhase, PomodoroTimer, TimerConfig};
