use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::poll::{PollKind, PollSnapshot, TallyView, VoteTally};
use crate::replication::FailedWrite;
use crate::session::{SessionId, SessionStatus, UserId};
use crate::timer::{PomodoroSnapshot, TimerConfig};

/// Every state change of the coordinator produces an Event.
/// The UI drains them after each call and renders what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: SessionId,
        members: Vec<UserId>,
        at: DateTime<Utc>,
    },
    PollOpened {
        kind: PollKind,
        options: Vec<String>,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    VoteChanged {
        kind: PollKind,
        voter: UserId,
        option: String,
        selected: bool,
        at: DateTime<Utc>,
    },
    OptionAdded {
        kind: PollKind,
        label: String,
        at: DateTime<Utc>,
    },
    /// Local only: the poll switched between its voting and results view.
    PollViewChanged {
        kind: PollKind,
        view: TallyView,
        at: DateTime<Utc>,
    },
    PollResolved {
        kind: PollKind,
        winner: String,
        tally: VoteTally,
        at: DateTime<Utc>,
    },
    LocationSelected {
        location: String,
        at: DateTime<Utc>,
    },
    StudyStarted {
        round: u32,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    BreakStarted {
        round: u32,
        activity: String,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerConfigChanged {
        config: TimerConfig,
        at: DateTime<Utc>,
    },
    MessageAppended {
        author: UserId,
        text: String,
        at: DateTime<Utc>,
    },
    MemberLeft {
        member: UserId,
        remaining: Vec<UserId>,
        at: DateTime<Utc>,
    },
    SessionEnded {
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    /// Some members did not receive the latest copy; they are queued for retry.
    ReplicationFailed {
        session_id: SessionId,
        failed: Vec<FailedWrite>,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        status: SessionStatus,
        pomodoro: Option<PomodoroSnapshot>,
        poll: Option<PollSnapshot>,
        at: DateTime<Utc>,
    },
}
