use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::poll::VoteTally;
use crate::timer::TimerConfig;

/// Unique identifier for a user.
pub type UserId = String;

/// Opaque session identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Life cycle of a session as every member sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Proposed,
    LocationVoting,
    Studying,
    BreakVoting,
    OnBreak,
    Ended,
}

/// A chat line attached to a session. Rendering is someone else's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: UserId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// One collaborative study meeting. Every member keeps an identical copy
/// of this record inside their own user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub initiator: UserId,
    pub members: Vec<UserId>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Empty until the location poll resolves.
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub chat_log: Vec<ChatMessage>,
    pub timer_config: TimerConfig,
    pub active: bool,
    pub phase: SessionPhase,
    #[serde(default)]
    pub break_activity: Option<String>,
    #[serde(default)]
    pub location_poll: Option<VoteTally>,
    #[serde(default)]
    pub break_poll: Option<VoteTally>,
    #[serde(default)]
    pub rounds_completed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        initiator: impl Into<UserId>,
        members: Vec<UserId>,
        date: NaiveDate,
        time: NaiveTime,
        timer_config: TimerConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: SessionId::generate(),
            initiator: initiator.into(),
            members,
            date,
            time,
            location: String::new(),
            chat_log: Vec::new(),
            timer_config,
            active: true,
            phase: SessionPhase::Proposed,
            break_activity: None,
            location_poll: None,
            break_poll: None,
            rounds_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn has_location(&self) -> bool {
        !self.location.is_empty()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mark the session as finished. Terminal.
    pub fn close(&mut self) {
        self.active = false;
        self.phase = SessionPhase::Ended;
        self.touch();
    }
}

/// Run-state a device derives from its copy of the session plus its local
/// timers. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub is_active: bool,
    pub phase: Option<SessionPhase>,
    pub session_id: Option<SessionId>,
    pub selected_location: String,
    pub location_poll_active: bool,
    pub location_poll_time_left: u64,
    pub pomodoro_active: bool,
    pub break_active: bool,
    pub is_ending: bool,
    pub timer: TimerConfig,
}

impl SessionStatus {
    /// The value shown when no session is running.
    pub fn idle() -> Self {
        Self {
            is_active: false,
            phase: None,
            session_id: None,
            selected_location: String::new(),
            location_poll_active: false,
            location_poll_time_left: 0,
            pomodoro_active: false,
            break_active: false,
            is_ending: false,
            timer: TimerConfig::default(),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "u1",
            vec!["u1".into(), "u2".into()],
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            TimerConfig::default(),
        )
    }

    #[test]
    fn new_session_is_active_without_location() {
        let s = session();
        assert!(s.active);
        assert_eq!(s.location, "");
        assert_eq!(s.phase, SessionPhase::Proposed);
        assert!(s.is_member("u2"));
        assert!(!s.is_member("u3"));
    }

    #[test]
    fn close_is_terminal_state() {
        let mut s = session();
        s.close();
        assert!(!s.active);
        assert_eq!(s.phase, SessionPhase::Ended);
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(session().session_id, session().session_id);
    }

    #[test]
    fn session_survives_json_storage() {
        let s = session();
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
