//! Session state machine.
//!
//! One coordinator runs per user per device. It owns the device's copy of
//! the active [`Session`] and the local timers, turns UI actions and ticks
//! into phase transitions, and replicates the session to every member after
//! each change others must see.
//!
//! ```text
//! Proposed -> LocationVoting -> Studying -> BreakVoting -> OnBreak -> Ended
//!                                  ^                          |
//!                                  +------- next round -------+
//! ```
//!
//! Ballots travel inside the session record. Before a poll closes, and
//! before every replicated write, the coordinator re-reads its own record so
//! it resolves from (and writes on top of) everything other members have
//! replicated to it so far. If another device already advanced the session,
//! the coordinator adopts that state instead of deciding again.

use chrono::{NaiveDate, NaiveTime, Utc};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use super::model::{ChatMessage, Session, SessionId, SessionPhase, SessionStatus, UserId};
use crate::error::SessionError;
use crate::events::Event;
use crate::poll::{PollKind, PollOutcome, PollPhase, PollTimer, TallyView, VoteTally};
use crate::replication::{PropagationReport, Propagator, RetryQueue, StorePropagator};
use crate::storage::{Config, RecordStore};
use crate::timer::{DurationBounds, PhaseEnd, PomodoroPhase, PomodoroTimer, TimerConfig};

/// Knobs the coordinator runs with, usually derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub timer: TimerConfig,
    pub bounds: DurationBounds,
    pub rounds: u32,
    pub auto_start_study: bool,
    pub location_poll_secs: u64,
    pub break_poll_secs: u64,
    pub location_options: Vec<String>,
    pub break_activities: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            timer: config.timer_config(),
            bounds: config.duration_bounds(),
            rounds: config.timer.rounds,
            auto_start_study: config.timer.auto_start_study,
            location_poll_secs: config.polls.location_duration_secs,
            break_poll_secs: config.polls.break_duration_secs,
            location_options: config.polls.location_options.clone(),
            break_activities: config.polls.break_activities.clone(),
        }
    }
}

/// Device-local run state, persisted by front-ends that do not stay resident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalState {
    pub session: Option<Session>,
    pub location_poll: PollTimer,
    pub break_poll: PollTimer,
    pub pomodoro: PomodoroTimer,
    #[serde(default)]
    pub retry: RetryQueue,
    #[serde(default = "default_attached")]
    pub attached: bool,
}

fn default_attached() -> bool {
    true
}

/// Ordering of phases within one round.
fn phase_rank(phase: SessionPhase) -> u8 {
    match phase {
        SessionPhase::Proposed => 0,
        SessionPhase::LocationVoting => 1,
        SessionPhase::Studying => 2,
        SessionPhase::BreakVoting => 3,
        SessionPhase::OnBreak => 4,
        SessionPhase::Ended => 5,
    }
}

fn progress(session: &Session) -> (u32, u8) {
    (session.rounds_completed, phase_rank(session.phase))
}

pub struct SessionCoordinator<S, P = StorePropagator<S>> {
    store: S,
    propagator: P,
    user_id: UserId,
    settings: SessionSettings,
    session: Option<Session>,
    location_poll: PollTimer,
    break_poll: PollTimer,
    pomodoro: PomodoroTimer,
    retry: RetryQueue,
    attached: bool,
    events: Vec<Event>,
    rng: Pcg64,
}

impl<S: RecordStore + Clone> SessionCoordinator<S> {
    /// Coordinator that replicates by writing into `store` directly.
    pub fn new(
        store: S,
        user_id: impl Into<UserId>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let propagator = StorePropagator::new(store.clone());
        Self::with_propagator(store, propagator, user_id, settings)
    }
}

impl<S: RecordStore, P: Propagator> SessionCoordinator<S, P> {
    pub fn with_propagator(
        store: S,
        propagator: P,
        user_id: impl Into<UserId>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let pomodoro = PomodoroTimer::new(settings.timer, settings.bounds, settings.rounds)?;
        Ok(Self {
            store,
            propagator,
            user_id: user_id.into(),
            settings,
            session: None,
            location_poll: PollTimer::new(PollKind::Location),
            break_poll: PollTimer::new(PollKind::BreakActivity),
            pomodoro,
            retry: RetryQueue::new(),
            attached: true,
            events: Vec::new(),
            rng: Pcg64::from_entropy(),
        })
    }

    /// Use a fixed seed for tie-breaks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Pcg64::seed_from_u64(seed);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn pomodoro(&self) -> &PomodoroTimer {
        &self.pomodoro
    }

    pub fn location_poll(&self) -> &PollTimer {
        &self.location_poll
    }

    pub fn break_poll(&self) -> &PollTimer {
        &self.break_poll
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Members still waiting for a copy.
    pub fn pending_retries(&self) -> Vec<UserId> {
        self.retry.members()
    }

    /// Take every notification produced since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn status(&self) -> SessionStatus {
        let Some(session) = self.session.as_ref().filter(|s| s.active) else {
            return SessionStatus::idle();
        };
        let location_poll_active = self.location_poll.is_voting();
        let on_break = self.pomodoro.phase() == PomodoroPhase::OnBreak;
        let snapshot = self.pomodoro.snapshot();
        SessionStatus {
            is_active: true,
            phase: Some(session.phase),
            session_id: Some(session.session_id.clone()),
            selected_location: session.location.clone(),
            location_poll_active,
            location_poll_time_left: if location_poll_active {
                self.location_poll.remaining_secs()
            } else {
                0
            },
            pomodoro_active: matches!(
                self.pomodoro.phase(),
                PomodoroPhase::Studying | PomodoroPhase::OnBreak
            ),
            break_active: on_break,
            is_ending: on_break && snapshot.round >= snapshot.rounds,
            timer: session.timer_config,
        }
    }

    /// Full state for the UI: session status, pomodoro and the open poll.
    pub fn snapshot(&self) -> Event {
        let status = self.status();
        let pomodoro = status.is_active.then(|| self.pomodoro.snapshot());
        let poll = match status.phase {
            Some(SessionPhase::LocationVoting) => Some(self.location_poll.snapshot()),
            Some(SessionPhase::BreakVoting) => Some(self.break_poll.snapshot()),
            _ => None,
        };
        Event::StateSnapshot {
            status,
            pomodoro,
            poll,
            at: Utc::now(),
        }
    }

    /// Every session stored in this user's record, newest first.
    pub fn history(&self) -> Result<Vec<Session>, SessionError> {
        let mut sessions = self.store.get_user(&self.user_id)?.study_sessions;
        // Records keep insertion order; reverse first so equal timestamps stay newest first.
        sessions.reverse();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    // ── Local state ──────────────────────────────────────────────────

    pub fn export_state(&self) -> LocalState {
        LocalState {
            session: self.session.clone(),
            location_poll: self.location_poll.clone(),
            break_poll: self.break_poll.clone(),
            pomodoro: self.pomodoro.clone(),
            retry: self.retry.clone(),
            attached: self.attached,
        }
    }

    pub fn import_state(&mut self, state: LocalState) {
        self.session = state.session;
        self.location_poll = state.location_poll;
        self.break_poll = state.break_poll;
        self.pomodoro = state.pomodoro;
        self.retry = state.retry;
        self.attached = state.attached;
    }

    /// Rebuild run state from the user's own record, e.g. at app start.
    pub fn load(&mut self) -> Result<SessionStatus, SessionError> {
        let record = self.store.get_user(&self.user_id)?;
        match record.active_session().cloned() {
            Some(session) if session.is_member(&self.user_id) => {
                tracing::debug!(session_id = %session.session_id, "rehydrating session");
                self.rehydrate(session)?;
            }
            _ => self.reset_local(),
        }
        Ok(self.status())
    }

    /// Pull what other members replicated into this user's record.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        let Some(local) = self.session.as_ref() else {
            return Ok(());
        };
        let session_id = local.session_id.clone();
        // Our own copy never landed; the local state is newer than the record.
        if self.retry.contains(&self.user_id, &session_id) {
            return Ok(());
        }
        let record = self.store.get_user(&self.user_id)?;
        match record.session(&session_id) {
            Some(stored) => self.reconcile(stored.clone()),
            None => Ok(()),
        }
    }

    // ── Session life cycle ───────────────────────────────────────────

    /// Create a session, open the location poll and replicate to everyone.
    /// The local user is added as the first member if missing.
    pub fn start(
        &mut self,
        members: Vec<UserId>,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<PropagationReport, SessionError> {
        if members.is_empty() {
            return Err(SessionError::EmptyMemberList);
        }
        if let Some(current) = self.session.as_ref().filter(|s| s.active) {
            return Err(SessionError::SessionAlreadyActive(
                current.session_id.to_string(),
            ));
        }

        let mut roster: Vec<UserId> = Vec::with_capacity(members.len() + 1);
        if !members.contains(&self.user_id) {
            roster.push(self.user_id.clone());
        }
        for member in members {
            if !roster.contains(&member) {
                roster.push(member);
            }
        }

        let pomodoro =
            PomodoroTimer::new(self.settings.timer, self.settings.bounds, self.settings.rounds)?;
        let mut location_poll = PollTimer::new(PollKind::Location);
        location_poll.start(
            self.settings.location_poll_secs,
            self.settings.location_options.iter().cloned(),
        )?;
        if !self.attached {
            location_poll.suspend();
        }

        let mut session = Session::new(
            self.user_id.clone(),
            roster,
            date,
            time,
            self.settings.timer,
        );
        session.phase = SessionPhase::LocationVoting;
        session.location_poll = Some(location_poll.tally().clone());

        tracing::info!(
            session_id = %session.session_id,
            members = session.members.len(),
            "study session started"
        );
        self.emit(Event::SessionStarted {
            session_id: session.session_id.clone(),
            members: session.members.clone(),
            at: Utc::now(),
        });
        self.emit(Event::PollOpened {
            kind: PollKind::Location,
            options: self.settings.location_options.clone(),
            duration_secs: self.settings.location_poll_secs,
            at: Utc::now(),
        });

        self.pomodoro = pomodoro;
        self.location_poll = location_poll;
        self.break_poll.clear();
        self.session = Some(session);
        Ok(self.replicate())
    }

    /// Record the location and move the group into the first study phase.
    pub fn resolve_location(&mut self, winner: &str) -> Result<PropagationReport, SessionError> {
        let session = self.active_session()?;
        if session.has_location() || session.phase != SessionPhase::LocationVoting {
            return Err(SessionError::AlreadyResolved(
                session.session_id.to_string(),
            ));
        }

        if self.location_poll.phase() != PollPhase::Resolved {
            self.location_poll.settle(winner);
        }
        let tally = self.location_poll.tally().clone();
        let session = self.active_session_mut()?;
        session.location = winner.to_string();
        session.phase = SessionPhase::Studying;
        session.location_poll = Some(tally);
        session.touch();
        tracing::debug!(session_id = %session.session_id, location = winner, "location decided");

        self.emit(Event::LocationSelected {
            location: winner.to_string(),
            at: Utc::now(),
        });
        if self.settings.auto_start_study && self.pomodoro.start() {
            self.emit(Event::StudyStarted {
                round: self.pomodoro.round(),
                duration_secs: self.pomodoro.remaining_secs(),
                at: Utc::now(),
            });
        }
        Ok(self.replicate())
    }

    /// Route the end of a study or break countdown.
    pub fn on_pomodoro_phase_end(
        &mut self,
        end: PhaseEnd,
    ) -> Result<PropagationReport, SessionError> {
        self.active_session()?;
        match end {
            PhaseEnd::StudyFinished { round } => {
                let mut poll = PollTimer::new(PollKind::BreakActivity);
                poll.start(
                    self.settings.break_poll_secs,
                    self.settings.break_activities.iter().cloned(),
                )?;
                if !self.attached {
                    poll.suspend();
                }
                let tally = poll.tally().clone();
                self.break_poll = poll;

                let session = self.active_session_mut()?;
                session.phase = SessionPhase::BreakVoting;
                session.break_activity = None;
                session.break_poll = Some(tally);
                session.touch();
                tracing::debug!(session_id = %session.session_id, round, "study phase finished");

                self.emit(Event::PollOpened {
                    kind: PollKind::BreakActivity,
                    options: self.settings.break_activities.clone(),
                    duration_secs: self.settings.break_poll_secs,
                    at: Utc::now(),
                });
                Ok(self.replicate())
            }
            PhaseEnd::BreakFinished {
                final_round: true, ..
            } => self.end(),
            PhaseEnd::BreakFinished { round, .. } => {
                self.break_poll.clear();
                let session = self.active_session_mut()?;
                session.rounds_completed = round;
                session.phase = SessionPhase::Studying;
                session.break_activity = None;
                session.break_poll = None;
                session.touch();

                self.emit(Event::StudyStarted {
                    round: self.pomodoro.round(),
                    duration_secs: self.pomodoro.remaining_secs(),
                    at: Utc::now(),
                });
                Ok(self.replicate())
            }
        }
    }

    /// Record the break activity and start the break countdown.
    pub fn resolve_break_activity(
        &mut self,
        winner: &str,
    ) -> Result<PropagationReport, SessionError> {
        let session = self.active_session()?;
        if session.phase != SessionPhase::BreakVoting {
            return Err(SessionError::PollNotOpen(PollKind::BreakActivity.as_str()));
        }

        if self.break_poll.phase() != PollPhase::Resolved {
            self.break_poll.settle(winner);
        }
        self.pomodoro.begin_break(winner);
        let tally = self.break_poll.tally().clone();
        let session = self.active_session_mut()?;
        session.phase = SessionPhase::OnBreak;
        session.break_activity = Some(winner.to_string());
        session.break_poll = Some(tally);
        session.touch();

        self.emit(Event::BreakStarted {
            round: self.pomodoro.round(),
            activity: winner.to_string(),
            duration_secs: self.pomodoro.remaining_secs(),
            at: Utc::now(),
        });
        Ok(self.replicate())
    }

    /// Finish the session for everyone.
    pub fn end(&mut self) -> Result<PropagationReport, SessionError> {
        self.sync_before_write();
        let round = self.pomodoro.round();
        let session = self.active_session_mut()?;
        session.rounds_completed = session.rounds_completed.max(round);
        session.close();
        let session_id = session.session_id.clone();
        tracing::info!(session_id = %session_id, "study session ended");

        self.pomodoro.stop();
        self.location_poll.clear();
        self.break_poll.clear();
        self.emit(Event::SessionEnded {
            session_id,
            at: Utc::now(),
        });
        // The closed copy stays loaded so later transitions see it as inactive.
        Ok(self.replicate())
    }

    /// Remove `member_id`. The remaining members get the shrunken session;
    /// the leaver gets an ended copy for their history.
    pub fn leave(&mut self, member_id: &str) -> Result<PropagationReport, SessionError> {
        self.sync_before_write();
        let session = self.active_session()?.clone();
        if !session.is_member(member_id) {
            return Err(SessionError::NotAMember {
                session_id: session.session_id.to_string(),
                member: member_id.to_string(),
            });
        }

        let mut group = session.clone();
        group.members.retain(|m| m != member_id);
        withdraw_open_ballots(&mut group, member_id);
        group.touch();
        if group.members.is_empty() {
            group.close();
        }
        let mut farewell = session;
        farewell.close();

        let mut report = self.deliver(&group, &group.members);
        report.merge(self.deliver(&farewell, &[member_id.to_string()]));
        tracing::info!(
            session_id = %group.session_id,
            member = member_id,
            remaining = group.members.len(),
            "member left session"
        );
        self.emit(Event::MemberLeft {
            member: member_id.to_string(),
            remaining: group.members.clone(),
            at: Utc::now(),
        });

        if member_id == self.user_id || !group.active {
            self.emit(Event::SessionEnded {
                session_id: group.session_id.clone(),
                at: Utc::now(),
            });
            self.close_local(if group.active { farewell } else { group });
        } else {
            self.location_poll.withdraw_voter(member_id);
            self.break_poll.withdraw_voter(member_id);
            self.session = Some(group);
        }
        Ok(report)
    }

    /// The local user leaves.
    pub fn leave_session(&mut self) -> Result<PropagationReport, SessionError> {
        let me = self.user_id.clone();
        self.leave(&me)
    }

    pub fn end_session(&mut self) -> Result<PropagationReport, SessionError> {
        self.end()
    }

    // ── Polls ────────────────────────────────────────────────────────

    /// `Ok(None)` when the location poll has already closed.
    pub fn cast_location_vote(
        &mut self,
        option: &str,
        selected: bool,
    ) -> Result<Option<PropagationReport>, SessionError> {
        self.cast_vote(PollKind::Location, option, selected)
    }

    /// `Ok(None)` when the break poll has already closed.
    pub fn cast_break_vote(
        &mut self,
        option: &str,
        selected: bool,
    ) -> Result<Option<PropagationReport>, SessionError> {
        self.cast_vote(PollKind::BreakActivity, option, selected)
    }

    pub fn add_location_option(&mut self, label: &str) -> Result<PropagationReport, SessionError> {
        self.add_option(PollKind::Location, label)
    }

    pub fn add_break_option(&mut self, label: &str) -> Result<PropagationReport, SessionError> {
        self.add_option(PollKind::BreakActivity, label)
    }

    /// Switch the open poll between its voting and results view.
    pub fn toggle_poll_view(&mut self, kind: PollKind) -> Result<TallyView, SessionError> {
        self.active_session()?;
        let view = self.poll_mut(kind).toggle_view()?;
        self.emit(Event::PollViewChanged {
            kind,
            view,
            at: Utc::now(),
        });
        Ok(view)
    }

    fn cast_vote(
        &mut self,
        kind: PollKind,
        option: &str,
        selected: bool,
    ) -> Result<Option<PropagationReport>, SessionError> {
        self.sync_before_write();
        let session = self.active_session()?;
        if phase_rank(session.phase) > phase_rank(voting_phase(kind)) {
            // Another member already closed this poll.
            return Ok(None);
        }
        let voter = self.user_id.clone();
        if !self.poll_mut(kind).change_vote(&voter, option, selected)? {
            return Ok(None);
        }
        self.store_tally(kind)?;
        self.emit(Event::VoteChanged {
            kind,
            voter,
            option: option.to_string(),
            selected,
            at: Utc::now(),
        });
        Ok(Some(self.replicate()))
    }

    fn add_option(&mut self, kind: PollKind, label: &str) -> Result<PropagationReport, SessionError> {
        self.sync_before_write();
        self.active_session()?;
        self.poll_mut(kind).add_option(label)?;
        self.store_tally(kind)?;
        self.emit(Event::OptionAdded {
            kind,
            label: label.to_string(),
            at: Utc::now(),
        });
        Ok(self.replicate())
    }

    fn poll_mut(&mut self, kind: PollKind) -> &mut PollTimer {
        match kind {
            PollKind::Location => &mut self.location_poll,
            PollKind::BreakActivity => &mut self.break_poll,
        }
    }

    fn store_tally(&mut self, kind: PollKind) -> Result<(), SessionError> {
        let tally = match kind {
            PollKind::Location => self.location_poll.tally().clone(),
            PollKind::BreakActivity => self.break_poll.tally().clone(),
        };
        let session = self.active_session_mut()?;
        match kind {
            PollKind::Location => session.location_poll = Some(tally),
            PollKind::BreakActivity => session.break_poll = Some(tally),
        }
        session.touch();
        Ok(())
    }

    fn on_poll_resolved(&mut self, outcome: PollOutcome) -> Result<PropagationReport, SessionError> {
        tracing::debug!(kind = outcome.kind.as_str(), winner = %outcome.winner, "poll resolved");
        self.emit(Event::PollResolved {
            kind: outcome.kind,
            winner: outcome.winner.clone(),
            tally: outcome.tally,
            at: Utc::now(),
        });
        match outcome.kind {
            PollKind::Location => self.resolve_location(&outcome.winner),
            PollKind::BreakActivity => self.resolve_break_activity(&outcome.winner),
        }
    }

    // ── Timer ────────────────────────────────────────────────────────

    /// Change study/break durations for every member. Out-of-range values
    /// are rejected and nothing is replicated.
    pub fn update_timer_config(
        &mut self,
        study_secs: u64,
        break_secs: u64,
    ) -> Result<PropagationReport, SessionError> {
        self.sync_before_write();
        self.active_session()?;
        self.pomodoro.configure(study_secs, break_secs)?;
        let config = self.pomodoro.config();
        let session = self.active_session_mut()?;
        session.timer_config = config;
        session.touch();
        self.emit(Event::TimerConfigChanged {
            config,
            at: Utc::now(),
        });
        Ok(self.replicate())
    }

    pub fn pause_timer(&mut self) -> Result<bool, SessionError> {
        self.active_session()?;
        let changed = self.pomodoro.pause();
        if changed {
            self.emit(Event::TimerPaused {
                remaining_secs: self.pomodoro.remaining_secs(),
                at: Utc::now(),
            });
        }
        Ok(changed)
    }

    pub fn resume_timer(&mut self) -> Result<bool, SessionError> {
        self.active_session()?;
        let changed = self.pomodoro.resume();
        if changed {
            self.emit(Event::TimerResumed {
                remaining_secs: self.pomodoro.remaining_secs(),
                at: Utc::now(),
            });
        }
        Ok(changed)
    }

    /// Start studying if idle, otherwise flip between paused and running.
    pub fn toggle_timer(&mut self) -> Result<bool, SessionError> {
        let session = self.active_session()?;
        if session.phase != SessionPhase::Studying && session.phase != SessionPhase::OnBreak {
            return Ok(false);
        }
        if self.pomodoro.is_running() {
            self.pause_timer()?;
        } else if self.pomodoro.phase() == PomodoroPhase::Idle {
            self.pomodoro.start();
            self.emit(Event::StudyStarted {
                round: self.pomodoro.round(),
                duration_secs: self.pomodoro.remaining_secs(),
                at: Utc::now(),
            });
        } else {
            self.resume_timer()?;
        }
        Ok(self.pomodoro.is_running())
    }

    pub fn reset_timer(&mut self) -> Result<bool, SessionError> {
        self.active_session()?;
        let changed = self.pomodoro.reset();
        if changed {
            self.emit(Event::TimerReset {
                remaining_secs: self.pomodoro.remaining_secs(),
                at: Utc::now(),
            });
        }
        Ok(changed)
    }

    /// Advance by one second. Exactly one countdown moves per tick, picked
    /// by the phase at the start of the tick; a countdown started by this
    /// tick's transition runs from the next tick on.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        if !self.attached {
            return Ok(());
        }
        let Some(phase) = self.session.as_ref().filter(|s| s.active).map(|s| s.phase) else {
            return Ok(());
        };

        match phase {
            SessionPhase::LocationVoting | SessionPhase::BreakVoting => {
                let kind = if phase == SessionPhase::LocationVoting {
                    PollKind::Location
                } else {
                    PollKind::BreakActivity
                };
                if self.poll_mut(kind).remaining_secs() <= 1 {
                    // Last second: collect replicated ballots, or adopt a
                    // decision another member already made.
                    self.sync_before_write();
                    let still_open = self
                        .session
                        .as_ref()
                        .is_some_and(|s| s.active && s.phase == phase);
                    if !still_open {
                        return Ok(());
                    }
                }
                let outcome = match kind {
                    PollKind::Location => self.location_poll.tick(&mut self.rng),
                    PollKind::BreakActivity => self.break_poll.tick(&mut self.rng),
                };
                if let Some(outcome) = outcome {
                    self.on_poll_resolved(outcome)?;
                }
            }
            SessionPhase::Studying | SessionPhase::OnBreak => {
                if let Some(end) = self.pomodoro.tick() {
                    // Another member's device may have finished this phase first.
                    self.sync_before_write();
                    let unchanged = self
                        .session
                        .as_ref()
                        .is_some_and(|s| s.active && s.phase == phase);
                    if unchanged {
                        self.on_pomodoro_phase_end(end)?;
                    }
                }
            }
            SessionPhase::Proposed | SessionPhase::Ended => {}
        }
        Ok(())
    }

    // ── Chat ─────────────────────────────────────────────────────────

    pub fn append_message(&mut self, text: &str) -> Result<PropagationReport, SessionError> {
        self.sync_before_write();
        let message = ChatMessage::new(self.user_id.clone(), text);
        let session = self.active_session_mut()?;
        session.chat_log.push(message);
        session.touch();
        self.emit(Event::MessageAppended {
            author: self.user_id.clone(),
            text: text.to_string(),
            at: Utc::now(),
        });
        Ok(self.replicate())
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// The session view went away: stop every countdown and drop pending
    /// notifications. The session stays active for the other members.
    pub fn detach(&mut self) {
        self.attached = false;
        self.location_poll.suspend();
        self.break_poll.suspend();
        self.events.clear();
    }

    pub fn attach(&mut self) {
        self.attached = true;
        self.location_poll.resume();
        self.break_poll.resume();
    }

    // ── Replication ──────────────────────────────────────────────────

    /// Re-send copies that failed earlier.
    pub fn retry_pending(&mut self) -> Vec<PropagationReport> {
        let reports = self.retry.flush(&self.propagator);
        for report in &reports {
            if report.is_complete() {
                tracing::debug!(session_id = %report.session_id, "queued copy delivered");
            }
        }
        reports
    }

    fn replicate(&mut self) -> PropagationReport {
        match self.session.clone() {
            Some(session) => self.deliver(&session, &session.members),
            None => PropagationReport::new(SessionId::from("")),
        }
    }

    fn deliver(&mut self, session: &Session, members: &[UserId]) -> PropagationReport {
        for member in members {
            self.retry.forget(member, &session.session_id);
        }
        if !self.retry.is_empty() {
            self.retry_pending();
        }

        let report = self.propagator.propagate(session, members);
        if !report.is_complete() {
            self.retry.record_failures(&report, session);
            self.emit(Event::ReplicationFailed {
                session_id: session.session_id.clone(),
                failed: report.failed.clone(),
                at: Utc::now(),
            });
        }
        report
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn active_session(&self) -> Result<&Session, SessionError> {
        match self.session.as_ref() {
            None => Err(SessionError::NoActiveSession),
            Some(s) if !s.active => Err(SessionError::SessionInactive(s.session_id.to_string())),
            Some(s) => Ok(s),
        }
    }

    fn active_session_mut(&mut self) -> Result<&mut Session, SessionError> {
        match self.session.as_mut() {
            None => Err(SessionError::NoActiveSession),
            Some(s) if !s.active => Err(SessionError::SessionInactive(s.session_id.to_string())),
            Some(s) => Ok(s),
        }
    }

    /// Refresh, but never let a store hiccup block a local action.
    fn sync_before_write(&mut self) {
        if let Err(e) = self.refresh() {
            tracing::warn!(error = %e, "could not read own record; using local copy");
        }
    }

    fn reset_local(&mut self) {
        self.session = None;
        self.stop_local_timers();
    }

    /// Keep `closed` as this device's copy and stop every countdown.
    fn close_local(&mut self, closed: Session) {
        self.session = Some(closed);
        self.stop_local_timers();
    }

    fn stop_local_timers(&mut self) {
        self.location_poll.clear();
        self.break_poll.clear();
        self.pomodoro.stop();
    }

    /// Fold the stored copy of the current session into local state.
    fn reconcile(&mut self, stored: Session) -> Result<(), SessionError> {
        let Some(local) = self.session.as_ref().filter(|s| s.active) else {
            return Ok(());
        };

        if !stored.active || !stored.is_member(&self.user_id) {
            tracing::info!(session_id = %stored.session_id, "session closed by another member");
            self.emit(Event::SessionEnded {
                session_id: stored.session_id.clone(),
                at: Utc::now(),
            });
            let mut closed = stored;
            if closed.active {
                closed.close();
            }
            self.close_local(closed);
            return Ok(());
        }

        if progress(&stored) > progress(local) {
            tracing::debug!(
                session_id = %stored.session_id,
                phase = ?stored.phase,
                "adopting phase replicated by another member"
            );
            if stored.has_location() && !local.has_location() {
                self.emit(Event::LocationSelected {
                    location: stored.location.clone(),
                    at: Utc::now(),
                });
            }
            return self.rehydrate(stored);
        }
        if progress(&stored) < progress(local) {
            // Our newer write has not landed in our own record yet.
            return Ok(());
        }

        if stored.timer_config != self.pomodoro.config() {
            let TimerConfig {
                study_duration_secs,
                break_duration_secs,
            } = stored.timer_config;
            if let Err(e) = self.pomodoro.configure(study_duration_secs, break_duration_secs) {
                tracing::warn!(error = %e, "ignoring replicated timer config");
            }
        }
        match stored.phase {
            SessionPhase::LocationVoting => {
                if let Some(tally) = stored.location_poll.clone() {
                    self.location_poll.adopt_tally(tally);
                }
            }
            SessionPhase::BreakVoting => {
                if let Some(tally) = stored.break_poll.clone() {
                    self.break_poll.adopt_tally(tally);
                }
            }
            _ => {}
        }
        self.session = Some(stored);
        Ok(())
    }

    /// Rebuild local timers for `session` with fresh countdowns.
    fn rehydrate(&mut self, session: Session) -> Result<(), SessionError> {
        let mut pomodoro =
            PomodoroTimer::new(session.timer_config, self.settings.bounds, self.settings.rounds)
                .or_else(|_| {
                    PomodoroTimer::new(self.settings.timer, self.settings.bounds, self.settings.rounds)
                })?;
        let mut location_poll = PollTimer::new(PollKind::Location);
        let mut break_poll = PollTimer::new(PollKind::BreakActivity);
        let round = session.rounds_completed + 1;

        match session.phase {
            SessionPhase::Proposed | SessionPhase::LocationVoting => {
                open_replicated_poll(
                    &mut location_poll,
                    self.settings.location_poll_secs,
                    session.location_poll.clone(),
                    &self.settings.location_options,
                )?;
            }
            SessionPhase::Studying => {
                settle_replicated_poll(
                    &mut location_poll,
                    session.location_poll.clone(),
                    &session.location,
                );
                pomodoro.rehydrate(PomodoroPhase::Studying, round, None);
                if !self.settings.auto_start_study {
                    pomodoro.pause();
                }
            }
            SessionPhase::BreakVoting => {
                settle_replicated_poll(
                    &mut location_poll,
                    session.location_poll.clone(),
                    &session.location,
                );
                pomodoro.rehydrate(PomodoroPhase::BreakVoting, round, None);
                open_replicated_poll(
                    &mut break_poll,
                    self.settings.break_poll_secs,
                    session.break_poll.clone(),
                    &self.settings.break_activities,
                )?;
            }
            SessionPhase::OnBreak => {
                settle_replicated_poll(
                    &mut location_poll,
                    session.location_poll.clone(),
                    &session.location,
                );
                if let Some(activity) = session.break_activity.as_deref() {
                    settle_replicated_poll(&mut break_poll, session.break_poll.clone(), activity);
                }
                pomodoro.rehydrate(PomodoroPhase::OnBreak, round, session.break_activity.clone());
            }
            SessionPhase::Ended => pomodoro.stop(),
        }

        if !self.attached {
            location_poll.suspend();
            break_poll.suspend();
        }
        self.pomodoro = pomodoro;
        self.location_poll = location_poll;
        self.break_poll = break_poll;
        self.session = Some(session);
        Ok(())
    }
}

/// The session phase during which `kind` collects votes.
fn voting_phase(kind: PollKind) -> SessionPhase {
    match kind {
        PollKind::Location => SessionPhase::LocationVoting,
        PollKind::BreakActivity => SessionPhase::BreakVoting,
    }
}

/// Drop `member`'s selections from whichever poll is still collecting votes.
fn withdraw_open_ballots(session: &mut Session, member: &str) {
    let tally = match session.phase {
        SessionPhase::LocationVoting => session.location_poll.as_mut(),
        SessionPhase::BreakVoting => session.break_poll.as_mut(),
        _ => None,
    };
    if let Some(tally) = tally {
        tally.withdraw_voter(member);
    }
}

/// Show a poll another member already decided as resolved.
fn settle_replicated_poll(poll: &mut PollTimer, replicated: Option<VoteTally>, winner: &str) {
    if let Some(tally) = replicated {
        poll.adopt_tally(tally);
        poll.settle(winner);
    }
}

/// Open `poll` over the replicated ballots, or the default options when
/// none were replicated.
fn open_replicated_poll(
    poll: &mut PollTimer,
    duration_secs: u64,
    replicated: Option<VoteTally>,
    defaults: &[String],
) -> Result<(), SessionError> {
    match replicated {
        Some(tally) => {
            let options: Vec<String> = tally.options().map(str::to_string).collect();
            poll.start(duration_secs, options)?;
            poll.adopt_tally(tally);
        }
        None => poll.start(duration_secs, defaults.iter().cloned())?,
    }
    Ok(())
}
