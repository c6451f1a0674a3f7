//! Fixed-duration poll.
//!
//! ```text
//! Idle -> Voting -> Resolved -> (reopen | start) -> Voting
//! ```
//!
//! The poll owns a [`Countdown`] and a [`VoteTally`]. When the countdown
//! expires the tally is resolved once and the outcome is handed back to the
//! caller; ticks after that are ignored.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tally::{TallyView, VoteTally};
use crate::error::SessionError;
use crate::timer::{Countdown, CountdownTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollKind {
    Location,
    BreakActivity,
}

impl PollKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollKind::Location => "location",
            PollKind::BreakActivity => "break activity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Idle,
    Voting,
    Resolved,
}

/// The decision a poll reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub kind: PollKind,
    pub winner: String,
    pub tally: VoteTally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSnapshot {
    pub kind: PollKind,
    pub phase: PollPhase,
    pub remaining_secs: u64,
    pub suspended: bool,
    pub tally: VoteTally,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTimer {
    kind: PollKind,
    phase: PollPhase,
    countdown: Countdown,
    tally: VoteTally,
    #[serde(default)]
    winner: Option<String>,
    #[serde(default)]
    suspended: bool,
}

impl PollTimer {
    pub fn new(kind: PollKind) -> Self {
        Self {
            kind,
            phase: PollPhase::Idle,
            countdown: Countdown::new(0),
            tally: VoteTally::default(),
            winner: None,
            suspended: false,
        }
    }

    pub fn kind(&self) -> PollKind {
        self.kind
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn is_voting(&self) -> bool {
        self.phase == PollPhase::Voting
    }

    pub fn remaining_secs(&self) -> u64 {
        self.countdown.remaining_secs()
    }

    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            kind: self.kind,
            phase: self.phase,
            remaining_secs: self.countdown.remaining_secs(),
            suspended: self.suspended,
            tally: self.tally.clone(),
        }
    }

    /// Open a fresh poll over `options` for `duration_secs` seconds.
    pub fn start<I, S>(&mut self, duration_secs: u64, options: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if duration_secs == 0 {
            return Err(SessionError::InvalidDuration {
                field: "poll_duration_secs",
                secs: 0,
                min: 1,
                max: u64::MAX,
            });
        }
        let tally = VoteTally::initialize(options)?;
        self.tally = tally;
        self.winner = None;
        self.phase = PollPhase::Voting;
        self.countdown.restart(duration_secs);
        if !self.suspended {
            self.countdown.start();
        }
        Ok(())
    }

    /// Record or withdraw a selection. `Ok(false)` once the poll is resolved.
    pub fn change_vote(
        &mut self,
        voter: &str,
        option: &str,
        selected: bool,
    ) -> Result<bool, SessionError> {
        match self.phase {
            PollPhase::Voting => {
                self.tally.set_option(voter, option, selected)?;
                Ok(true)
            }
            PollPhase::Resolved => Ok(false),
            PollPhase::Idle => Err(SessionError::PollNotOpen(self.kind.as_str())),
        }
    }

    /// Remove a departed voter's ballots while the poll is still open.
    pub fn withdraw_voter(&mut self, voter: &str) -> bool {
        self.phase == PollPhase::Voting && self.tally.withdraw_voter(voter)
    }

    pub fn add_option(&mut self, label: impl Into<String>) -> Result<(), SessionError> {
        if self.phase != PollPhase::Voting {
            return Err(SessionError::PollNotOpen(self.kind.as_str()));
        }
        self.tally.add_option(label)
    }

    /// Replace the local ballots with the replicated ones.
    pub fn adopt_tally(&mut self, tally: VoteTally) {
        self.tally = tally;
        match self.phase {
            PollPhase::Resolved => self.tally.show_results(),
            _ => self.tally.show_voting(),
        }
    }

    /// Flip the tally between its voting and results faces. Local only.
    pub fn toggle_view(&mut self) -> Result<TallyView, SessionError> {
        if self.phase == PollPhase::Idle {
            return Err(SessionError::PollNotOpen(self.kind.as_str()));
        }
        match self.tally.view() {
            TallyView::Voting => self.tally.show_results(),
            TallyView::Results => self.tally.show_voting(),
        }
        Ok(self.tally.view())
    }

    /// Go back to voting after a resolution without touching the countdown.
    pub fn reopen(&mut self) -> bool {
        if self.phase != PollPhase::Resolved {
            return false;
        }
        self.phase = PollPhase::Voting;
        self.winner = None;
        self.tally.show_voting();
        true
    }

    /// Reload the countdown with `duration_secs`, keeping the ballots.
    pub fn restart(&mut self, duration_secs: u64) -> Result<(), SessionError> {
        if self.phase == PollPhase::Idle {
            return Err(SessionError::PollNotOpen(self.kind.as_str()));
        }
        self.reopen();
        self.countdown.restart(duration_secs);
        if !self.suspended {
            self.countdown.start();
        }
        Ok(())
    }

    /// Close the poll with a decision made elsewhere, e.g. by another member.
    pub fn settle(&mut self, winner: impl Into<String>) {
        self.countdown.cancel();
        self.phase = PollPhase::Resolved;
        self.winner = Some(winner.into());
        self.tally.show_results();
    }

    /// Drop back to idle and forget the ballots.
    pub fn clear(&mut self) {
        *self = Self {
            suspended: self.suspended,
            ..Self::new(self.kind)
        };
    }

    /// Stop consuming ticks without changing the poll's phase.
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.countdown.pause();
    }

    pub fn resume(&mut self) {
        self.suspended = false;
        if self.phase == PollPhase::Voting {
            self.countdown.start();
        }
    }

    /// Call once per second while voting.
    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<PollOutcome> {
        if self.phase != PollPhase::Voting || self.suspended {
            return None;
        }
        // A reopened poll whose countdown already ran out resolves on the next tick.
        let expired = self.countdown.is_expired()
            || self.countdown.tick() == CountdownTick::Expired;
        if !expired {
            return None;
        }
        self.resolve(rng)
    }

    fn resolve<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<PollOutcome> {
        let winner = self.tally.resolve(rng)?;
        self.phase = PollPhase::Resolved;
        self.winner = Some(winner.clone());
        self.tally.show_results();
        Some(PollOutcome {
            kind: self.kind,
            winner,
            tally: self.tally.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn rng() -> Pcg64 {
        Pcg64::seed_from_u64(42)
    }

    fn open(duration: u64) -> PollTimer {
        let mut poll = PollTimer::new(PollKind::BreakActivity);
        poll.start(duration, ["Take a walk", "Phone break"]).unwrap();
        poll
    }

    #[test]
    fn resolves_when_countdown_reaches_zero() {
        let mut rng = rng();
        let mut poll = open(3);
        poll.change_vote("u1", "Phone break", true).unwrap();
        assert!(poll.tick(&mut rng).is_none());
        assert!(poll.tick(&mut rng).is_none());
        let outcome = poll.tick(&mut rng).unwrap();
        assert_eq!(outcome.winner, "Phone break");
        assert_eq!(poll.phase(), PollPhase::Resolved);
        assert_eq!(poll.winner(), Some("Phone break"));
    }

    #[test]
    fn resolution_happens_once() {
        let mut rng = rng();
        let mut poll = open(1);
        assert!(poll.tick(&mut rng).is_some());
        for _ in 0..10 {
            assert!(poll.tick(&mut rng).is_none());
        }
    }

    #[test]
    fn votes_after_resolution_have_no_effect() {
        let mut rng = rng();
        let mut poll = open(1);
        poll.tick(&mut rng);
        assert_eq!(poll.change_vote("u1", "Take a walk", true), Ok(false));
        assert_eq!(poll.tally().count("Take a walk"), 0);
    }

    #[test]
    fn idle_poll_rejects_votes() {
        let mut poll = PollTimer::new(PollKind::Location);
        assert_eq!(
            poll.change_vote("u1", "Library", true),
            Err(SessionError::PollNotOpen("location"))
        );
    }

    #[test]
    fn reopen_keeps_ballots_and_countdown() {
        let mut rng = rng();
        let mut poll = open(2);
        poll.change_vote("u1", "Take a walk", true).unwrap();
        poll.tick(&mut rng);
        poll.tick(&mut rng);
        assert_eq!(poll.phase(), PollPhase::Resolved);

        assert!(poll.reopen());
        assert_eq!(poll.phase(), PollPhase::Voting);
        assert_eq!(poll.remaining_secs(), 0);
        assert!(poll.tally().is_selected("u1", "Take a walk"));

        poll.change_vote("u1", "Take a walk", false).unwrap();
        poll.change_vote("u1", "Phone break", true).unwrap();
        let outcome = poll.tick(&mut rng).unwrap();
        assert_eq!(outcome.winner, "Phone break");
    }

    #[test]
    fn restart_gives_a_fresh_countdown() {
        let mut rng = rng();
        let mut poll = open(1);
        poll.tick(&mut rng);
        poll.restart(5).unwrap();
        assert_eq!(poll.remaining_secs(), 5);
        assert!(poll.tick(&mut rng).is_none());
    }

    #[test]
    fn suspended_poll_ignores_ticks() {
        let mut rng = rng();
        let mut poll = open(2);
        poll.suspend();
        for _ in 0..5 {
            assert!(poll.tick(&mut rng).is_none());
        }
        assert_eq!(poll.phase(), PollPhase::Voting);
        poll.resume();
        poll.tick(&mut rng);
        assert!(poll.tick(&mut rng).is_some());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut poll = PollTimer::new(PollKind::Location);
        assert!(matches!(
            poll.start(0, ["Library"]),
            Err(SessionError::InvalidDuration { .. })
        ));
        assert_eq!(poll.phase(), PollPhase::Idle);
    }

    #[test]
    fn view_toggle_is_local_to_the_tally() {
        let mut poll = PollTimer::new(PollKind::Location);
        assert!(poll.toggle_view().is_err());
        poll.start(10, ["Library"]).unwrap();
        assert_eq!(poll.toggle_view(), Ok(TallyView::Results));
        assert_eq!(poll.toggle_view(), Ok(TallyView::Voting));
        assert_eq!(poll.phase(), PollPhase::Voting);
    }

    #[test]
    fn options_can_be_added_while_voting() {
        let mut poll = open(10);
        poll.add_option("Stretch").unwrap();
        assert_eq!(
            poll.add_option("Stretch"),
            Err(SessionError::DuplicateOption("Stretch".into()))
        );
        assert!(poll.tally().contains("Stretch"));
    }
}
