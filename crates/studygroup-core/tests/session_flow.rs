//! End-to-end session flow tests.
//!
//! Each test drives one or more coordinators over a shared in-memory record
//! store by calling `tick()` the way a front-end would once per second.
//! Devices tick in lockstep, one after the other.

use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use studygroup_core::{
    DurationBounds, Event, MemoryRecordStore, PollKind, PollPhase, PomodoroPhase, RecordStore,
    SessionCoordinator, SessionPhase, SessionSettings, SessionStatus, TimerConfig,
};

// ============================================================================
// Test Helpers
// ============================================================================

type Coordinator = SessionCoordinator<Arc<MemoryRecordStore>>;

const LOCATION_POLL_SECS: u64 = 10;
const BREAK_POLL_SECS: u64 = 10;

/// 60s study, 30s break. The break is below the default lower bound, so
/// the accepted range is widened for these runs.
fn settings() -> SessionSettings {
    SessionSettings {
        timer: TimerConfig {
            study_duration_secs: 60,
            break_duration_secs: 30,
        },
        bounds: DurationBounds {
            min_secs: 30,
            max_secs: 3600,
        },
        location_poll_secs: LOCATION_POLL_SECS,
        break_poll_secs: BREAK_POLL_SECS,
        ..SessionSettings::default()
    }
}

fn device(store: &Arc<MemoryRecordStore>, user: &str, seed: u64) -> Coordinator {
    SessionCoordinator::new(Arc::clone(store), user, settings())
        .unwrap()
        .with_seed(seed)
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 21).unwrap()
}

fn time() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 30, 0).unwrap()
}

fn tick_all(devices: &mut [&mut Coordinator], n: u64) {
    for _ in 0..n {
        for device in devices.iter_mut() {
            device.tick().unwrap();
        }
    }
}

fn stored_copy(store: &MemoryRecordStore, user: &str) -> studygroup_core::Session {
    store.get_user(user).unwrap().study_sessions[0].clone()
}

// ============================================================================
// Single device
// ============================================================================

#[test]
fn full_session_without_votes_ends_for_every_member() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 11);
    u1.start(vec!["u1".into(), "u2".into()], date(), time())
        .unwrap();
    let session_id = u1.session().unwrap().session_id.clone();

    // Location poll closes with no votes; one of the defaults wins.
    tick_all(&mut [&mut u1], LOCATION_POLL_SECS);
    let location = u1.session().unwrap().location.clone();
    assert!(["Library", "Cafe", "Study Room"].contains(&location.as_str()));
    assert_eq!(u1.pomodoro().phase(), PomodoroPhase::Studying);

    tick_all(&mut [&mut u1], 59);
    assert_eq!(u1.session().unwrap().phase, SessionPhase::Studying);
    tick_all(&mut [&mut u1], 1);
    assert_eq!(u1.session().unwrap().phase, SessionPhase::BreakVoting);
    let break_poll = u1.break_poll();
    assert_eq!(break_poll.phase(), PollPhase::Voting);
    let options: Vec<&str> = break_poll.tally().options().collect();
    assert_eq!(options, ["Take a walk", "Phone break"]);

    tick_all(&mut [&mut u1], BREAK_POLL_SECS);
    let activity = u1.pomodoro().break_activity().unwrap().to_string();
    assert!(["Take a walk", "Phone break"].contains(&activity.as_str()));
    assert!(u1.status().break_active);
    assert!(u1.status().is_ending);

    tick_all(&mut [&mut u1], 30);
    assert_eq!(u1.status(), SessionStatus::idle());
    for user in ["u1", "u2"] {
        let copy = stored_copy(&store, user);
        assert_eq!(copy.session_id, session_id);
        assert!(!copy.active, "{user} still sees the session as active");
        assert_eq!(copy.phase, SessionPhase::Ended);
        assert_eq!(copy.location, location);
    }

    let events = u1.drain_events();
    assert!(matches!(events.first(), Some(Event::SessionStarted { .. })));
    assert!(matches!(events.last(), Some(Event::SessionEnded { .. })));
}

#[test]
fn extra_rounds_repeat_study_and_break() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1"]));
    let mut u1 = SessionCoordinator::new(
        Arc::clone(&store),
        "u1",
        SessionSettings {
            rounds: 2,
            ..settings()
        },
    )
    .unwrap();
    u1.start(vec!["u1".into()], date(), time()).unwrap();
    u1.resolve_location("Library").unwrap();

    tick_all(&mut [&mut u1], 60 + BREAK_POLL_SECS);
    assert_eq!(u1.session().unwrap().phase, SessionPhase::OnBreak);
    assert!(!u1.status().is_ending);

    tick_all(&mut [&mut u1], 30);
    let session = u1.session().unwrap();
    assert_eq!(session.phase, SessionPhase::Studying);
    assert_eq!(session.rounds_completed, 1);
    assert_eq!(u1.pomodoro().round(), 2);
    assert!(stored_copy(&store, "u1").active);

    tick_all(&mut [&mut u1], 60 + BREAK_POLL_SECS + 30);
    assert_eq!(u1.status(), SessionStatus::idle());
    let copy = stored_copy(&store, "u1");
    assert!(!copy.active);
    assert_eq!(copy.rounds_completed, 2);
}

#[test]
fn options_added_during_voting_can_win() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 5);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u1.add_location_option("Park").unwrap();
    u1.cast_location_vote("Park", true).unwrap();

    assert!(stored_copy(&store, "u2")
        .location_poll
        .unwrap()
        .is_selected("u1", "Park"));

    tick_all(&mut [&mut u1], LOCATION_POLL_SECS);
    assert_eq!(stored_copy(&store, "u2").location, "Park");
}

#[test]
fn deselecting_withdraws_the_vote() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1"]));
    let mut u1 = device(&store, "u1", 5);
    u1.start(vec!["u1".into()], date(), time()).unwrap();
    u1.cast_location_vote("Cafe", true).unwrap();
    u1.cast_location_vote("Library", true).unwrap();
    u1.cast_location_vote("Cafe", false).unwrap();
    assert_eq!(u1.location_poll().tally().count("Cafe"), 0);
    tick_all(&mut [&mut u1], LOCATION_POLL_SECS);
    assert_eq!(u1.session().unwrap().location, "Library");
}

// ============================================================================
// Two devices
// ============================================================================

#[test]
fn two_devices_converge_on_one_decision() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    let mut u2 = device(&store, "u2", 2);

    u1.start(vec!["u2".into()], date(), time()).unwrap();
    let status = u2.load().unwrap();
    assert!(status.is_active);
    assert!(status.location_poll_active);
    assert_eq!(u2.location_poll().remaining_secs(), LOCATION_POLL_SECS);

    // Only u2 votes; u1 resolves from the replicated ballot.
    u2.cast_location_vote("Study Room", true).unwrap();
    tick_all(&mut [&mut u1, &mut u2], LOCATION_POLL_SECS);
    assert_eq!(u1.session().unwrap().location, "Study Room");
    assert_eq!(u2.session().unwrap().location, "Study Room");
    assert_eq!(u2.pomodoro().phase(), PomodoroPhase::Studying);

    tick_all(&mut [&mut u1, &mut u2], 60);
    assert_eq!(u1.session().unwrap().phase, SessionPhase::BreakVoting);
    assert_eq!(u2.session().unwrap().phase, SessionPhase::BreakVoting);

    u1.cast_break_vote("Phone break", true).unwrap();
    tick_all(&mut [&mut u1, &mut u2], BREAK_POLL_SECS);
    assert_eq!(u1.pomodoro().break_activity(), Some("Phone break"));
    assert_eq!(u2.pomodoro().break_activity(), Some("Phone break"));
    assert_eq!(u2.session().unwrap().phase, SessionPhase::OnBreak);

    tick_all(&mut [&mut u1, &mut u2], 30);
    assert_eq!(u1.status(), SessionStatus::idle());
    assert_eq!(u2.status(), SessionStatus::idle());
    assert!(!stored_copy(&store, "u1").active);
    assert!(!stored_copy(&store, "u2").active);
    assert!(u2
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::SessionEnded { .. })));
}

#[test]
fn late_vote_after_another_device_resolved_is_ignored() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    let mut u2 = device(&store, "u2", 2);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u2.load().unwrap();

    // Only u1 ticks; u2 has not seen the resolution yet.
    tick_all(&mut [&mut u1], LOCATION_POLL_SECS);
    let location = u1.session().unwrap().location.clone();
    let before = stored_copy(&store, "u2");

    assert_eq!(u2.cast_location_vote("Cafe", true), Ok(None));
    assert_eq!(u2.session().unwrap().phase, SessionPhase::Studying);
    assert_eq!(u2.session().unwrap().location, location);
    assert_eq!(u2.location_poll().phase(), PollPhase::Resolved);
    assert_eq!(u2.location_poll().winner(), Some(location.as_str()));
    assert_eq!(stored_copy(&store, "u2"), before);
}

#[test]
fn timer_change_reaches_other_devices() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    let mut u2 = device(&store, "u2", 2);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u2.load().unwrap();

    u1.update_timer_config(900, 120).unwrap();
    u2.refresh().unwrap();
    assert_eq!(u2.pomodoro().config().study_duration_secs, 900);
    assert_eq!(u2.status().timer.break_duration_secs, 120);
}

#[test]
fn chat_from_both_devices_is_kept() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    let mut u2 = device(&store, "u2", 2);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u2.load().unwrap();

    u1.append_message("library at 6?").unwrap();
    u2.append_message("works for me").unwrap();

    let log = stored_copy(&store, "u1").chat_log;
    let lines: Vec<(&str, &str)> = log
        .iter()
        .map(|m| (m.author.as_str(), m.text.as_str()))
        .collect();
    assert_eq!(lines, [("u1", "library at 6?"), ("u2", "works for me")]);
}

#[test]
fn ended_session_is_picked_up_on_refresh() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    let mut u2 = device(&store, "u2", 2);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u2.load().unwrap();

    u1.end_session().unwrap();
    u2.refresh().unwrap();
    assert_eq!(u2.status(), SessionStatus::idle());
    assert!(matches!(
        u2.drain_events().last(),
        Some(Event::SessionEnded { .. })
    ));
}

#[test]
fn history_lists_sessions_newest_first() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1"]));
    let mut u1 = device(&store, "u1", 1);
    u1.start(vec!["u1".into()], date(), time()).unwrap();
    let first = u1.session().unwrap().session_id.clone();
    u1.end().unwrap();
    u1.start(vec!["u1".into()], date(), time()).unwrap();
    let second = u1.session().unwrap().session_id.clone();

    let history = u1.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].session_id, second);
    assert_eq!(history[1].session_id, first);
    assert!(!history[1].active);
}

#[test]
fn toggling_the_poll_view_is_not_replicated() {
    let store = Arc::new(MemoryRecordStore::with_users(["u1", "u2"]));
    let mut u1 = device(&store, "u1", 1);
    u1.start(vec!["u2".into()], date(), time()).unwrap();
    u1.toggle_poll_view(PollKind::Location).unwrap();
    assert!(u1
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::PollViewChanged { .. })));
    assert_eq!(
        stored_copy(&store, "u2").location_poll.unwrap().view(),
        studygroup_core::TallyView::Voting
    );
}
