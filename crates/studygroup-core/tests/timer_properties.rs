//! Property tests for duration bounds and poll tie-breaking.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::collections::HashSet;
use studygroup_core::{
    DurationBounds, PhaseEnd, PomodoroPhase, PomodoroTimer, SessionError, TimerConfig, VoteTally,
};

fn timer() -> PomodoroTimer {
    PomodoroTimer::new(TimerConfig::default(), DurationBounds::default(), 1).unwrap()
}

proptest! {
    #[test]
    fn in_range_pair_runs_one_full_study_phase(study in 60u64..=3600, brk in 60u64..=3600) {
        let mut t = timer();
        prop_assert!(t.configure(study, brk).is_ok());
        prop_assert_eq!(t.config().study_duration_secs, study);
        prop_assert_eq!(t.config().break_duration_secs, brk);

        t.start();
        for _ in 1..study {
            prop_assert_eq!(t.tick(), None);
        }
        prop_assert_eq!(t.tick(), Some(PhaseEnd::StudyFinished { round: 1 }));
        prop_assert_eq!(t.phase(), PomodoroPhase::BreakVoting);
        for _ in 0..5 {
            prop_assert_eq!(t.tick(), None);
        }
    }

    #[test]
    fn out_of_range_study_is_rejected(
        study in prop_oneof![0u64..60, 3601u64..100_000],
        brk in 60u64..=3600,
    ) {
        let mut t = timer();
        let before = t.config();
        let is_invalid = matches!(
            t.configure(study, brk),
            Err(SessionError::InvalidDuration { field: "study_duration_secs", .. })
        );
        prop_assert!(is_invalid);
        prop_assert_eq!(t.config(), before);
    }

    #[test]
    fn out_of_range_break_is_rejected(
        study in 60u64..=3600,
        brk in prop_oneof![0u64..60, 3601u64..100_000],
    ) {
        let mut t = timer();
        let before = t.config();
        prop_assert!(t.configure(study, brk).is_err());
        prop_assert_eq!(t.config(), before);
    }

    #[test]
    fn winner_always_has_the_most_votes(
        votes in proptest::collection::vec((0usize..4, 0usize..3), 1..20),
        seed in any::<u64>(),
    ) {
        let options = ["Library", "Cafe", "Study Room"];
        let mut tally = VoteTally::initialize(options).unwrap();
        for (voter, option) in &votes {
            tally.set_option(&format!("u{voter}"), options[*option], true).unwrap();
        }
        let max = options.iter().map(|o| tally.count(o)).max().unwrap();
        let winner = tally.resolve(&mut Pcg64::seed_from_u64(seed)).unwrap();
        prop_assert_eq!(tally.count(&winner), max);
    }
}

#[test]
fn tie_break_picks_only_among_tied_options() {
    let mut tally = VoteTally::initialize(["Take a walk", "Phone break", "Stretch"]).unwrap();
    tally.set_option("u1", "Take a walk", true).unwrap();
    tally.set_option("u2", "Phone break", true).unwrap();

    let mut rng = Pcg64::seed_from_u64(7);
    let winners: HashSet<String> = (0..500)
        .map(|_| tally.resolve(&mut rng).unwrap())
        .collect();
    assert_eq!(
        winners,
        HashSet::from(["Take a walk".to_string(), "Phone break".to_string()])
    );
}

#[test]
fn zero_votes_picks_among_all_options() {
    let tally = VoteTally::initialize(["Take a walk", "Phone break"]).unwrap();
    let mut rng = Pcg64::seed_from_u64(99);
    let winners: HashSet<String> = (0..500)
        .map(|_| tally.resolve(&mut rng).unwrap())
        .collect();
    assert_eq!(winners.len(), 2);
}
