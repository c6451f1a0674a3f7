//! Group polls: the vote tally and the countdown that closes it.

mod tally;
mod timer;

pub use tally::{OptionResult, TallyView, VoteTally};
pub use timer::{PollKind, PollOutcome, PollPhase, PollSnapshot, PollTimer};
