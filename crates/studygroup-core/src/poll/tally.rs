//! Multi-option ballot shared by the location and break-activity polls.
//!
//! Each option label maps to the set of voters who currently select it.
//! A voter may select several options. The tally is plain data: it is
//! stored in the session record and replicated with it.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Which face of the poll the UI should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyView {
    #[default]
    Voting,
    Results,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteTally {
    options: IndexMap<String, BTreeSet<String>>,
    #[serde(default)]
    view: TallyView,
}

/// One row of a tally snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionResult {
    pub label: String,
    pub votes: usize,
    pub percentage: f64,
}

impl VoteTally {
    /// All options start unselected. Labels are case-sensitive and must be unique.
    pub fn initialize<I, S>(options: I) -> Result<Self, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tally = Self::default();
        for option in options {
            tally.add_option(option)?;
        }
        Ok(tally)
    }

    pub fn add_option(&mut self, label: impl Into<String>) -> Result<(), SessionError> {
        let label = label.into();
        if self.options.contains_key(&label) {
            return Err(SessionError::DuplicateOption(label));
        }
        self.options.insert(label, BTreeSet::new());
        Ok(())
    }

    pub fn set_option(
        &mut self,
        voter: &str,
        option: &str,
        selected: bool,
    ) -> Result<(), SessionError> {
        let voters = self
            .options
            .get_mut(option)
            .ok_or_else(|| SessionError::UnknownOption(option.to_string()))?;
        if selected {
            voters.insert(voter.to_string());
        } else {
            voters.remove(voter);
        }
        Ok(())
    }

    /// Drop every selection `voter` made. Returns whether anything changed.
    pub fn withdraw_voter(&mut self, voter: &str) -> bool {
        let mut changed = false;
        for voters in self.options.values_mut() {
            changed |= voters.remove(voter);
        }
        changed
    }

    pub fn is_selected(&self, voter: &str, option: &str) -> bool {
        self.options
            .get(option)
            .is_some_and(|voters| voters.contains(voter))
    }

    pub fn contains(&self, option: &str) -> bool {
        self.options.contains_key(option)
    }

    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn count(&self, option: &str) -> usize {
        self.options.get(option).map_or(0, BTreeSet::len)
    }

    pub fn total_votes(&self) -> usize {
        self.options.values().map(BTreeSet::len).sum()
    }

    /// Share of all selections that went to `option`, 0.0..=100.0.
    /// Zero when nothing has been selected anywhere.
    pub fn percentage(&self, option: &str) -> f64 {
        let total = self.total_votes();
        if total == 0 {
            return 0.0;
        }
        self.count(option) as f64 / total.max(1) as f64 * 100.0
    }

    /// Options tied for the highest non-zero count, or every option when
    /// nobody voted.
    pub fn candidates(&self) -> Vec<&str> {
        let max = self.options.values().map(BTreeSet::len).max().unwrap_or(0);
        if max == 0 {
            return self.options().collect();
        }
        self.options
            .iter()
            .filter(|(_, voters)| voters.len() == max)
            .map(|(label, _)| label.as_str())
            .collect()
    }

    /// Pick the winner uniformly among [`candidates`](Self::candidates).
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.candidates().choose(rng).map(|s| s.to_string())
    }

    pub fn view(&self) -> TallyView {
        self.view
    }

    pub fn show_results(&mut self) {
        self.view = TallyView::Results;
    }

    pub fn show_voting(&mut self) {
        self.view = TallyView::Voting;
    }

    pub fn results(&self) -> Vec<OptionResult> {
        self.options
            .iter()
            .map(|(label, voters)| OptionResult {
                label: label.clone(),
                votes: voters.len(),
                percentage: self.percentage(label),
            })
            .collect()
    }
}
