//! The per-trial hardware visit log: which states the controller actually
//! entered, with start/end timestamps in session seconds.
//!
//! A state may occur more than once per trial (e.g. repeated `WaitForChoice`
//! under habituate-ignore-incorrect); consumers pick the first or last
//! occurrence per field as documented in the outcome classifier.

use serde::{Deserialize, Serialize};

use crate::matrix::{MatrixState, UnknownStateName};

/// One state occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub state: MatrixState,
    pub start: f64,
    pub end: f64,
}

impl Visit {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered visit log for a single trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialVisits {
    visits: Vec<Visit>,
}

impl TrialVisits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, state: MatrixState, start: f64, end: f64) {
        self.visits.push(Visit { state, start, end });
    }

    /// Build from the raw `(name, start, end)` tuples a hardware session
    /// reports. Unknown state names are an error: they mean the log belongs
    /// to a different protocol.
    pub fn from_named(
        raw: &[(String, f64, f64)],
    ) -> Result<Self, UnknownStateName> {
        let mut log = Self::new();
        for (name, start, end) in raw {
            log.push(name.parse()?, *start, *end);
        }
        Ok(log)
    }

    pub fn contains(&self, state: MatrixState) -> bool {
        self.visits.iter().any(|v| v.state == state)
    }

    pub fn first(&self, state: MatrixState) -> Option<&Visit> {
        self.visits.iter().find(|v| v.state == state)
    }

    pub fn last(&self, state: MatrixState) -> Option<&Visit> {
        self.visits.iter().rev().find(|v| v.state == state)
    }

    pub fn occurrences(&self, state: MatrixState) -> impl Iterator<Item = &Visit> {
        self.visits.iter().filter(move |v| v.state == state)
    }

    /// Total time spent across all occurrences of a state.
    pub fn total_duration(&self, state: MatrixState) -> Option<f64> {
        let mut total = None;
        for visit in self.occurrences(state) {
            *total.get_or_insert(0.0) += visit.duration();
        }
        total
    }

    pub fn iter(&self) -> impl Iterator<Item = &Visit> {
        self.visits.iter()
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_last_pick_the_right_occurrence() {
        let mut log = TrialVisits::new();
        log.push(MatrixState::WaitForChoice, 1.0, 2.0);
        log.push(MatrixState::Reward, 2.0, 2.5);
        log.push(MatrixState::WaitForChoice, 3.0, 4.5);
        assert_eq!(log.first(MatrixState::WaitForChoice).unwrap().start, 1.0);
        assert_eq!(log.last(MatrixState::WaitForChoice).unwrap().end, 4.5);
        assert_eq!(log.total_duration(MatrixState::WaitForChoice), Some(2.5));
        assert_eq!(log.total_duration(MatrixState::Punishment), None);
    }

    #[test]
    fn from_named_rejects_unknown_states() {
        let raw = vec![("NoSuchState".to_string(), 0.0, 1.0)];
        assert!(TrialVisits::from_named(&raw).is_err());
        let raw = vec![("WaitForStimulus".to_string(), 0.0, 1.0)];
        let log = TrialVisits::from_named(&raw).unwrap();
        assert!(log.contains(MatrixState::WaitForStimulus));
    }
}
