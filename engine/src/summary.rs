//! End-of-session rollup of the trial ledger.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::ledger::TrialLedger;

/// Aggregate outcome counts over the completed prefix of a session.
///
/// `percent_correct` and `percent_left` are over trials where the animal
/// actually reported a choice; they are `None` before the first choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub created_at: String,
    pub trials_completed: usize,
    pub rewarded: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub broke_fixation: usize,
    pub early_withdrawal: usize,
    pub missed_choice: usize,
    pub skipped_feedback: usize,
    pub catch_trials: usize,
    pub reward_delivered_ul: f64,
    pub percent_correct: Option<f64>,
    pub percent_left: Option<f64>,
}

impl SessionSummary {
    /// Roll up the first `completed` trials of the ledger.
    pub fn collect(ledger: &TrialLedger, completed: usize) -> Self {
        let completed = completed.min(ledger.len());
        let trials = &ledger.trials()[..completed];

        let mut rewarded = 0;
        let mut correct = 0;
        let mut incorrect = 0;
        let mut broke_fixation = 0;
        let mut early_withdrawal = 0;
        let mut missed_choice = 0;
        let mut skipped_feedback = 0;
        let mut catch_trials = 0;
        let mut left_choices = 0;
        let mut choices = 0;

        for trial in trials {
            if trial.rewarded {
                rewarded += 1;
            }
            match trial.choice_correct {
                Some(true) => correct += 1,
                Some(false) => incorrect += 1,
                None => {}
            }
            if let Some(left) = trial.choice_left {
                choices += 1;
                if left {
                    left_choices += 1;
                }
            }
            if trial.fix_broke {
                broke_fixation += 1;
            }
            if trial.early_withdrawal {
                early_withdrawal += 1;
            }
            if trial.missed_choice {
                missed_choice += 1;
            }
            if trial.choice_correct.is_some() && !trial.feedback_given {
                skipped_feedback += 1;
            }
            if trial.catch_trial {
                catch_trials += 1;
            }
        }

        let fraction = |num: usize| {
            (choices > 0).then(|| num as f64 * 100.0 / choices as f64)
        };

        SessionSummary {
            created_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            trials_completed: completed,
            rewarded,
            correct,
            incorrect,
            broke_fixation,
            early_withdrawal,
            missed_choice,
            skipped_feedback,
            catch_trials,
            reward_delivered_ul: trials
                .last()
                .map(|t| t.reward_received_total)
                .unwrap_or(0.0),
            percent_correct: fraction(correct),
            percent_left: fraction(left_choices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TrialLedger;

    #[test]
    fn empty_session_has_no_percentages() {
        let ledger = TrialLedger::default();
        let summary = SessionSummary::collect(&ledger, 0);
        assert_eq!(summary.trials_completed, 0);
        assert_eq!(summary.percent_correct, None);
        assert_eq!(summary.reward_delivered_ul, 0.0);
    }

    #[test]
    fn counts_follow_the_ledger() {
        let mut ledger = TrialLedger::default();
        for i in 0..4 {
            let trial = ledger.ensure(i).unwrap();
            match i {
                0 => {
                    trial.choice_left = Some(true);
                    trial.choice_correct = Some(true);
                    trial.rewarded = true;
                    trial.feedback_given = true;
                    trial.reward_received_total = 5.5;
                }
                1 => {
                    trial.choice_left = Some(false);
                    trial.choice_correct = Some(false);
                    trial.feedback_given = true;
                    trial.reward_received_total = 5.5;
                }
                2 => {
                    trial.fix_broke = true;
                    trial.reward_received_total = 5.5;
                }
                3 => {
                    trial.choice_left = Some(true);
                    trial.choice_correct = Some(true);
                    trial.rewarded = true;
                    trial.feedback_given = true;
                    trial.reward_received_total = 11.0;
                }
                _ => unreachable!(),
            }
        }
        let summary = SessionSummary::collect(&ledger, 4);
        assert_eq!(summary.trials_completed, 4);
        assert_eq!(summary.rewarded, 2);
        assert_eq!(summary.correct, 2);
        assert_eq!(summary.incorrect, 1);
        assert_eq!(summary.broke_fixation, 1);
        assert_eq!(summary.reward_delivered_ul, 11.0);
        assert_eq!(summary.percent_correct, Some(200.0 / 3.0));
        assert_eq!(summary.percent_left, Some(200.0 / 3.0));
    }
}
