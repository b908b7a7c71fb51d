//! The per-trial outcome pass: classification of the hardware visit log,
//! interval extraction, and adaptive-parameter snapshots.

use crate::config::ExperimentType;
use crate::error::Result;
use crate::matrix::MatrixState;
use crate::sampling::catch_bin;
use crate::stimulus;
use crate::visits::TrialVisits;

use super::TrialEngine;

impl TrialEngine {
    /// Resolve trial `i` from its visit log, adapt the session parameters,
    /// and schedule the next trial's catch/opto/LED flags. Called exactly
    /// once per trial, in increasing index order.
    pub fn update(&mut self, i: usize, visits: &TrialVisits) -> Result<()> {
        self.reset_outcome(i)?;
        self.classify_outcome(i, visits)?;
        self.compute_intervals(i, visits)?;
        self.snapshot_params(i)?;
        self.adapt_stim_delay(i)?;
        self.adapt_min_sample(i)?;
        self.adapt_feedback_delay(i)?;
        self.recompute_bias(i)?;
        self.update_performance(i);
        self.maybe_generate(i)?;
        self.set_current_stim(i);
        self.schedule_next(i)?;
        Ok(())
    }

    /// Outcome fields back to their unresolved defaults. The received-water
    /// counter carries forward so it stays a session running total.
    fn reset_outcome(&mut self, i: usize) -> Result<()> {
        let carried = if i > 0 {
            self.ledger
                .get(i - 1)
                .map(|t| t.reward_received_total)
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let trial = self.ledger.ensure(i)?;
        trial.choice_left = None;
        trial.choice_correct = None;
        trial.feedback_given = true;
        trial.feedback_time = None;
        trial.fix_broke = false;
        trial.early_withdrawal = false;
        trial.missed_choice = false;
        trial.fix_duration = None;
        trial.movement_time = None;
        trial.sample_time = None;
        trial.rewarded = false;
        trial.reward_after_min_sampling = false;
        trial.reward_received_total = carried;
        Ok(())
    }

    /// Terminal classification by fixed priority: incorrect choice first,
    /// then correct, then the non-choice terminations. A log carrying states
    /// from several branches (invalid hardware data) still classifies
    /// deterministically.
    fn classify_outcome(&mut self, i: usize, visits: &TrialVisits) -> Result<()> {
        let left_rewarded = self.ledger.ensure(i)?.left_rewarded;
        let is_catch = self.ledger.ensure(i)?.catch_trial;

        if visits.contains(MatrixState::WaitForPunishStart)
            || visits.contains(MatrixState::RegisterWrongWaitCorrect)
        {
            let feedback_time = match (
                visits.first(MatrixState::WaitForPunishStart),
                visits.last(MatrixState::WaitForPunish),
            ) {
                (Some(start), Some(end)) => Some(end.end - start.start),
                // RegisterWrongWaitCorrect ended the trial before any
                // punishment wait ran.
                _ => None,
            };
            let trial = self.ledger.ensure(i)?;
            trial.choice_correct = Some(false);
            trial.choice_left = Some(!left_rewarded);
            trial.feedback_time = feedback_time;
        } else if visits.contains(MatrixState::WaitForRewardStart) {
            if is_catch {
                self.credit_catch_success(i)?;
            }
            let feedback_time = match (
                visits.first(MatrixState::WaitForRewardStart),
                visits.last(MatrixState::WaitForReward),
            ) {
                (Some(start), Some(end)) => Some(end.end - start.start),
                _ => {
                    tracing::warn!(
                        trial = i,
                        "WaitForRewardStart fired without a WaitForReward visit"
                    );
                    None
                }
            };
            let trial = self.ledger.ensure(i)?;
            trial.choice_correct = Some(true);
            trial.choice_left = Some(left_rewarded);
            trial.feedback_time = feedback_time;
        } else if visits.contains(MatrixState::BrokeFixation) {
            self.ledger.ensure(i)?.fix_broke = true;
        } else if visits.contains(MatrixState::EarlyWithdrawal) {
            self.ledger.ensure(i)?.early_withdrawal = true;
        } else if visits.contains(MatrixState::TimeoutMissedChoice) {
            let trial = self.ledger.ensure(i)?;
            trial.feedback_given = false;
            trial.missed_choice = true;
        }

        if visits.contains(MatrixState::TimeoutSkippedFeedback) {
            self.ledger.ensure(i)?.feedback_given = false;
        }
        if visits.contains(MatrixState::Reward) {
            let amount = self.params.reward_amount;
            let trial = self.ledger.ensure(i)?;
            trial.rewarded = true;
            trial.reward_received_total += amount;
        }
        if visits.contains(MatrixState::CenterPortRewardDelivery)
            && self.params.reward_after_min_sampling
        {
            let amount = self.params.center_port_rew_amount;
            let trial = self.ledger.ensure(i)?;
            trial.reward_after_min_sampling = true;
            trial.reward_received_total += amount;
        }
        Ok(())
    }

    /// Inverse-frequency catch credit: rare difficulty levels earn more per
    /// completed catch trial so bin coverage equalizes over the session.
    fn credit_catch_success(&mut self, i: usize) -> Result<()> {
        let omega = self.ledger.ensure(i)?.stimulus_omega;
        let bin = catch_bin(omega);
        let mut stim_pct = omega * 100.0;
        if stim_pct < 50.0 {
            stim_pct = 100.0 - stim_pct;
        }
        let sum = self.params.omega_table.total_prob();
        let prob = self.params.omega_table.prob_at(stim_pct).unwrap_or(0.0);
        let credit = if sum > 0.0 { (1.0 + sum - prob) / sum } else { 1.0 };
        self.ledger.credit_catch(bin, credit);
        self.ledger.last_success_catch_trial = Some(i);
        Ok(())
    }

    /// Timing fields from matched state intervals. A missing state leaves
    /// the field `None`; reaction time uses `-1` instead so "state absent"
    /// stays distinguishable from "not computed".
    fn compute_intervals(&mut self, i: usize, visits: &TrialVisits) -> Result<()> {
        let fix_duration = visits.last(MatrixState::WaitForStimulus).map(|wait| {
            let trigger = visits
                .last(MatrixState::TriggerWaitForStimulus)
                .map(|v| v.duration())
                .unwrap_or(0.0);
            wait.duration() + trigger
        });

        let sample_time = visits.first(MatrixState::StimulusDelivery).map(|stim| {
            if !self.params.reward_after_min_sampling
                && self.params.stimulus_time > self.params.min_sample
            {
                // Min sampling completed and the optional-sampling stage was
                // entered: sample time runs to the center reward state.
                match visits.first(MatrixState::CenterPortRewardDelivery) {
                    Some(center) => center.end - stim.start,
                    None => stim.duration(),
                }
            } else {
                stim.duration()
            }
        });

        let movement_time = if !visits.contains(MatrixState::TimeoutMissedChoice) {
            visits
                .first(MatrixState::WaitForChoice)
                .map(|v| v.duration())
        } else {
            None
        };

        let reaction_time = visits
            .first(MatrixState::WaitCenterPortOut)
            .map(|v| v.duration())
            .or(Some(-1.0));

        let trial = self.ledger.ensure(i)?;
        trial.fix_duration = fix_duration;
        trial.sample_time = sample_time;
        trial.movement_time = movement_time;
        trial.reaction_time = reaction_time;
        Ok(())
    }

    /// Record the adaptive values that were in effect while trial `i` ran,
    /// and carry the reward settings forward onto the next record.
    fn snapshot_params(&mut self, i: usize) -> Result<()> {
        let stim_delay = self.params.stim_delay;
        let min_sample = self.params.min_sample;
        let feedback_delay = self.params.feedback_delay;
        let grating = if self.params.experiment_type == ExperimentType::GratingOrientation {
            let trial = self.ledger.ensure(i)?;
            Some(if trial.left_rewarded {
                self.params.visual_stim_angle_port_left.degrees()
            } else {
                self.params.visual_stim_angle_port_right.degrees()
            })
        } else {
            None
        };

        let trial = self.ledger.ensure(i)?;
        trial.stim_delay = stim_delay;
        trial.min_sample = min_sample;
        trial.feedback_delay = feedback_delay;
        trial.grating_orientation = grating;

        if i + 1 < self.ledger.capacity() {
            let reward = self.params.reward_amount;
            let center = self.params.center_port_rew_amount;
            let pre_stim = self.params.pre_stim_delay_cntr_reward;
            let next = self.ledger.ensure(i + 1)?;
            next.reward_magnitude = [reward, reward];
            next.center_port_rew_amount = center;
            next.pre_stim_cntr_reward = pre_stim;
        }
        Ok(())
    }

    /// Live readout of the upcoming trial's stimulus.
    fn set_current_stim(&mut self, i: usize) {
        if let Some(next) = self.ledger.get(i + 1) {
            self.params.current_stim =
                stimulus::format_current_stim(self.params.experiment_type, next.decision_variable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskParameters;
    use crate::visits::TrialVisits;

    fn resolved_engine(params: TaskParameters) -> TrialEngine {
        let mut engine = TrialEngine::new(params, 9);
        engine.assign_future_trials(0, 10).unwrap();
        engine
    }

    fn reward_log() -> TrialVisits {
        let mut log = TrialVisits::new();
        log.push(MatrixState::WaitForStimulus, 0.0, 0.2);
        log.push(MatrixState::TriggerWaitForStimulus, 0.2, 0.25);
        log.push(MatrixState::StimulusDelivery, 0.3, 0.6);
        log.push(MatrixState::WaitCenterPortOut, 0.6, 0.7);
        log.push(MatrixState::WaitForChoice, 0.7, 1.4);
        log.push(MatrixState::WaitForRewardStart, 10.0, 10.0);
        log.push(MatrixState::WaitForReward, 10.0, 10.3);
        log.push(MatrixState::Reward, 10.3, 10.4);
        log
    }

    #[test]
    fn correct_choice_fills_feedback_time_and_sides() {
        let mut engine = resolved_engine(TaskParameters::default());
        let left_rewarded = engine.ledger.get(0).unwrap().left_rewarded;
        engine.update(0, &reward_log()).unwrap();
        let trial = engine.ledger.get(0).unwrap();
        assert_eq!(trial.choice_correct, Some(true));
        assert_eq!(trial.choice_left, Some(left_rewarded));
        assert!((trial.feedback_time.unwrap() - 0.3).abs() < 1e-12);
        assert!(trial.rewarded);
        assert!((trial.reward_received_total - 5.5).abs() < 1e-12);
    }

    #[test]
    fn conflicting_log_classifies_as_incorrect_first() {
        let mut engine = resolved_engine(TaskParameters::default());
        let mut log = reward_log();
        log.push(MatrixState::WaitForPunishStart, 9.0, 9.0);
        log.push(MatrixState::WaitForPunish, 9.0, 9.5);
        let left_rewarded = engine.ledger.get(0).unwrap().left_rewarded;
        engine.update(0, &log).unwrap();
        let trial = engine.ledger.get(0).unwrap();
        assert_eq!(trial.choice_correct, Some(false));
        assert_eq!(trial.choice_left, Some(!left_rewarded));
        assert!((trial.feedback_time.unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_reward_wait_leaves_feedback_time_unset() {
        let mut engine = resolved_engine(TaskParameters::default());
        let mut log = TrialVisits::new();
        log.push(MatrixState::WaitForRewardStart, 5.0, 5.0);
        engine.update(0, &log).unwrap();
        let trial = engine.ledger.get(0).unwrap();
        assert_eq!(trial.choice_correct, Some(true));
        assert_eq!(trial.feedback_time, None);
    }

    #[test]
    fn broke_fixation_and_early_withdrawal_are_exclusive_flags() {
        let mut engine = resolved_engine(TaskParameters::default());
        let mut log = TrialVisits::new();
        log.push(MatrixState::BrokeFixation, 1.0, 1.5);
        log.push(MatrixState::EarlyWithdrawal, 2.0, 2.5);
        engine.update(0, &log).unwrap();
        let trial = engine.ledger.get(0).unwrap();
        assert!(trial.fix_broke);
        assert!(!trial.early_withdrawal);
    }

    #[test]
    fn missed_choice_clears_feedback_and_movement_time() {
        let mut engine = resolved_engine(TaskParameters::default());
        let mut log = TrialVisits::new();
        log.push(MatrixState::WaitForChoice, 1.0, 11.0);
        log.push(MatrixState::TimeoutMissedChoice, 11.0, 12.0);
        engine.update(0, &log).unwrap();
        let trial = engine.ledger.get(0).unwrap();
        assert!(trial.missed_choice);
        assert!(!trial.feedback_given);
        assert_eq!(trial.movement_time, None);
        assert_eq!(trial.reaction_time, Some(-1.0));
    }

    #[test]
    fn catch_success_credits_the_difficulty_bin() {
        let mut engine = resolved_engine(TaskParameters::default());
        let omega = engine.ledger.get(0).unwrap().stimulus_omega;
        engine.ledger.ensure(0).unwrap().catch_trial = true;
        let bin = catch_bin(omega);
        engine.update(0, &reward_log()).unwrap();
        assert!(engine.ledger.catch_count[bin] > 0.0);
        assert_eq!(engine.ledger.last_success_catch_trial, Some(0));
    }

    #[test]
    fn reward_total_accumulates_across_trials() {
        let mut engine = resolved_engine(TaskParameters::default());
        engine.update(0, &reward_log()).unwrap();
        engine.update(1, &reward_log()).unwrap();
        assert!(
            (engine.ledger.get(1).unwrap().reward_received_total - 11.0).abs() < 1e-12
        );
    }

    #[test]
    fn update_triggers_pre_generation_past_watermark() {
        let mut engine = TrialEngine::new(TaskParameters::default(), 4);
        engine.assign_future_trials(0, 1).unwrap();
        engine.update(0, &reward_log()).unwrap();
        assert!(engine.ledger.generated() >= 2);
        assert!(!engine.params.current_stim.is_empty());
    }
}
