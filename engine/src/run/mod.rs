//! The stateful trial engine: pre-generates future trials' stimulus/side
//! assignments and post-processes completed trials into outcomes and
//! parameter adaptations.
//!
//! Single-threaded and trial-sequential: `update(i)` is called
//! exactly once per resolved trial, in increasing order of `i`, and no
//! trial's state is touched until the previous `update` returned.

mod adapt;
mod update;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{StimulusSelection, TaskParameters};
use crate::error::Result;
use crate::ledger::TrialLedger;
use crate::sampling::{beta_omega, controlled_random};
use crate::stimulus;

/// How many future trials each generation pass appends past the current one.
pub const PRE_GENERATE_TRIAL_COUNT: usize = 5;

/// Completed trials needed before bias correction may kick in.
const BIAS_CORRECT_MIN_TRIALS: usize = 7;

pub struct TrialEngine {
    pub params: TaskParameters,
    pub ledger: TrialLedger,
    rng: StdRng,
}

impl TrialEngine {
    /// Engine with a fresh ledger and a seeded RNG stream (deterministic
    /// replay in tests; seed from entropy for live sessions).
    pub fn new(params: TaskParameters, seed: u64) -> Self {
        Self {
            params,
            ledger: TrialLedger::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_ledger(params: TaskParameters, ledger: TrialLedger, seed: u64) -> Self {
        Self {
            params,
            ledger,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pre-generate stimulus/side assignments for trials
    /// `[start_index, start_index + count)` using the session's configured
    /// left bias.
    pub fn assign_future_trials(&mut self, start_index: usize, count: usize) -> Result<()> {
        let bias = self.params.left_bias;
        self.assign_future_trials_with_bias(start_index, count, bias)
    }

    /// The left bias a batch generated right after `update(i)` would use:
    /// the computed bias (snapped to 0.5 inside the ±0.05 dead-band) once
    /// correction is active, the static setting otherwise.
    pub fn next_batch_bias(&self, next_index: usize) -> f64 {
        if self.params.correct_bias && next_index > BIAS_CORRECT_MIN_TRIALS {
            let bias = self.params.calc_left_bias;
            if (0.45..=0.55).contains(&bias) {
                0.5
            } else {
                bias
            }
        } else {
            self.params.left_bias
        }
    }

    fn assign_future_trials_with_bias(
        &mut self,
        start_index: usize,
        count: usize,
        left_bias: f64,
    ) -> Result<()> {
        self.ledger.check_capacity(start_index, count)?;
        // Exact-ratio side pre-assignment: guarantees the left/right count
        // balance across the batch no matter how the stimulus policy skews.
        let is_left_rewarded = controlled_random(&mut self.rng, 1.0 - left_bias, count);

        for (a, &side_is_left) in is_left_rewarded.iter().enumerate() {
            let index = start_index + a;
            let easy = index <= self.params.start_easy_trials;

            let fifty_fifty =
                self.rng.gen::<f64>() < self.params.percent_50_fifty && index > self.params.start_easy_trials;
            let omega = if fifty_fifty {
                0.5
            } else {
                let mut omega = match self.params.stimulus_selection {
                    StimulusSelection::BetaDistribution { alpha } => {
                        // Easy trials push draws toward the extremes.
                        let alpha = if easy { alpha / 4.0 } else { alpha };
                        beta_omega(&mut self.rng, alpha)?
                    }
                    StimulusSelection::DiscretePairs => {
                        let pct = if easy {
                            self.params
                                .omega_table
                                .first_active()
                                .map(|e| e.omega)
                                .unwrap_or(50.0)
                        } else {
                            self.params.omega_table.sample(&mut self.rng)
                        };
                        pct / 100.0
                    }
                };
                // Reflect about 0.5 when the draw disagrees with the
                // pre-assigned side. Reflection of a boundary-clamped beta
                // draw can land a hair outside the clamp, so re-clamp.
                if (side_is_left && omega < 0.5) || (!side_is_left && omega >= 0.5) {
                    omega = 1.0 - omega;
                    if matches!(
                        self.params.stimulus_selection,
                        StimulusSelection::BetaDistribution { .. }
                    ) {
                        omega = omega.clamp(0.1, 0.9);
                    }
                }
                omega
            };

            let coin_flip = self.rng.gen_bool(0.5);
            let reward_amount = self.params.reward_amount;
            let center_amount = self.params.center_port_rew_amount;
            let pre_stim_reward = self.params.pre_stim_delay_cntr_reward;
            let experiment = self.params.experiment_type;

            let trial = self.ledger.ensure(index)?;
            trial.stimulus_omega = omega;
            trial.left_rewarded = if omega == 0.5 { coin_flip } else { omega > 0.5 };
            trial.reward_magnitude = [reward_amount, reward_amount];
            trial.center_port_rew_amount = center_amount;
            trial.pre_stim_cntr_reward = pre_stim_reward;
            // The modality transform may override the omega-derived side.
            stimulus::apply_dv(experiment, trial);
        }

        self.ledger.advance_generated(start_index + count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentType;

    fn engine_with(params: TaskParameters) -> TrialEngine {
        TrialEngine::new(params, 42)
    }

    #[test]
    fn batch_side_counts_are_exact() {
        // NoStimulus keeps the DV at zero so the pre-override assignment is
        // observable directly.
        let params = TaskParameters {
            experiment_type: ExperimentType::NoStimulus,
            percent_50_fifty: 0.0,
            left_bias: 0.3,
            ..TaskParameters::default()
        };
        let mut engine = engine_with(params);
        engine.assign_future_trials(0, 100).unwrap();
        let lefts = engine
            .ledger
            .trials()
            .iter()
            .filter(|t| t.left_rewarded)
            .count();
        // ones ratio = 1 - left_bias = 0.7
        assert_eq!(lefts, 70);
    }

    #[test]
    fn warm_up_pins_easiest_discrete_level() {
        let params = TaskParameters {
            start_easy_trials: 10,
            percent_catch: 0.0,
            ..TaskParameters::default()
        };
        let mut engine = engine_with(params);
        engine.assign_future_trials(0, 11).unwrap();
        for trial in &engine.ledger.trials()[..11] {
            // Easiest active level is 100% => omega 1.0 or its reflection.
            let omega = trial.stimulus_omega;
            assert!(
                (omega - 1.0).abs() < 1e-12 || omega.abs() < 1e-12,
                "warm-up trial drew omega {omega}"
            );
        }
    }

    #[test]
    fn post_warm_up_draws_span_the_table() {
        let params = TaskParameters {
            start_easy_trials: 0,
            ..TaskParameters::default()
        };
        let mut engine = engine_with(params);
        engine.assign_future_trials(1, 200).unwrap();
        let distinct: std::collections::BTreeSet<i64> = engine.ledger.trials()[1..]
            .iter()
            .map(|t| (t.stimulus_omega * 100.0).round() as i64)
            .collect();
        assert!(distinct.len() > 3, "only {distinct:?}");
    }

    #[test]
    fn beta_policy_respects_clamp() {
        let params = TaskParameters {
            stimulus_selection: StimulusSelection::BetaDistribution { alpha: 0.3 },
            start_easy_trials: 0,
            ..TaskParameters::default()
        };
        let mut engine = engine_with(params);
        engine.assign_future_trials(0, 300).unwrap();
        for trial in engine.ledger.trials() {
            assert!((0.1..=0.9).contains(&trial.stimulus_omega));
        }
    }

    #[test]
    fn generation_past_capacity_fails() {
        let params = TaskParameters::default();
        let mut engine = TrialEngine::with_ledger(params, TrialLedger::with_capacity(10), 1);
        assert!(engine.assign_future_trials(8, 3).is_err());
        assert!(engine.assign_future_trials(8, 2).is_ok());
        assert_eq!(engine.ledger.generated(), 10);
    }

    #[test]
    fn bias_dead_band_snaps_to_half() {
        let mut params = TaskParameters::default();
        params.correct_bias = true;
        params.calc_left_bias = 0.52;
        let engine = engine_with(params);
        assert_eq!(engine.next_batch_bias(20), 0.5);

        let mut params = TaskParameters::default();
        params.correct_bias = true;
        params.calc_left_bias = 0.6;
        let engine = engine_with(params);
        assert_eq!(engine.next_batch_bias(20), 0.6);
    }

    #[test]
    fn bias_correction_waits_for_enough_trials() {
        let mut params = TaskParameters::default();
        params.correct_bias = true;
        params.calc_left_bias = 0.9;
        params.left_bias = 0.5;
        let engine = engine_with(params);
        assert_eq!(engine.next_batch_bias(3), 0.5);
        assert_eq!(engine.next_batch_bias(20), 0.9);
    }
}
