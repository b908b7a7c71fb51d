//! Post-trial parameter adaptation and next-trial scheduling.
//!
//! All of these run inside `update(i)` after the outcome fields for trial
//! `i` are final; scheduling steps write the future fields of trial `i + 1`.

use std::collections::BTreeSet;

use rand::Rng;

use crate::config::{FeedbackDelayPolicy, MinSamplePolicy, StimulusSelection};
use crate::error::Result;
use crate::sampling::{catch_bin, truncated_exponential};

use super::{TrialEngine, PRE_GENERATE_TRIAL_COUNT};

/// Trailing window for both bias correction and the recent-performance
/// readout.
const LAST_TRIALS_WINDOW: usize = 20;

impl TrialEngine {
    /// Stimulus-delay adaptation. Auto-increment steps the delay up on
    /// success and down on fixation break; otherwise the delay is redrawn
    /// uniformly, freezing on fixation break.
    pub(super) fn adapt_stim_delay(&mut self, i: usize) -> Result<()> {
        let trial = self.ledger.ensure(i)?;
        let fix_broke = trial.fix_broke;
        let snapshot = trial.stim_delay;
        let p = &mut self.params;
        if p.stim_delay_autoincrement {
            p.stim_delay = if fix_broke {
                (snapshot - p.stim_delay_decr).clamp(p.stim_delay_min, p.stim_delay_max)
            } else {
                (snapshot + p.stim_delay_incr).clamp(p.stim_delay_min, p.stim_delay_max)
            };
        } else if !fix_broke {
            p.stim_delay = self.rng.gen_range(p.stim_delay_min..=p.stim_delay_max);
        } else {
            p.stim_delay = snapshot;
        }
        Ok(())
    }

    /// Min-sampling-time adaptation, active only past the warm-up window.
    pub(super) fn adapt_min_sample(&mut self, i: usize) -> Result<()> {
        if i <= self.params.start_easy_trials {
            return Ok(());
        }
        let trial = self.ledger.ensure(i)?;
        let fix_broke = trial.fix_broke;
        let rewarded = trial.rewarded;
        let early_withdrawal = trial.early_withdrawal;
        let snapshot = trial.min_sample;
        let p = &mut self.params;
        match p.min_sample_policy {
            MinSamplePolicy::FixMin => p.min_sample = p.min_sample_min,
            MinSamplePolicy::AutoIncrement { incr, decr } => {
                if !fix_broke {
                    if rewarded {
                        p.min_sample =
                            (snapshot + incr).clamp(p.min_sample_min, p.min_sample_max);
                    } else if early_withdrawal {
                        p.min_sample =
                            (snapshot - decr).clamp(p.min_sample_min, p.min_sample_max);
                    }
                } else {
                    // Re-clamp only: the bounds may have been edited live.
                    p.min_sample = snapshot.clamp(p.min_sample_min, p.min_sample_max);
                }
            }
            MinSamplePolicy::RandBetMinMax { rand_prob } => {
                p.min_sample = if self.rng.gen::<f64>() < rand_prob {
                    self.rng.gen_range(p.min_sample_min..=p.min_sample_max)
                } else {
                    p.min_sample_max
                };
            }
            MinSamplePolicy::RandNumIntervals {
                rand_prob,
                num_intervals,
            } => {
                p.min_sample = if self.rng.gen::<f64>() >= rand_prob {
                    p.min_sample_max
                } else if num_intervals <= 1 {
                    p.min_sample_min
                } else {
                    let step =
                        (p.min_sample_max - p.min_sample_min) / (num_intervals - 1) as f64;
                    let idx = self.rng.gen_range(0..num_intervals);
                    p.min_sample_min + step * idx as f64
                };
            }
        }
        Ok(())
    }

    /// Feedback-delay adaptation.
    pub(super) fn adapt_feedback_delay(&mut self, i: usize) -> Result<()> {
        let trial = self.ledger.ensure(i)?;
        let feedback_given = trial.feedback_given;
        let snapshot = trial.feedback_delay;
        let p = &mut self.params;
        match p.feedback_delay_policy {
            FeedbackDelayPolicy::None => p.feedback_delay = 0.0,
            FeedbackDelayPolicy::AutoIncrement { incr, decr } => {
                p.feedback_delay = if feedback_given {
                    (snapshot + incr).clamp(p.feedback_delay_min, p.feedback_delay_max)
                } else {
                    (snapshot - decr).clamp(p.feedback_delay_min, p.feedback_delay_max)
                };
            }
            FeedbackDelayPolicy::TruncatedExponential { tau } => {
                p.feedback_delay = truncated_exponential(
                    &mut self.rng,
                    p.feedback_delay_min,
                    p.feedback_delay_max,
                    tau,
                )?;
            }
            FeedbackDelayPolicy::Fixed => p.feedback_delay = p.feedback_delay_max,
        }
        Ok(())
    }

    /// Side-bias estimate over the trailing window. A side with no resolved
    /// trials borrows the complement of the other side's completion rate so
    /// a starved side is not starved further.
    pub(super) fn recompute_bias(&mut self, i: usize) -> Result<()> {
        let start = i.saturating_sub(LAST_TRIALS_WINDOW);
        let window = &self.ledger.trials()[start..=i.min(self.ledger.len() - 1)];

        let mut left_rewd = 0usize;
        let mut left_done = 0usize;
        let mut right_rewd = 0usize;
        let mut right_done = 0usize;
        for trial in window {
            let correct = trial.choice_correct == Some(true);
            match trial.choice_left {
                Some(true) => {
                    if correct {
                        left_rewd += 1;
                    }
                }
                Some(false) => {
                    if correct {
                        right_rewd += 1;
                    }
                }
                None => {}
            }
            if trial.choice_left.is_some() {
                if trial.left_rewarded {
                    left_done += 1;
                } else {
                    right_done += 1;
                }
            }
        }

        // The inferred performance scales with how many trials the other
        // side actually completed, so a handful of completions is enough to
        // pull the bias toward the starved side.
        let inferred = |other_rewd: usize, other_done: usize| {
            let denom = if other_done > 0 {
                (other_done * 2) as f64
            } else {
                1.0
            };
            1.0 - other_rewd as f64 / (denom * 2.0)
        };
        let perf_l = if left_done == 0 {
            inferred(right_rewd, right_done)
        } else {
            left_rewd as f64 / left_done as f64
        };
        let perf_r = if right_done == 0 {
            inferred(left_rewd, left_done)
        } else {
            right_rewd as f64 / right_done as f64
        };
        self.params.calc_left_bias = (perf_l - perf_r) / 2.0 + 0.5;
        Ok(())
    }

    /// Rewarded fraction, overall and over the trailing window, as display
    /// strings.
    pub(super) fn update_performance(&mut self, i: usize) {
        let resolved = &self.ledger.trials()[..=(i.min(self.ledger.len() - 1))];
        let choice_made = resolved
            .iter()
            .filter(|t| t.choice_correct.is_some())
            .count();
        let rewarded = resolved.iter().filter(|t| t.rewarded).count();
        if choice_made == 0 {
            return;
        }

        let mut performance = format!(
            "{:.2}%/{}T",
            rewarded as f64 / choice_made as f64 * 100.0,
            choice_made
        );
        let mut all_performance =
            format!("{:.2}%/{}T", rewarded as f64 / (i + 1) as f64 * 100.0, i + 1);

        if i >= LAST_TRIALS_WINDOW {
            let tail = &resolved[resolved.len() - LAST_TRIALS_WINDOW..];
            let tail_choice = tail.iter().filter(|t| t.choice_correct.is_some()).count();
            let tail_rewarded = tail.iter().filter(|t| t.rewarded).count();
            performance.push_str(&format!(
                " - {:.2}%/{}T",
                tail_choice as f64 / LAST_TRIALS_WINDOW as f64 * 100.0,
                LAST_TRIALS_WINDOW
            ));
            all_performance.push_str(&format!(
                " - {:.2}%/{}T",
                tail_rewarded as f64 / LAST_TRIALS_WINDOW as f64 * 100.0,
                LAST_TRIALS_WINDOW
            ));
        }
        self.params.performance = performance;
        self.params.all_performance = all_performance;
    }

    /// Pre-generate the next batch once the watermark is within one trial
    /// of the current index, under the bias-corrected left ratio.
    pub(super) fn maybe_generate(&mut self, i: usize) -> Result<()> {
        if i + 1 < self.ledger.generated() {
            return Ok(());
        }
        let bias = self.next_batch_bias(i + 1);
        if self.params.stimulus_selection == StimulusSelection::DiscretePairs {
            self.params.omega_table.renormalize();
        }
        self.params.omega_table.update_rdk();
        let start = i + 1;
        let count = PRE_GENERATE_TRIAL_COUNT.min(self.ledger.capacity().saturating_sub(start));
        if count == 0 {
            return Ok(());
        }
        self.assign_future_trials_with_bias(start, count, bias)
    }

    /// Catch/opto/forced-LED flags for trial `i + 1`.
    pub(super) fn schedule_next(&mut self, i: usize) -> Result<()> {
        if i + 1 >= self.ledger.capacity() {
            return Ok(());
        }

        let opto = self.rng.gen::<f64>() < self.params.opto_prob
            && i >= self.params.start_easy_trials;
        let catch = self.next_is_catch(i)?;
        let forced_led = self.params.port_led_to_cue_reward
            && self.rng.gen::<f64>() < self.params.percent_forced_led_trial;

        let next = self.ledger.ensure(i + 1)?;
        next.opto_enabled = opto;
        next.catch_trial = catch;
        next.forced_led_trial = forced_led;
        Ok(())
    }

    /// The catch scheduler targets one catch trial per `round(1/p)` trials
    /// with a 20% tolerance band. Inside the band, only the difficulty bins
    /// with the least accumulated credit are eligible (ties resolved by bin
    /// membership over the ascending bin set); past the band a catch trial
    /// is forced.
    fn next_is_catch(&mut self, i: usize) -> Result<bool> {
        if i < self.params.start_easy_trials || self.params.percent_catch == 0.0 {
            return Ok(false);
        }
        let every_n = (1.0 / self.params.percent_catch).round();
        let limit = (every_n * 0.2).round();
        let lower = (every_n - limit) as usize;
        let upper = (every_n + limit) as usize;
        let last = self.ledger.last_success_catch_trial.unwrap_or(0);

        let rewarded = self.ledger.ensure(i)?.rewarded;
        if !rewarded || i + 1 < last + lower {
            return Ok(false);
        }
        if i + 1 >= last + upper {
            return Ok(true);
        }

        // Eligible bins: both sides of every active difficulty level.
        let active: BTreeSet<usize> = self
            .params
            .omega_table
            .entries
            .iter()
            .filter(|e| e.prob > 0.0)
            .flat_map(|e| {
                let omega = e.omega / 100.0;
                [catch_bin(omega), catch_bin(1.0 - omega)]
            })
            .collect();
        let min_credit = active
            .iter()
            .map(|&b| self.ledger.catch_count[b].floor() as i64)
            .min()
            .unwrap_or(0);
        let eligible: BTreeSet<usize> = active
            .into_iter()
            .filter(|&b| self.ledger.catch_count[b].floor() as i64 == min_credit)
            .collect();
        let next_omega = self.ledger.ensure(i + 1)?.stimulus_omega;
        Ok(eligible.contains(&catch_bin(next_omega)))
    }
}
