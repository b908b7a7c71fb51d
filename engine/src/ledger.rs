//! The append-only trial ledger.
//!
//! Write-order contract: **future** fields for a trial are written by
//! [`crate::run::TrialEngine::assign_future_trials`] (and the scheduling tail
//! of `update(i)`, which may touch trial `i + 1`) before the trial runs;
//! **outcome** fields are written by `update(i)` exactly once, after the
//! hardware reports the trial's visit log. No field is ever written from both
//! sides.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::sampling::CATCH_BIN_COUNT;

/// Upper bound on trials per session; the ledger is pre-sized to this.
pub const TRIAL_CAPACITY: usize = 800;

/// One trial's record. Fields grouped by writer; see the module docs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    // -- future fields ------------------------------------------------------
    /// Normalized stimulus difficulty/side value in [0, 1]; 0.5 = ambiguous.
    pub stimulus_omega: f64,
    pub left_rewarded: bool,
    /// Signed, modality-specific transform of omega.
    pub decision_variable: f64,
    pub catch_trial: bool,
    pub forced_led_trial: bool,
    pub opto_enabled: bool,
    /// Per-side light intensities (light-intensity modality only).
    pub light_intensity_left: f64,
    pub light_intensity_right: f64,
    /// Reward volumes (ul) for the left/right ports on this trial.
    pub reward_magnitude: [f64; 2],
    pub center_port_rew_amount: f64,
    pub pre_stim_cntr_reward: f64,

    // -- outcome fields -----------------------------------------------------
    /// Which lateral port the animal poked, if the trial resolved to a choice.
    pub choice_left: Option<bool>,
    pub choice_correct: Option<bool>,
    pub rewarded: bool,
    pub reward_after_min_sampling: bool,
    pub reward_received_total: f64,
    pub fix_broke: bool,
    pub early_withdrawal: bool,
    pub missed_choice: bool,
    /// False when the feedback period was skipped or the choice timed out.
    pub feedback_given: bool,
    pub fix_duration: Option<f64>,
    pub movement_time: Option<f64>,
    pub sample_time: Option<f64>,
    pub feedback_time: Option<f64>,
    /// `None` = not computed; `Some(-1.0)` = WaitCenterPortOut never fired.
    pub reaction_time: Option<f64>,

    // -- adaptive snapshots (values in effect when the trial ran) -----------
    pub stim_delay: f64,
    pub min_sample: f64,
    pub feedback_delay: f64,
    /// Grating orientation actually drawn (grating modality only).
    pub grating_orientation: Option<f64>,
}

/// Growable, capacity-bounded ledger plus the cross-trial catch bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialLedger {
    trials: Vec<Trial>,
    capacity: usize,
    /// Watermark: trials `0..generated` have future fields assigned.
    generated: usize,
    /// Running catch-trial credit per 5%-wide omega bin.
    pub catch_count: [f64; CATCH_BIN_COUNT],
    /// Index of the last rewarded catch trial, if any.
    pub last_success_catch_trial: Option<usize>,
}

impl Default for TrialLedger {
    fn default() -> Self {
        Self::with_capacity(TRIAL_CAPACITY)
    }
}

impl TrialLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            trials: Vec::new(),
            capacity,
            generated: 0,
            catch_count: [0.0; CATCH_BIN_COUNT],
            last_success_catch_trial: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the first trial without future fields assigned.
    pub fn generated(&self) -> usize {
        self.generated
    }

    pub fn advance_generated(&mut self, through: usize) {
        self.generated = self.generated.max(through);
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Trial> {
        self.trials.get(index)
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Mutable access to a trial, extending the ledger with default records
    /// up to `index` if needed. Fails past capacity.
    pub fn ensure(&mut self, index: usize) -> Result<&mut Trial> {
        if index >= self.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: index,
                capacity: self.capacity,
            });
        }
        if index >= self.trials.len() {
            self.trials.resize_with(index + 1, Trial::default);
        }
        Ok(&mut self.trials[index])
    }

    /// Bounds check for a generation batch `[start, start + count)`.
    pub fn check_capacity(&self, start: usize, count: usize) -> Result<()> {
        let end = start + count;
        if end > self.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: end,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Add catch credit at a bin; the histogram only ever grows.
    pub fn credit_catch(&mut self, bin: usize, credit: f64) {
        if let Some(slot) = self.catch_count.get_mut(bin) {
            *slot += credit.max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_extends_and_enforces_capacity() {
        let mut ledger = TrialLedger::with_capacity(4);
        ledger.ensure(2).unwrap().stimulus_omega = 0.8;
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.get(2).unwrap().stimulus_omega, 0.8);
        assert!(matches!(
            ledger.ensure(4),
            Err(EngineError::CapacityExceeded { requested: 4, capacity: 4 })
        ));
    }

    #[test]
    fn check_capacity_rejects_overfull_batch() {
        let ledger = TrialLedger::with_capacity(10);
        assert!(ledger.check_capacity(8, 2).is_ok());
        assert!(ledger.check_capacity(8, 3).is_err());
    }

    #[test]
    fn catch_credit_never_decreases() {
        let mut ledger = TrialLedger::default();
        ledger.credit_catch(3, 1.5);
        ledger.credit_catch(3, -2.0); // clamped to zero
        assert_eq!(ledger.catch_count[3], 1.5);
    }

    #[test]
    fn watermark_only_advances() {
        let mut ledger = TrialLedger::default();
        ledger.advance_generated(5);
        ledger.advance_generated(3);
        assert_eq!(ledger.generated(), 5);
    }
}
