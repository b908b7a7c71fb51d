//! Session configuration: policy selectors, the omega probability table, and
//! the `TaskParameters` struct that carries both static settings and the
//! adaptive values the engine mutates once per completed trial.
//!
//! Each policy axis is a closed sum type matched exhaustively, so an unknown
//! selector is a compile error rather than a runtime fatal. Defaults mirror a
//! light-intensity training session.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::matrix::MatrixState;

/// Which physical stimulus modality the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentType {
    Auditory,
    LightIntensity,
    GratingOrientation,
    RandomDots,
    NoStimulus,
}

/// How the per-trial stimulus difficulty (omega) is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StimulusSelection {
    /// Weighted draw from the discrete omega table; warm-up trials pin the
    /// first non-zero-probability (easiest) level.
    DiscretePairs,
    /// `omega ~ Beta(alpha, alpha)`; alpha is divided by 4 during warm-up to
    /// push draws toward the easy extremes.
    BetaDistribution { alpha: f64 },
}

/// Minimum-sampling-time adaptation policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MinSamplePolicy {
    /// Always the configured minimum.
    FixMin,
    /// Increase on reward, decrease on early withdrawal, clamped.
    AutoIncrement { incr: f64, decr: f64 },
    /// With `rand_prob`, a uniform draw in [min, max]; otherwise the max.
    RandBetMinMax { rand_prob: f64 },
    /// Like `RandBetMinMax` but snapped to `num_intervals` equally spaced
    /// values.
    RandNumIntervals { rand_prob: f64, num_intervals: u32 },
}

/// Feedback-delay adaptation policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeedbackDelayPolicy {
    /// No enforced wait: delay is always 0.
    None,
    /// Increase after a completed feedback period, decrease after a skipped
    /// one, clamped.
    AutoIncrement { incr: f64, decr: f64 },
    /// Truncated-exponential redraw over [min, max] each trial.
    TruncatedExponential { tau: f64 },
    /// Always the configured maximum.
    Fixed,
}

/// Whether the stimulus keeps playing after the animal leaves the center
/// port, and for how far into the trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimAfterPokeOut {
    NotUsed,
    UntilFeedbackStart,
    UntilFeedbackEnd,
    UntilEndOfTrial,
}

/// Cue fired at the start of the inter-trial signal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItiSignalType {
    None,
    Beep,
    PortLed,
}

/// Cue fired during the punishment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncorrectChoiceSignalType {
    None,
    NoisePulsePal,
    BeepOnWire1,
    PortLed,
}

/// Screen angles available to the visual stimulus renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualStimAngle {
    Degrees0,
    Degrees45,
    Degrees90,
    Degrees135,
    Degrees180,
    Degrees225,
    Degrees270,
    Degrees315,
}

impl VisualStimAngle {
    pub fn degrees(self) -> f64 {
        (self as u8 as f64) * 45.0
    }
}

/// One difficulty level of the discrete stimulus table.
///
/// `omega` is the stimulus percentage in [50, 100]; `rdk` is the derived
/// random-dots coherence `(omega - 50) * 2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OmegaEntry {
    pub omega: f64,
    pub prob: f64,
    pub rdk: f64,
}

/// Discrete probability table over stimulus difficulty, 5-point spaced from
/// 100 down to 50.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmegaTable {
    pub entries: Vec<OmegaEntry>,
}

impl OmegaTable {
    pub fn total_prob(&self) -> f64 {
        self.entries.iter().map(|e| e.prob).sum()
    }

    /// Scale probabilities to sum to 1. The degenerate all-zero table resets
    /// to uniform first so there is never a division by zero.
    pub fn renormalize(&mut self) {
        let mut sum = self.total_prob();
        if sum == 0.0 {
            for entry in &mut self.entries {
                entry.prob = 1.0;
            }
            sum = self.entries.len() as f64;
        }
        for entry in &mut self.entries {
            entry.prob /= sum;
        }
    }

    /// Easiest level with any probability mass: the first entry, since the
    /// table is ordered from 100% downward.
    pub fn first_active(&self) -> Option<&OmegaEntry> {
        self.entries.iter().find(|e| e.prob > 0.0)
    }

    /// Weighted draw of a stimulus percentage.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let total = self.total_prob();
        if total <= 0.0 {
            return self.entries.first().map(|e| e.omega).unwrap_or(50.0);
        }
        let mut point = rng.gen_range(0.0..total);
        for entry in &self.entries {
            if point < entry.prob {
                return entry.omega;
            }
            point -= entry.prob;
        }
        self.entries.last().map(|e| e.omega).unwrap_or(50.0)
    }

    /// Probability mass at a given stimulus percentage, if the level exists.
    pub fn prob_at(&self, omega_pct: f64) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| (e.omega - omega_pct).abs() < 1e-9)
            .map(|e| e.prob)
    }

    /// Recompute the derived RDK column after any omega edit.
    pub fn update_rdk(&mut self) {
        for entry in &mut self.entries {
            entry.rdk = (entry.omega - 50.0) * 2.0;
        }
    }
}

impl Default for OmegaTable {
    fn default() -> Self {
        // 100, 95, .., 50 with linearly decaying mass toward the hard end.
        let levels: Vec<f64> = (0..=10).map(|i| 100.0 - 5.0 * i as f64).collect();
        let count = levels.len();
        let entries = levels
            .into_iter()
            .enumerate()
            .map(|(i, omega)| OmegaEntry {
                omega,
                prob: (count - i - 1) as f64,
                rdk: (omega - 50.0) * 2.0,
            })
            .collect();
        Self { entries }
    }
}

/// Drawing parameters handed to the external visual renderer for the grating
/// and random-dots modalities. The encoder fills the fields relevant to the
/// current trial; the serialization to the renderer's shared memory is owned
/// by the hardware layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawParams {
    pub stim_type: Option<DrawStimType>,
    pub grating_orientation: Option<f64>,
    pub num_cycles: Option<f64>,
    pub cycles_per_second_drift: Option<f64>,
    pub phase: Option<f64>,
    pub gabor_size_factor: Option<f64>,
    pub gaussian_filter_ratio: Option<f64>,
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    pub aperture_size_width: Option<f64>,
    pub aperture_size_height: Option<f64>,
    pub draw_ratio: Option<f64>,
    pub main_direction: Option<f64>,
    pub dot_speed: Option<f64>,
    pub dot_lifetime_secs: Option<f64>,
    pub coherence: Option<f64>,
    pub screen_width_cm: Option<f64>,
    pub screen_dist_cm: Option<f64>,
    pub dot_size_in_degs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawStimType {
    StaticGratings,
    Rdk,
}

/// Full session configuration plus the adaptive values mutated once per
/// completed trial by [`crate::run::TrialEngine::update`].
///
/// Loaded once at session start; the only runtime re-validation is what the
/// type system can't carry (calibration sufficiency, ledger capacity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParameters {
    pub experiment_type: ExperimentType,
    pub stimulus_selection: StimulusSelection,
    pub omega_table: OmegaTable,

    // Stimulus delay (pre-stimulus fixation) bounds and adaptive value.
    pub stim_delay_autoincrement: bool,
    pub stim_delay_min: f64,
    pub stim_delay_max: f64,
    pub stim_delay_incr: f64,
    pub stim_delay_decr: f64,
    pub stim_delay_grace: f64,
    pub stim_delay: f64,

    // Minimum sampling time.
    pub min_sample_policy: MinSamplePolicy,
    pub min_sample_min: f64,
    pub min_sample_max: f64,
    pub min_sample: f64,

    // Feedback delay.
    pub feedback_delay_policy: FeedbackDelayPolicy,
    pub feedback_delay_min: f64,
    pub feedback_delay_max: f64,
    pub feedback_delay_grace: f64,
    pub feedback_delay: f64,

    // Side-bias correction.
    pub left_bias: f64,
    pub correct_bias: bool,
    pub calc_left_bias: f64,

    // Trial mixture.
    pub percent_50_fifty: f64,
    pub percent_catch: f64,
    pub catch_error: bool,
    pub start_easy_trials: usize,

    // Timing.
    pub choice_deadline: f64,
    pub stimulus_time: f64,
    pub iti: f64,
    pub timeout_broke_fixation: f64,
    pub timeout_early_withdrawal: f64,
    pub timeout_incorrect_choice: f64,
    pub timeout_missed_choice: f64,
    pub timeout_skipped_feedback: f64,
    pub pc_timeout: bool,

    // Rewards (microliters).
    pub reward_amount: f64,
    pub center_port_rew_amount: f64,
    pub pre_stim_delay_cntr_reward: f64,
    pub reward_after_min_sampling: bool,
    pub beep_after_min_sampling: bool,

    // Port wiring: packed digit-per-role left/center/right assignment.
    pub ports_lmr_air: u32,
    pub left_poke_atten_prcnt: f64,
    pub center_poke_atten_prcnt: f64,
    pub right_poke_atten_prcnt: f64,

    // Trial-shape options.
    pub habituate_ignore_incorrect: bool,
    pub play_noise_for_error: bool,
    pub wire1_video_trigger: bool,
    pub port_led_to_cue_reward: bool,
    pub percent_forced_led_trial: f64,
    pub stim_after_poke_out: StimAfterPokeOut,
    pub iti_signal_type: ItiSignalType,
    pub incorrect_choice_signal_type: IncorrectChoiceSignalType,

    // Optogenetics.
    pub opto_prob: f64,
    pub opto_start_delay: f64,
    pub opto_max_time: f64,
    pub opto_start_state: MatrixState,
    pub opto_end_state1: MatrixState,
    pub opto_end_state2: MatrixState,

    // Visual stimulus geometry.
    pub visual_stim_angle_port_left: VisualStimAngle,
    pub visual_stim_angle_port_right: VisualStimAngle,
    pub num_cycles: f64,
    pub cycles_per_second_drift: f64,
    pub phase: f64,
    pub gabor_size_factor: f64,
    pub gaussian_filter_ratio: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub aperture_size_width: f64,
    pub aperture_size_height: f64,
    pub draw_ratio: f64,
    pub dot_speed_degs_per_sec: f64,
    pub dot_lifetime_secs: f64,
    pub screen_width_cm: f64,
    pub screen_dist_cm: f64,
    pub dot_size_in_degs: f64,

    // Live display strings, recomputed by update().
    pub performance: String,
    pub all_performance: String,
    pub current_stim: String,
}

impl Default for TaskParameters {
    fn default() -> Self {
        Self {
            experiment_type: ExperimentType::LightIntensity,
            stimulus_selection: StimulusSelection::DiscretePairs,
            omega_table: OmegaTable::default(),

            stim_delay_autoincrement: false,
            stim_delay_min: 0.0,
            stim_delay_max: 0.0,
            stim_delay_incr: 0.01,
            stim_delay_decr: 0.01,
            stim_delay_grace: 0.1,
            stim_delay: 0.0,

            min_sample_policy: MinSamplePolicy::AutoIncrement {
                incr: 0.02,
                decr: 0.01,
            },
            min_sample_min: 0.2,
            min_sample_max: 0.2,
            min_sample: 0.2,

            feedback_delay_policy: FeedbackDelayPolicy::None,
            feedback_delay_min: 0.5,
            feedback_delay_max: 1.5,
            feedback_delay_grace: 0.4,
            feedback_delay: 0.5,

            left_bias: 0.5,
            correct_bias: true,
            calc_left_bias: 0.5,

            percent_50_fifty: 0.0,
            percent_catch: 0.0,
            catch_error: false,
            start_easy_trials: 10,

            choice_deadline: 10.0,
            stimulus_time: 0.3,
            iti: 1.0,
            timeout_broke_fixation: 0.0,
            timeout_early_withdrawal: 0.0,
            timeout_incorrect_choice: 2.0,
            timeout_missed_choice: 1.0,
            timeout_skipped_feedback: 0.0,
            pc_timeout: true,

            reward_amount: 5.5,
            center_port_rew_amount: 0.6,
            pre_stim_delay_cntr_reward: 0.0,
            reward_after_min_sampling: true,
            beep_after_min_sampling: false,

            ports_lmr_air: 123_568,
            left_poke_atten_prcnt: 75.0,
            center_poke_atten_prcnt: 100.0,
            right_poke_atten_prcnt: 75.0,

            habituate_ignore_incorrect: false,
            play_noise_for_error: false,
            wire1_video_trigger: false,
            port_led_to_cue_reward: false,
            percent_forced_led_trial: 0.0,
            stim_after_poke_out: StimAfterPokeOut::UntilFeedbackStart,
            iti_signal_type: ItiSignalType::None,
            incorrect_choice_signal_type: IncorrectChoiceSignalType::BeepOnWire1,

            opto_prob: 0.0,
            opto_start_delay: 0.0,
            opto_max_time: 10.0,
            opto_start_state: MatrixState::StimulusDelivery,
            opto_end_state1: MatrixState::WaitCenterPortOut,
            opto_end_state2: MatrixState::WaitForChoice,

            visual_stim_angle_port_left: VisualStimAngle::Degrees270,
            visual_stim_angle_port_right: VisualStimAngle::Degrees90,
            num_cycles: 20.0,
            cycles_per_second_drift: 5.0,
            phase: 0.0,
            gabor_size_factor: 1.2,
            gaussian_filter_ratio: 0.1,
            center_x: 0.0,
            center_y: 0.0,
            aperture_size_width: 36.0,
            aperture_size_height: 36.0,
            draw_ratio: 0.2,
            dot_speed_degs_per_sec: 25.0,
            dot_lifetime_secs: 1.0,
            screen_width_cm: 20.0,
            screen_dist_cm: 30.0,
            dot_size_in_degs: 2.0,

            performance: "(Calc. after 1st trial)".to_string(),
            all_performance: "(Calc. after 1st trial)".to_string(),
            current_stim: String::new(),
        }
    }
}

impl TaskParameters {
    /// Left/center/right physical port numbers, decoded digit-per-role from
    /// the packed `ports_lmr_air` integer.
    pub fn port_numbers(&self) -> (u8, u8, u8) {
        let left = (self.ports_lmr_air / 100_000) % 10;
        let center = (self.ports_lmr_air / 10_000) % 10;
        let right = (self.ports_lmr_air / 1_000) % 10;
        (left as u8, center as u8, right as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn default_table_has_eleven_descending_levels() {
        let table = OmegaTable::default();
        assert_eq!(table.entries.len(), 11);
        assert_eq!(table.entries.first().unwrap().omega, 100.0);
        assert_eq!(table.entries.last().unwrap().omega, 50.0);
        assert_eq!(table.entries.last().unwrap().prob, 0.0);
        assert_eq!(table.entries.first().unwrap().rdk, 100.0);
    }

    #[test]
    fn renormalize_sums_to_one() {
        let mut table = OmegaTable::default();
        table.renormalize();
        assert!((table.total_prob() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn renormalize_resets_degenerate_table_to_uniform() {
        let mut table = OmegaTable::default();
        for entry in &mut table.entries {
            entry.prob = 0.0;
        }
        table.renormalize();
        assert!((table.total_prob() - 1.0).abs() < 1e-12);
        let uniform = 1.0 / table.entries.len() as f64;
        for entry in &table.entries {
            assert!((entry.prob - uniform).abs() < 1e-12);
        }
    }

    #[test]
    fn sample_respects_zero_mass_levels() {
        let mut table = OmegaTable::default();
        for entry in &mut table.entries {
            entry.prob = 0.0;
        }
        table.entries[3].prob = 1.0;
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            assert_eq!(table.sample(&mut rng), table.entries[3].omega);
        }
    }

    #[test]
    fn port_numbers_decode_packed_digits() {
        let params = TaskParameters::default();
        assert_eq!(params.port_numbers(), (1, 2, 3));
    }

    #[test]
    fn visual_angle_degrees() {
        assert_eq!(VisualStimAngle::Degrees0.degrees(), 0.0);
        assert_eq!(VisualStimAngle::Degrees270.degrees(), 270.0);
    }

    #[test]
    fn parameters_round_trip_through_json() {
        let params = TaskParameters::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: TaskParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
