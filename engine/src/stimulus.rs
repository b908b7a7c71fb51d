//! Per-modality decision-variable transforms.
//!
//! Each transform is a pure function of the ledger record at a trial index:
//! it derives the signed decision variable from the generated omega and may
//! write modality-specific per-trial fields the encoder needs (e.g. the
//! per-side light intensities). A non-zero DV is authoritative over the raw
//! omega side assignment: some modalities introduce asymmetric
//! non-linearities between omega and behavioral difficulty.

use crate::config::ExperimentType;
use crate::ledger::Trial;

/// Compute the decision variable for a trial and fill any modality-specific
/// fields. Returns the DV; callers store it and re-derive `left_rewarded`
/// from its sign when non-zero.
pub fn apply_dv(experiment: ExperimentType, trial: &mut Trial) -> f64 {
    let dv = match experiment {
        ExperimentType::LightIntensity => {
            trial.light_intensity_left = (trial.stimulus_omega * 100.0).round();
            trial.light_intensity_right = ((1.0 - trial.stimulus_omega) * 100.0).round();
            trial.stimulus_omega * 2.0 - 1.0
        }
        // Click-train, grating and dot-coherence transforms are owned by
        // their renderers; the engine contract is a unit DV on the omega
        // side.
        ExperimentType::Auditory
        | ExperimentType::GratingOrientation
        | ExperimentType::RandomDots => {
            if trial.stimulus_omega >= 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        ExperimentType::NoStimulus => 0.0,
    };
    trial.decision_variable = dv;
    if dv != 0.0 {
        trial.left_rewarded = dv > 0.0;
    }
    dv
}

/// Display string for the upcoming stimulus, mirroring the live-session
/// readout: intensity (or coherence) plus the cued side.
pub fn format_current_stim(experiment: ExperimentType, dv: f64) -> String {
    let side = if dv < 0.0 { "R" } else { "L" };
    match experiment {
        ExperimentType::RandomDots => {
            format!("{:.0}% {side} cohr.", (dv / 0.01).abs())
        }
        _ => {
            let intensity = if dv > 0.0 {
                (dv + 1.0) / 0.02
            } else {
                (dv - 1.0) / -0.02
            };
            format!("{intensity:.0}% {side}")
        }
    }
}
