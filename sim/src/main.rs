//! Virtual-mouse session driver. Runs the trial engine against a simulated
//! animal whose accuracy follows the decision variable, building and checking
//! the state matrix for every trial, then prints a session summary as JSON.

use std::env;
use std::error::Error;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use engine::ledger::Trial;
use engine::matrix::MatrixState;
use engine::run::PRE_GENERATE_TRIAL_COUNT;
use engine::{
    build, SessionSummary, TaskParameters, TrialEngine, TrialVisits, DEFAULT_CALIBRATION,
    TRIAL_CAPACITY,
};

const P_BROKE_FIXATION: f64 = 0.05;
const P_EARLY_WITHDRAWAL: f64 = 0.08;
const P_MISSED_CHOICE: f64 = 0.02;
const P_SKIPPED_FEEDBACK: f64 = 0.04;
const LAPSE_RATE: f64 = 0.05;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let trial_count: usize = match args.next() {
        Some(arg) => arg.parse()?,
        None => 200,
    };
    let seed: u64 = match args.next() {
        Some(arg) => arg.parse()?,
        None => 7,
    };
    let trial_count = trial_count.min(TRIAL_CAPACITY - 1);

    let params = TaskParameters {
        correct_bias: true,
        percent_catch: 0.1,
        ..TaskParameters::default()
    };
    let mut engine = TrialEngine::new(params, seed);
    engine.assign_future_trials(0, PRE_GENERATE_TRIAL_COUNT)?;

    let mut mouse = StdRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9));

    for i in 0..trial_count {
        let matrix = build(&engine.params, &engine.ledger, &DEFAULT_CALIBRATION, i)?;
        let undefined = matrix.undefined_targets();
        if !undefined.is_empty() {
            tracing::warn!(trial = i, ?undefined, "matrix has dangling targets");
        }

        let trial = engine
            .ledger
            .get(i)
            .cloned()
            .ok_or("trial missing from ledger")?;
        let visits = simulate_trial(&engine.params, &trial, &mut mouse);
        engine.update(i, &visits)?;

        tracing::info!(
            trial = i,
            omega = trial.stimulus_omega,
            performance = %engine.params.performance,
            "trial scored"
        );
    }

    let summary = SessionSummary::collect(&engine.ledger, trial_count);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Timeline builder for one trial's visit log.
struct Timeline {
    visits: TrialVisits,
    t: f64,
}

impl Timeline {
    fn new() -> Self {
        Self {
            visits: TrialVisits::default(),
            t: 0.0,
        }
    }

    fn visit(&mut self, state: MatrixState, duration: f64) {
        let start = self.t;
        self.t += duration;
        self.visits.push(state, start, self.t);
    }

    fn finish(mut self, iti: f64) -> TrialVisits {
        self.visit(MatrixState::Iti, 0.02);
        self.visit(MatrixState::ExtIti, iti);
        self.visits
    }
}

/// Walk one trial the way a plausible mouse would: occasional fixation
/// breaks, early withdrawals and missed choices, otherwise a choice whose
/// accuracy grows with the decision variable.
fn simulate_trial(params: &TaskParameters, trial: &Trial, rng: &mut StdRng) -> TrialVisits {
    let mut timeline = Timeline::new();

    timeline.visit(MatrixState::ItiSignal, 0.01);
    timeline.visit(MatrixState::WaitForCenterPoke, rng.gen_range(0.2..2.0));
    timeline.visit(MatrixState::PreStimReward, 0.01);

    if rng.gen_bool(P_BROKE_FIXATION) && params.stim_delay > 0.0 {
        timeline.visit(MatrixState::TriggerWaitForStimulus, 0.02);
        timeline.visit(MatrixState::WaitForStimulus, params.stim_delay * 0.5);
        timeline.visit(MatrixState::StimDelayGrace, params.stim_delay_grace);
        timeline.visit(MatrixState::BrokeFixation, params.timeout_broke_fixation);
        return timeline.finish(params.iti);
    }
    timeline.visit(MatrixState::TriggerWaitForStimulus, 0.02);
    timeline.visit(
        MatrixState::WaitForStimulus,
        (params.stim_delay - 0.02).max(0.0),
    );

    if rng.gen_bool(P_EARLY_WITHDRAWAL) && params.min_sample > 0.0 {
        timeline.visit(
            MatrixState::StimulusDelivery,
            params.min_sample * rng.gen_range(0.1..0.9),
        );
        timeline.visit(MatrixState::EarlyWithdrawal, 0.0);
        timeline.visit(
            MatrixState::TimeoutEarlyWithdrawal,
            params.timeout_early_withdrawal,
        );
        return timeline.finish(params.iti);
    }
    timeline.visit(MatrixState::StimulusDelivery, params.min_sample);
    timeline.visit(MatrixState::BeepMinSampling, 0.01);
    timeline.visit(MatrixState::CenterPortRewardDelivery, 0.03);
    timeline.visit(MatrixState::WaitCenterPortOut, rng.gen_range(0.05..0.4));

    if rng.gen_bool(P_MISSED_CHOICE) {
        timeline.visit(MatrixState::WaitForChoice, params.choice_deadline);
        timeline.visit(
            MatrixState::TimeoutMissedChoice,
            params.timeout_missed_choice,
        );
        return timeline.finish(params.iti);
    }

    let movement = rng.gen_range(0.1..1.0);
    timeline.visit(MatrixState::WaitForChoice, movement);

    let p_correct = if rng.gen_bool(LAPSE_RATE) {
        0.5
    } else {
        0.5 + 0.45 * trial.decision_variable.abs()
    };
    let correct = rng.gen_bool(p_correct.clamp(0.0, 1.0));

    if correct {
        timeline.visit(MatrixState::WaitForRewardStart, 0.0);
        if trial.catch_trial || rng.gen_bool(P_SKIPPED_FEEDBACK) {
            timeline.visit(MatrixState::WaitForReward, rng.gen_range(0.2..1.5));
            timeline.visit(MatrixState::RewardGrace, params.feedback_delay_grace);
            timeline.visit(
                MatrixState::TimeoutSkippedFeedback,
                params.timeout_skipped_feedback,
            );
            return timeline.finish(params.iti);
        }
        timeline.visit(
            MatrixState::WaitForReward,
            params.feedback_delay.max(0.01),
        );
        timeline.visit(MatrixState::Reward, 0.05);
        timeline.visit(MatrixState::WaitRewardOut, 0.3);
        timeline.visit(MatrixState::ExtIti, params.iti);
        return timeline.visits;
    }

    timeline.visit(MatrixState::WaitForPunishStart, 0.0);
    timeline.visit(
        MatrixState::WaitForPunish,
        params.feedback_delay.max(0.01),
    );
    timeline.visit(MatrixState::Punishment, 0.25);
    timeline.visit(MatrixState::WaitPunishOut, 0.3);
    timeline.visit(
        MatrixState::TimeoutIncorrectChoice,
        params.timeout_incorrect_choice,
    );
    timeline.visit(MatrixState::ExtIti, params.iti);
    timeline.visits
}
