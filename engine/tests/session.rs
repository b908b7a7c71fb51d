//! Session-level tests driving the engine with synthetic visit logs.

use engine::matrix::MatrixState;
use engine::run::PRE_GENERATE_TRIAL_COUNT;
use engine::{
    build, TaskParameters, TrialEngine, TrialVisits, DEFAULT_CALIBRATION,
};

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

    fn visit(&mut self, state: MatrixState, duration: f64) -> &mut Self {
        let start = self.t;
        self.t += duration;
        self.visits.push(state, start, self.t);
        self
    }
}

fn approach(params: &TaskParameters) -> Timeline {
    let mut timeline = Timeline::new();
    timeline
        .visit(MatrixState::ItiSignal, 0.01)
        .visit(MatrixState::WaitForCenterPoke, 0.5)
        .visit(MatrixState::PreStimReward, 0.01)
        .visit(MatrixState::TriggerWaitForStimulus, 0.02)
        .visit(MatrixState::WaitForStimulus, params.stim_delay)
        .visit(MatrixState::StimulusDelivery, params.min_sample)
        .visit(MatrixState::BeepMinSampling, 0.01)
        .visit(MatrixState::CenterPortRewardDelivery, 0.03)
        .visit(MatrixState::WaitCenterPortOut, 0.1)
        .visit(MatrixState::WaitForChoice, 0.3);
    timeline
}

fn rewarded_visits(params: &TaskParameters) -> TrialVisits {
    let mut timeline = approach(params);
    timeline
        .visit(MatrixState::WaitForRewardStart, 0.0)
        .visit(MatrixState::WaitForReward, params.feedback_delay.max(0.01))
        .visit(MatrixState::Reward, 0.05)
        .visit(MatrixState::WaitRewardOut, 0.3)
        .visit(MatrixState::ExtIti, params.iti);
    timeline.visits
}

fn punished_visits(params: &TaskParameters) -> TrialVisits {
    let mut timeline = approach(params);
    timeline
        .visit(MatrixState::WaitForPunishStart, 0.0)
        .visit(MatrixState::WaitForPunish, params.feedback_delay.max(0.01))
        .visit(MatrixState::Punishment, 0.25)
        .visit(MatrixState::WaitPunishOut, 0.3)
        .visit(MatrixState::TimeoutIncorrectChoice, 2.0)
        .visit(MatrixState::Iti, 0.02)
        .visit(MatrixState::ExtIti, params.iti);
    timeline.visits
}

#[test]
fn always_correct_session_accumulates_rewards() {
    let mut engine = TrialEngine::new(TaskParameters::default(), 11);
    engine
        .assign_future_trials(0, PRE_GENERATE_TRIAL_COUNT)
        .unwrap();

    for i in 0..40 {
        let matrix = build(&engine.params, &engine.ledger, &DEFAULT_CALIBRATION, i).unwrap();
        assert!(matrix.undefined_targets().is_empty());
        assert!(matrix.exit_reachable());

        let visits = rewarded_visits(&engine.params);
        engine.update(i, &visits).unwrap();
    }

    let trials = engine.ledger.trials();
    assert!(trials[..40].iter().all(|t| t.choice_correct == Some(true)));
    assert!(trials[..40].iter().all(|t| t.rewarded));
    // Each trial pays the side reward plus the center-port sampling reward.
    let total = trials[39].reward_received_total;
    assert!((total - 40.0 * (5.5 + 0.6)).abs() < 1e-9, "total {total}");
    assert!(!engine.params.performance.is_empty());
}

#[test]
fn warm_up_trials_stay_at_the_easiest_level() {
    let mut engine = TrialEngine::new(TaskParameters::default(), 11);
    engine
        .assign_future_trials(0, PRE_GENERATE_TRIAL_COUNT)
        .unwrap();
    for i in 0..12 {
        let visits = rewarded_visits(&engine.params);
        engine.update(i, &visits).unwrap();
    }
    let easiest = engine.params.omega_table.first_active().unwrap().omega / 100.0;
    for trial in &engine.ledger.trials()[..11] {
        assert_eq!(trial.stimulus_omega.max(1.0 - trial.stimulus_omega), easiest);
    }
}

#[test]
fn one_sided_mouse_drives_bias_away_from_its_side() {
    let mut engine = TrialEngine::new(TaskParameters::default(), 11);
    engine
        .assign_future_trials(0, PRE_GENERATE_TRIAL_COUNT)
        .unwrap();

    // This mouse pokes left no matter what was cued.
    for i in 0..40 {
        let left_rewarded = engine.ledger.get(i).unwrap().left_rewarded;
        let visits = if left_rewarded {
            rewarded_visits(&engine.params)
        } else {
            punished_visits(&engine.params)
        };
        engine.update(i, &visits).unwrap();
    }

    assert!(
        engine.params.calc_left_bias > 0.55,
        "calc_left_bias {}",
        engine.params.calc_left_bias
    );
    // Later batches should cue the starved right side more often than not.
    let generated = engine.ledger.generated();
    let tail = &engine.ledger.trials()[generated - 5..generated];
    let left = tail.iter().filter(|t| t.left_rewarded).count();
    assert!(left * 2 < tail.len(), "{left} lefts of {}", tail.len());
}

#[test]
fn catch_trials_appear_and_stretch_the_feedback_wait() {
    let params = TaskParameters {
        percent_catch: 0.2,
        ..TaskParameters::default()
    };
    let mut engine = TrialEngine::new(params, 11);
    engine
        .assign_future_trials(0, PRE_GENERATE_TRIAL_COUNT)
        .unwrap();
    for i in 0..60 {
        let visits = rewarded_visits(&engine.params);
        engine.update(i, &visits).unwrap();
    }

    let catch_index = engine.ledger.trials()[..60]
        .iter()
        .position(|t| t.catch_trial)
        .expect("no catch trial scheduled in 60 rewarded trials");
    assert!(catch_index > engine.params.start_easy_trials);

    let matrix = build(
        &engine.params,
        &engine.ledger,
        &DEFAULT_CALIBRATION,
        catch_index,
    )
    .unwrap();
    let feedback_timer = matrix
        .global_timers
        .iter()
        .find(|(id, _)| *id == 2)
        .unwrap()
        .1;
    assert_eq!(feedback_timer, 20.0);

    let credited: f64 = engine.ledger.catch_count.iter().sum();
    assert!(credited > 0.0);
}
