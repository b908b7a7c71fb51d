//! Per-trial assembly of the state-transition table.
//!
//! `build` is a pure function of the ledger snapshot for one trial plus the
//! static configuration and valve calibration; it never mutates the ledger.

use crate::calibration::ValveCalibration;
use crate::config::{
    DrawParams, DrawStimType, ExperimentType, IncorrectChoiceSignalType, ItiSignalType,
    StimAfterPokeOut, TaskParameters,
};
use crate::error::{EngineError, Result};
use crate::ledger::{Trial, TrialLedger};

use super::{Event, MatrixState, OptoTrigger, OutputAction, StateDef, StateMatrix, Target};

/// TTL pulse width marking trial start/end for the imaging rig.
const WIRE_TTL_DURATION: f64 = 0.02;
/// Flash period of the early-withdrawal LED error signal.
const LED_ERROR_RATE: f64 = 0.1;
/// Feedback wait on catch trials, long enough to observe waiting behavior.
const FEEDBACK_CATCH_MAX_SEC: f64 = 20.0;

// Global timer assignment.
const TIMER_CHOICE_DEADLINE: u8 = 1;
const TIMER_FEEDBACK_CORRECT: u8 = 2;
const TIMER_FEEDBACK_PUNISH: u8 = 3;
const TIMER_INCORRECT_TIMEOUT: u8 = 4;
const TIMER_EARLY_WITHDRAWAL: u8 = 5;

fn pwm_level(attenuation_prcnt: f64) -> u8 {
    ((100.0 - attenuation_prcnt) * 2.55).round() as u8
}

/// Stimulus action triples for the trial's modality, plus the renderer
/// side-channel for the visual modalities.
struct StimulusActions {
    deliver: Vec<OutputAction>,
    cont: Vec<OutputAction>,
    stop: Vec<OutputAction>,
    draw: Option<DrawParams>,
}

fn stimulus_actions(params: &TaskParameters, trial: &Trial) -> StimulusActions {
    let (left_port, _, right_port) = params.port_numbers();
    let left_pwm = pwm_level(params.left_poke_atten_prcnt);
    let right_pwm = pwm_level(params.right_poke_atten_prcnt);

    match params.experiment_type {
        ExperimentType::Auditory => StimulusActions {
            deliver: vec![OutputAction::Bnc { line: 1, level: 1 }],
            cont: vec![],
            stop: vec![OutputAction::Bnc { line: 1, level: 0 }],
            draw: None,
        },
        ExperimentType::LightIntensity => {
            // Intensity is a percentage of the port's base PWM level.
            let left =
                (trial.light_intensity_left * left_pwm as f64 / 100.0).round() as u8;
            let right =
                (trial.light_intensity_right * right_pwm as f64 / 100.0).round() as u8;
            let deliver = vec![
                OutputAction::Pwm {
                    port: left_port,
                    intensity: left,
                },
                OutputAction::Pwm {
                    port: right_port,
                    intensity: right,
                },
            ];
            StimulusActions {
                cont: deliver.clone(),
                deliver,
                stop: vec![],
                draw: None,
            }
        }
        ExperimentType::GratingOrientation => {
            let mut draw = DrawParams {
                stim_type: Some(DrawStimType::StaticGratings),
                grating_orientation: Some(grating_orientation(params, trial)),
                num_cycles: Some(params.num_cycles),
                cycles_per_second_drift: Some(params.cycles_per_second_drift),
                phase: Some(params.phase),
                gabor_size_factor: Some(params.gabor_size_factor),
                gaussian_filter_ratio: Some(params.gaussian_filter_ratio),
                ..DrawParams::default()
            };
            draw.screen_width_cm = Some(params.screen_width_cm);
            draw.screen_dist_cm = Some(params.screen_dist_cm);
            StimulusActions {
                deliver: vec![OutputAction::SoftCode(5)],
                cont: vec![],
                stop: vec![OutputAction::SoftCode(6)],
                draw: Some(draw),
            }
        }
        ExperimentType::RandomDots => {
            let side_angle = if trial.left_rewarded {
                params.visual_stim_angle_port_left
            } else {
                params.visual_stim_angle_port_right
            };
            let draw = DrawParams {
                stim_type: Some(DrawStimType::Rdk),
                center_x: Some(params.center_x),
                center_y: Some(params.center_y),
                aperture_size_width: Some(params.aperture_size_width),
                aperture_size_height: Some(params.aperture_size_height),
                draw_ratio: Some(params.draw_ratio),
                main_direction: Some(side_angle.degrees().floor()),
                dot_speed: Some(params.dot_speed_degs_per_sec),
                dot_lifetime_secs: Some(params.dot_lifetime_secs),
                coherence: Some(trial.decision_variable),
                screen_width_cm: Some(params.screen_width_cm),
                screen_dist_cm: Some(params.screen_dist_cm),
                dot_size_in_degs: Some(params.dot_size_in_degs),
                ..DrawParams::default()
            };
            StimulusActions {
                deliver: vec![OutputAction::SoftCode(5)],
                cont: vec![],
                stop: vec![OutputAction::SoftCode(6)],
                draw: Some(draw),
            }
        }
        ExperimentType::NoStimulus => StimulusActions {
            deliver: vec![],
            cont: vec![],
            stop: vec![],
            draw: None,
        },
    }
}

/// Map the trial's DV onto a screen angle on the shorter arc between the two
/// port angles, so harder trials sit closer to the midpoint orientation.
fn grating_orientation(params: &TaskParameters, trial: &Trial) -> f64 {
    let mut right_angle = params.visual_stim_angle_port_right.degrees();
    let mut left_angle = params.visual_stim_angle_port_left.degrees();
    let ccw =
        (right_angle - left_angle).rem_euclid(360.0) < (left_angle - right_angle).rem_euclid(360.0);
    let (final_dv, angle_diff, min_angle) = if ccw {
        if right_angle < left_angle {
            right_angle += 360.0;
        }
        (trial.decision_variable, right_angle - left_angle, left_angle)
    } else {
        if left_angle < right_angle {
            left_angle += 360.0;
        }
        (
            -trial.decision_variable,
            left_angle - right_angle,
            right_angle,
        )
    };
    (((1.0 - final_dv) * angle_diff / 2.0) + min_angle).rem_euclid(360.0)
}

/// Assemble the transition table for one generated trial.
pub fn build(
    params: &TaskParameters,
    ledger: &TrialLedger,
    calibration: &ValveCalibration,
    i: usize,
) -> Result<StateMatrix> {
    if i >= ledger.generated() {
        return Err(EngineError::TrialNotGenerated { index: i });
    }
    let trial = ledger
        .get(i)
        .ok_or(EngineError::TrialNotGenerated { index: i })?;

    let (left_port, center_port, right_port) = params.port_numbers();
    let left_pwm = pwm_level(params.left_poke_atten_prcnt);
    let center_pwm = pwm_level(params.center_poke_atten_prcnt);
    let right_pwm = pwm_level(params.right_poke_atten_prcnt);

    let stim = stimulus_actions(params, trial);

    // Which waiting phases keep asserting the stimulus depends on the
    // stim-after-poke-out policy; the rest fire the stop actions.
    let (wait_decision, wait_feedback, wait_poke_out) = match params.stim_after_poke_out {
        StimAfterPokeOut::NotUsed => (stim.stop.clone(), stim.stop.clone(), stim.stop.clone()),
        StimAfterPokeOut::UntilFeedbackStart => {
            (stim.cont.clone(), stim.stop.clone(), stim.stop.clone())
        }
        StimAfterPokeOut::UntilFeedbackEnd => {
            (stim.cont.clone(), stim.cont.clone(), stim.stop.clone())
        }
        StimAfterPokeOut::UntilEndOfTrial => {
            (stim.cont.clone(), stim.cont.clone(), stim.cont.clone())
        }
    };

    let left_valve_time = calibration.valve_time(trial.reward_magnitude[0], left_port)?;
    let right_valve_time = calibration.valve_time(trial.reward_magnitude[1], right_port)?;
    let center_valve_time = calibration.valve_time(trial.center_port_rew_amount, center_port)?;

    let incorrect_consequence = if params.habituate_ignore_incorrect {
        MatrixState::RegisterWrongWaitCorrect
    } else {
        MatrixState::WaitForPunishStart
    };
    let left_action = if trial.left_rewarded {
        MatrixState::WaitForRewardStart
    } else {
        incorrect_consequence
    };
    let right_action = if trial.left_rewarded {
        incorrect_consequence
    } else {
        MatrixState::WaitForRewardStart
    };
    let (reward_port, punish_port, valve_code, valve_time) = if trial.left_rewarded {
        (left_port, right_port, left_port, left_valve_time)
    } else {
        (right_port, left_port, right_port, right_valve_time)
    };
    let rewarded_port_pwm = if trial.left_rewarded {
        left_pwm
    } else {
        right_pwm
    };

    let beep_duration = if params.beep_after_min_sampling { 0.01 } else { 0.0 };
    let min_sample_beep = if params.beep_after_min_sampling {
        vec![OutputAction::SoftCode(12)]
    } else {
        vec![]
    };
    // Center reward consumes part of the fixed stimulus window; whatever
    // remains becomes the optional extended-sampling state.
    let timer_cprd = if params.reward_after_min_sampling {
        center_valve_time
    } else {
        0.01
    };
    let reward_center_port = if params.reward_after_min_sampling {
        let mut actions = stim.cont.clone();
        actions.push(OutputAction::Valve(center_port));
        actions.extend(stim.stop.iter().cloned());
        actions
    } else {
        stim.cont.clone()
    };
    let extended_sampling =
        (params.stimulus_time - params.min_sample - timer_cprd - beep_duration).max(0.0);

    let error_feedback = if params.play_noise_for_error {
        vec![OutputAction::SoftCode(11)]
    } else {
        vec![]
    };

    let feedback_delay_correct = if trial.catch_trial {
        FEEDBACK_CATCH_MAX_SEC
    } else {
        params.feedback_delay.max(0.01)
    };
    let feedback_delay_punish = if params.catch_error {
        FEEDBACK_CATCH_MAX_SEC
    } else {
        params.feedback_delay.max(0.01)
    };
    let skipped_feedback_signal = if params.catch_error {
        vec![]
    } else {
        error_feedback.clone()
    };

    let pc_timeout = params.pc_timeout;
    let host_timer = |duration: f64| if pc_timeout { 0.01 } else { duration };
    let incorrect_timeout = host_timer(params.timeout_incorrect_choice + params.iti);

    let (punishment_duration, incorrect_choice_signal) = match params.incorrect_choice_signal_type
    {
        IncorrectChoiceSignalType::NoisePulsePal => (0.01, vec![OutputAction::SoftCode(11)]),
        IncorrectChoiceSignalType::BeepOnWire1 => {
            (0.25, vec![OutputAction::Wire { line: 1, level: 1 }])
        }
        IncorrectChoiceSignalType::PortLed => (
            0.1,
            vec![
                OutputAction::Pwm {
                    port: left_port,
                    intensity: left_pwm,
                },
                OutputAction::Pwm {
                    port: center_port,
                    intensity: center_pwm,
                },
                OutputAction::Pwm {
                    port: right_port,
                    intensity: right_pwm,
                },
            ],
        ),
        IncorrectChoiceSignalType::None => (0.01, vec![]),
    };

    let (iti_signal_duration, iti_signal) = match params.iti_signal_type {
        ItiSignalType::Beep => (0.01, vec![OutputAction::SoftCode(12)]),
        ItiSignalType::PortLed => (
            0.1,
            vec![
                OutputAction::Pwm {
                    port: left_port,
                    intensity: left_pwm,
                },
                OutputAction::Pwm {
                    port: center_port,
                    intensity: center_pwm,
                },
                OutputAction::Pwm {
                    port: right_port,
                    intensity: right_pwm,
                },
            ],
        ),
        ItiSignalType::None => (0.01, vec![]),
    };

    let wire1_out_error = if params.wire1_video_trigger {
        vec![OutputAction::Wire { line: 2, level: 1 }]
    } else {
        vec![]
    };
    let wire1_out_correct = if params.wire1_video_trigger && trial.catch_trial {
        vec![OutputAction::Wire { line: 2, level: 1 }]
    } else {
        vec![]
    };

    // Cue the rewarded side early in training; the auditory task lights both
    // lateral ports once stimulus delivery ends.
    let extended_stimulus = if trial.forced_led_trial {
        vec![OutputAction::Pwm {
            port: reward_port,
            intensity: rewarded_port_pwm,
        }]
    } else if params.experiment_type == ExperimentType::Auditory {
        vec![
            OutputAction::Pwm {
                port: left_port,
                intensity: left_pwm,
            },
            OutputAction::Pwm {
                port: right_port,
                intensity: right_pwm,
            },
        ]
    } else {
        vec![]
    };

    let (pre_stim_timer, pre_stim_actions) = if trial.pre_stim_cntr_reward > 0.0 {
        (
            calibration.valve_time(trial.pre_stim_cntr_reward, center_port)?,
            vec![OutputAction::Valve(center_port)],
        )
    } else {
        (0.01, vec![])
    };

    let global_timers = vec![
        (TIMER_CHOICE_DEADLINE, params.choice_deadline),
        (TIMER_FEEDBACK_CORRECT, feedback_delay_correct),
        (TIMER_FEEDBACK_PUNISH, feedback_delay_punish),
        (TIMER_INCORRECT_TIMEOUT, incorrect_timeout),
        (
            TIMER_EARLY_WITHDRAWAL,
            if params.timeout_early_withdrawal > 0.0 {
                params.timeout_early_withdrawal
            } else {
                0.01
            },
        ),
    ];

    let concat = |parts: &[&[OutputAction]]| -> Vec<OutputAction> {
        parts.iter().flat_map(|p| p.iter().cloned()).collect()
    };

    let mut states = Vec::with_capacity(MatrixState::ALL.len());
    let mut add = |name: MatrixState,
                   timer: f64,
                   transitions: Vec<(Event, Target)>,
                   outputs: Vec<OutputAction>| {
        states.push(StateDef {
            name,
            timer,
            transitions,
            outputs,
        });
    };

    add(
        MatrixState::ItiSignal,
        iti_signal_duration,
        vec![(Event::Tup, Target::State(MatrixState::WaitForCenterPoke))],
        iti_signal,
    );
    add(
        MatrixState::WaitForCenterPoke,
        0.0,
        vec![(
            Event::PortIn(center_port),
            Target::State(MatrixState::PreStimReward),
        )],
        vec![OutputAction::Pwm {
            port: center_port,
            intensity: center_pwm,
        }],
    );
    add(
        MatrixState::PreStimReward,
        pre_stim_timer,
        vec![(
            Event::Tup,
            Target::State(MatrixState::TriggerWaitForStimulus),
        )],
        pre_stim_actions,
    );
    // Doubles as the 2-photon shutter marker: opto start/end states can be
    // pointed here.
    add(
        MatrixState::TriggerWaitForStimulus,
        WIRE_TTL_DURATION,
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::StimDelayGrace),
            ),
            (Event::Tup, Target::State(MatrixState::WaitForStimulus)),
        ],
        vec![],
    );
    add(
        MatrixState::WaitForStimulus,
        (params.stim_delay - WIRE_TTL_DURATION).max(0.0),
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::StimDelayGrace),
            ),
            (Event::Tup, Target::State(MatrixState::StimulusDelivery)),
        ],
        vec![],
    );
    add(
        MatrixState::StimDelayGrace,
        params.stim_delay_grace,
        vec![
            (Event::Tup, Target::State(MatrixState::BrokeFixation)),
            (
                Event::PortIn(center_port),
                Target::State(MatrixState::TriggerWaitForStimulus),
            ),
        ],
        vec![],
    );
    add(
        MatrixState::BrokeFixation,
        host_timer(params.timeout_broke_fixation),
        vec![(Event::Tup, Target::State(MatrixState::Iti))],
        error_feedback.clone(),
    );
    add(
        MatrixState::StimulusDelivery,
        (params.min_sample - beep_duration).max(0.0),
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::EarlyWithdrawal),
            ),
            (Event::Tup, Target::State(MatrixState::BeepMinSampling)),
        ],
        stim.deliver.clone(),
    );
    add(
        MatrixState::EarlyWithdrawal,
        0.0,
        vec![(
            Event::Tup,
            Target::State(MatrixState::TimeoutEarlyWithdrawal),
        )],
        concat(&[
            &stim.stop,
            &[OutputAction::GlobalTimerTrig(TIMER_EARLY_WITHDRAWAL)],
        ]),
    );
    add(
        MatrixState::BeepMinSampling,
        beep_duration,
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::TriggerWaitChoiceTimer),
            ),
            (
                Event::Tup,
                Target::State(MatrixState::CenterPortRewardDelivery),
            ),
        ],
        concat(&[&stim.cont, &min_sample_beep]),
    );
    add(
        MatrixState::CenterPortRewardDelivery,
        timer_cprd,
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::TriggerWaitChoiceTimer),
            ),
            (Event::Tup, Target::State(MatrixState::StimulusTime)),
        ],
        reward_center_port,
    );
    add(
        MatrixState::StimulusTime,
        extended_sampling,
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::TriggerWaitChoiceTimer),
            ),
            (Event::Tup, Target::State(MatrixState::WaitCenterPortOut)),
        ],
        stim.cont.clone(),
    );
    add(
        MatrixState::TriggerWaitChoiceTimer,
        0.0,
        vec![(Event::Tup, Target::State(MatrixState::WaitForChoice))],
        concat(&[
            &wait_decision,
            &extended_stimulus,
            &[OutputAction::GlobalTimerTrig(TIMER_CHOICE_DEADLINE)],
        ]),
    );
    add(
        MatrixState::WaitCenterPortOut,
        0.0,
        vec![
            (
                Event::PortOut(center_port),
                Target::State(MatrixState::WaitForChoice),
            ),
            (Event::PortIn(left_port), Target::State(left_action)),
            (Event::PortIn(right_port), Target::State(right_action)),
            (
                Event::GlobalTimerEnd(TIMER_CHOICE_DEADLINE),
                Target::State(MatrixState::TimeoutMissedChoice),
            ),
        ],
        concat(&[
            &wait_decision,
            &extended_stimulus,
            &[OutputAction::GlobalTimerTrig(TIMER_CHOICE_DEADLINE)],
        ]),
    );
    add(
        MatrixState::WaitForChoice,
        0.0,
        vec![
            (Event::PortIn(left_port), Target::State(left_action)),
            (Event::PortIn(right_port), Target::State(right_action)),
            (
                Event::GlobalTimerEnd(TIMER_CHOICE_DEADLINE),
                Target::State(MatrixState::TimeoutMissedChoice),
            ),
        ],
        concat(&[&wait_decision, &extended_stimulus]),
    );
    add(
        MatrixState::WaitForRewardStart,
        0.0,
        vec![(Event::Tup, Target::State(MatrixState::WaitForReward))],
        concat(&[
            &wire1_out_correct,
            &wait_feedback,
            &[OutputAction::GlobalTimerTrig(TIMER_FEEDBACK_CORRECT)],
        ]),
    );
    add(
        MatrixState::WaitForReward,
        0.0,
        vec![
            (
                Event::GlobalTimerEnd(TIMER_FEEDBACK_CORRECT),
                Target::State(MatrixState::Reward),
            ),
            (
                Event::PortOut(reward_port),
                Target::State(MatrixState::RewardGrace),
            ),
        ],
        wait_feedback.clone(),
    );
    add(
        MatrixState::RewardGrace,
        params.feedback_delay_grace,
        vec![
            (
                Event::PortIn(reward_port),
                Target::State(MatrixState::WaitForReward),
            ),
            (
                Event::Tup,
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::GlobalTimerEnd(TIMER_FEEDBACK_CORRECT),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::PortIn(center_port),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::PortIn(punish_port),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
        ],
        wait_feedback.clone(),
    );
    add(
        MatrixState::Reward,
        valve_time,
        vec![(Event::Tup, Target::State(MatrixState::WaitRewardOut))],
        concat(&[&wait_feedback, &[OutputAction::Valve(valve_code)]]),
    );
    add(
        MatrixState::WaitRewardOut,
        1.0,
        vec![
            (Event::Tup, Target::State(MatrixState::ExtIti)),
            (
                Event::PortOut(reward_port),
                Target::State(MatrixState::ExtIti),
            ),
        ],
        wait_poke_out.clone(),
    );
    add(
        MatrixState::RegisterWrongWaitCorrect,
        0.0,
        vec![(Event::Tup, Target::State(MatrixState::WaitForChoice))],
        wait_feedback.clone(),
    );
    add(
        MatrixState::WaitForPunishStart,
        0.0,
        vec![(Event::Tup, Target::State(MatrixState::WaitForPunish))],
        concat(&[
            &wire1_out_error,
            &wait_feedback,
            &[OutputAction::GlobalTimerTrig(TIMER_FEEDBACK_PUNISH)],
        ]),
    );
    add(
        MatrixState::WaitForPunish,
        0.0,
        vec![
            (
                Event::GlobalTimerEnd(TIMER_FEEDBACK_PUNISH),
                Target::State(MatrixState::Punishment),
            ),
            (
                Event::PortOut(punish_port),
                Target::State(MatrixState::PunishGrace),
            ),
        ],
        wait_feedback.clone(),
    );
    add(
        MatrixState::PunishGrace,
        params.feedback_delay_grace,
        vec![
            (
                Event::PortIn(punish_port),
                Target::State(MatrixState::WaitForPunish),
            ),
            (
                Event::Tup,
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::GlobalTimerEnd(TIMER_FEEDBACK_PUNISH),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::PortIn(center_port),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
            (
                Event::PortIn(reward_port),
                Target::State(MatrixState::TimeoutSkippedFeedback),
            ),
        ],
        wait_feedback.clone(),
    );
    add(
        MatrixState::Punishment,
        punishment_duration,
        vec![
            (Event::Tup, Target::State(MatrixState::WaitPunishOut)),
            (
                Event::PortOut(punish_port),
                Target::State(MatrixState::TimeoutIncorrectChoice),
            ),
        ],
        concat(&[&incorrect_choice_signal, &wait_feedback]),
    );
    add(
        MatrixState::WaitPunishOut,
        1.0,
        vec![
            (
                Event::Tup,
                Target::State(MatrixState::TimeoutIncorrectChoice),
            ),
            (
                Event::PortOut(punish_port),
                Target::State(MatrixState::TimeoutIncorrectChoice),
            ),
        ],
        concat(&[
            &[OutputAction::GlobalTimerTrig(TIMER_INCORRECT_TIMEOUT)],
            &wait_poke_out,
        ]),
    );
    add(
        MatrixState::TimeoutEarlyWithdrawal,
        LED_ERROR_RATE,
        vec![
            (
                Event::GlobalTimerEnd(TIMER_EARLY_WITHDRAWAL),
                Target::State(MatrixState::Iti),
            ),
            (
                Event::Tup,
                Target::State(MatrixState::TimeoutEarlyWithdrawalFlashOn),
            ),
        ],
        concat(&[&stim.stop, &error_feedback]),
    );
    add(
        MatrixState::TimeoutEarlyWithdrawalFlashOn,
        LED_ERROR_RATE,
        vec![
            (
                Event::GlobalTimerEnd(TIMER_EARLY_WITHDRAWAL),
                Target::State(MatrixState::Iti),
            ),
            (
                Event::Tup,
                Target::State(MatrixState::TimeoutEarlyWithdrawal),
            ),
        ],
        concat(&[
            &stim.stop,
            &error_feedback,
            &[
                OutputAction::Pwm {
                    port: left_port,
                    intensity: left_pwm,
                },
                OutputAction::Pwm {
                    port: right_port,
                    intensity: right_pwm,
                },
            ],
        ]),
    );
    // Tup backstop: the incorrect timer is only armed on the WaitPunishOut
    // path, never on a direct poke-out from Punishment.
    add(
        MatrixState::TimeoutIncorrectChoice,
        incorrect_timeout,
        vec![
            (
                Event::GlobalTimerEnd(TIMER_INCORRECT_TIMEOUT),
                Target::State(MatrixState::ExtIti),
            ),
            (Event::Tup, Target::State(MatrixState::ExtIti)),
        ],
        stim.stop.clone(),
    );
    add(
        MatrixState::TimeoutSkippedFeedback,
        host_timer(params.timeout_skipped_feedback),
        vec![(Event::Tup, Target::State(MatrixState::Iti))],
        concat(&[&stim.stop, &skipped_feedback_signal]),
    );
    add(
        MatrixState::TimeoutMissedChoice,
        host_timer(params.timeout_missed_choice),
        vec![(Event::Tup, Target::State(MatrixState::Iti))],
        concat(&[&stim.stop, &error_feedback]),
    );
    add(
        MatrixState::Iti,
        WIRE_TTL_DURATION,
        vec![(Event::Tup, Target::State(MatrixState::ExtIti))],
        stim.stop.clone(),
    );
    add(
        MatrixState::ExtIti,
        host_timer(params.iti),
        vec![(Event::Tup, Target::Exit)],
        stim.stop.clone(),
    );

    let mut matrix = StateMatrix {
        states,
        global_timers,
        opto: None,
        draw: stim.draw,
    };

    if trial.opto_enabled {
        matrix.opto = Some(OptoTrigger {
            start_delay_ms: (params.opto_start_delay * 1000.0).round() as u32,
            max_duration_ms: (params.opto_max_time * 1000.0).round() as u32,
        });
        patch_opto(&mut matrix, params.opto_start_state, 3);
        patch_opto(&mut matrix, params.opto_end_state1, 4);
        patch_opto(&mut matrix, params.opto_end_state2, 4);
        patch_opto(&mut matrix, MatrixState::ExtIti, 4);
    }

    Ok(matrix)
}

/// Raise the opto wire line on entry to a marker state.
fn patch_opto(matrix: &mut StateMatrix, state: MatrixState, line: u8) {
    if let Some(def) = matrix.states.iter_mut().find(|s| s.name == state) {
        let action = OutputAction::Wire { line, level: 1 };
        if !def.outputs.contains(&action) {
            def.outputs.push(action);
        }
    }
}
