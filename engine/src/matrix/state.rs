//! The closed enumeration of trial states shared by the encoder (which emits
//! them) and the outcome classifier (which looks them up in the hardware
//! visit log). Hardware logs carry these as strings; `FromStr`/`Display`
//! round-trip the canonical names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatrixState {
    ItiSignal,
    WaitForCenterPoke,
    PreStimReward,
    TriggerWaitForStimulus,
    WaitForStimulus,
    StimDelayGrace,
    BrokeFixation,
    StimulusDelivery,
    EarlyWithdrawal,
    BeepMinSampling,
    CenterPortRewardDelivery,
    StimulusTime,
    TriggerWaitChoiceTimer,
    WaitCenterPortOut,
    WaitForChoice,
    WaitForRewardStart,
    WaitForReward,
    RewardGrace,
    Reward,
    WaitRewardOut,
    RegisterWrongWaitCorrect,
    WaitForPunishStart,
    WaitForPunish,
    PunishGrace,
    Punishment,
    WaitPunishOut,
    TimeoutEarlyWithdrawal,
    TimeoutEarlyWithdrawalFlashOn,
    TimeoutIncorrectChoice,
    TimeoutSkippedFeedback,
    TimeoutMissedChoice,
    Iti,
    ExtIti,
}

impl MatrixState {
    pub const ALL: [MatrixState; 33] = [
        MatrixState::ItiSignal,
        MatrixState::WaitForCenterPoke,
        MatrixState::PreStimReward,
        MatrixState::TriggerWaitForStimulus,
        MatrixState::WaitForStimulus,
        MatrixState::StimDelayGrace,
        MatrixState::BrokeFixation,
        MatrixState::StimulusDelivery,
        MatrixState::EarlyWithdrawal,
        MatrixState::BeepMinSampling,
        MatrixState::CenterPortRewardDelivery,
        MatrixState::StimulusTime,
        MatrixState::TriggerWaitChoiceTimer,
        MatrixState::WaitCenterPortOut,
        MatrixState::WaitForChoice,
        MatrixState::WaitForRewardStart,
        MatrixState::WaitForReward,
        MatrixState::RewardGrace,
        MatrixState::Reward,
        MatrixState::WaitRewardOut,
        MatrixState::RegisterWrongWaitCorrect,
        MatrixState::WaitForPunishStart,
        MatrixState::WaitForPunish,
        MatrixState::PunishGrace,
        MatrixState::Punishment,
        MatrixState::WaitPunishOut,
        MatrixState::TimeoutEarlyWithdrawal,
        MatrixState::TimeoutEarlyWithdrawalFlashOn,
        MatrixState::TimeoutIncorrectChoice,
        MatrixState::TimeoutSkippedFeedback,
        MatrixState::TimeoutMissedChoice,
        MatrixState::Iti,
        MatrixState::ExtIti,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MatrixState::ItiSignal => "ITI_Signal",
            MatrixState::WaitForCenterPoke => "WaitForCenterPoke",
            MatrixState::PreStimReward => "PreStimReward",
            MatrixState::TriggerWaitForStimulus => "TriggerWaitForStimulus",
            MatrixState::WaitForStimulus => "WaitForStimulus",
            MatrixState::StimDelayGrace => "StimDelayGrace",
            MatrixState::BrokeFixation => "BrokeFixation",
            MatrixState::StimulusDelivery => "StimulusDelivery",
            MatrixState::EarlyWithdrawal => "EarlyWithdrawal",
            MatrixState::BeepMinSampling => "BeepMinSampling",
            MatrixState::CenterPortRewardDelivery => "CenterPortRewardDelivery",
            MatrixState::StimulusTime => "StimulusTime",
            MatrixState::TriggerWaitChoiceTimer => "TriggerWaitChoiceTimer",
            MatrixState::WaitCenterPortOut => "WaitCenterPortOut",
            MatrixState::WaitForChoice => "WaitForChoice",
            MatrixState::WaitForRewardStart => "WaitForRewardStart",
            MatrixState::WaitForReward => "WaitForReward",
            MatrixState::RewardGrace => "RewardGrace",
            MatrixState::Reward => "Reward",
            MatrixState::WaitRewardOut => "WaitRewardOut",
            MatrixState::RegisterWrongWaitCorrect => "RegisterWrongWaitCorrect",
            MatrixState::WaitForPunishStart => "WaitForPunishStart",
            MatrixState::WaitForPunish => "WaitForPunish",
            MatrixState::PunishGrace => "PunishGrace",
            MatrixState::Punishment => "Punishment",
            MatrixState::WaitPunishOut => "WaitPunishOut",
            MatrixState::TimeoutEarlyWithdrawal => "TimeoutEarlyWithdrawal",
            MatrixState::TimeoutEarlyWithdrawalFlashOn => "TimeoutEarlyWithdrawalFlashOn",
            MatrixState::TimeoutIncorrectChoice => "TimeoutIncorrectChoice",
            MatrixState::TimeoutSkippedFeedback => "TimeoutSkippedFeedback",
            MatrixState::TimeoutMissedChoice => "TimeoutMissedChoice",
            MatrixState::Iti => "ITI",
            MatrixState::ExtIti => "ext_ITI",
        }
    }
}

impl fmt::Display for MatrixState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for a state name the hardware reported that the encoder never emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStateName(pub String);

impl fmt::Display for UnknownStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown state name {:?}", self.0)
    }
}

impl std::error::Error for UnknownStateName {}

impl FromStr for MatrixState {
    type Err = UnknownStateName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatrixState::ALL
            .iter()
            .copied()
            .find(|state| state.name() == s)
            .ok_or_else(|| UnknownStateName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for state in MatrixState::ALL {
            assert_eq!(state.name().parse::<MatrixState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("NotAState".parse::<MatrixState>().is_err());
    }

    #[test]
    fn all_variants_are_distinct() {
        let mut names: Vec<&str> = MatrixState::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MatrixState::ALL.len());
    }
}
