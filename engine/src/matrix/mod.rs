//! The declarative state-transition table handed to the behavior controller,
//! and the per-trial builder that assembles it from the ledger snapshot.
//!
//! A [`StateMatrix`] is immutable once built: ordered named states, each with
//! a timer, event-to-target edges, and on-entry output actions, plus the
//! session's global timers and an optional optogenetics trigger patch.

mod builder;
mod state;

pub use builder::build;
pub use state::{MatrixState, UnknownStateName};

use serde::{Deserialize, Serialize};

use crate::config::DrawParams;

/// A hardware input event that can drive a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// The state's own timer elapsed ("Tup" in Bpod terms).
    Tup,
    PortIn(u8),
    PortOut(u8),
    GlobalTimerEnd(u8),
    SoftCode(u8),
    Condition(u8),
}

/// Where an event leads: another named state, or out of the trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    State(MatrixState),
    Exit,
}

/// An on-entry output: a channel-or-line identifier plus the value driven
/// onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputAction {
    /// PWM intensity on a port LED, 0-255.
    Pwm { port: u8, intensity: u8 },
    /// Open a valve (bitcoded by the execution layer).
    Valve(u8),
    /// Digital BNC line level.
    Bnc { line: u8, level: u8 },
    /// Wire line level.
    Wire { line: u8, level: u8 },
    /// Soft code routed to the host process.
    SoftCode(u8),
    /// Arm a global timer.
    GlobalTimerTrig(u8),
}

/// One row of the transition table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub name: MatrixState,
    /// Seconds; 0 means the state only leaves via an external event.
    pub timer: f64,
    pub transitions: Vec<(Event, Target)>,
    pub outputs: Vec<OutputAction>,
}

/// Optogenetics trigger attached to a trial's matrix when opto is enabled.
///
/// Delay and maximum duration are transmitted to the auxiliary serial device
/// as little-endian 32-bit millisecond words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptoTrigger {
    pub start_delay_ms: u32,
    pub max_duration_ms: u32,
}

impl OptoTrigger {
    pub fn serial_words(&self) -> [[u8; 4]; 2] {
        [
            self.start_delay_ms.to_le_bytes(),
            self.max_duration_ms.to_le_bytes(),
        ]
    }
}

/// The full per-trial table. Built fresh per trial, discarded after the
/// trial resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMatrix {
    pub states: Vec<StateDef>,
    /// Global timer durations indexed by timer id 1..=5, seconds.
    pub global_timers: Vec<(u8, f64)>,
    pub opto: Option<OptoTrigger>,
    /// Renderer parameters for the visual modalities; `None` for trials with
    /// no externally drawn stimulus.
    pub draw: Option<DrawParams>,
}

impl StateMatrix {
    pub fn state(&self, name: MatrixState) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Every transition target that is a named state must be defined in the
    /// table; the one exception is the literal exit.
    pub fn undefined_targets(&self) -> Vec<MatrixState> {
        let mut missing: Vec<MatrixState> = self
            .states
            .iter()
            .flat_map(|s| s.transitions.iter())
            .filter_map(|(_, target)| match target {
                Target::State(state) if self.state(*state).is_none() => Some(*state),
                _ => None,
            })
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// States reachable from the initial state by following any edge.
    pub fn reachable(&self) -> Vec<MatrixState> {
        let mut seen: Vec<MatrixState> = Vec::new();
        let mut queue: Vec<MatrixState> = self.states.first().map(|s| s.name).into_iter().collect();
        while let Some(name) = queue.pop() {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(def) = self.state(name) {
                for (_, target) in &def.transitions {
                    if let Target::State(next) = target {
                        queue.push(*next);
                    }
                }
            }
        }
        seen
    }

    /// True when some reachable state has an edge to the exit target.
    pub fn exit_reachable(&self) -> bool {
        self.reachable().iter().any(|name| {
            self.state(*name)
                .map(|def| def.transitions.iter().any(|(_, t)| *t == Target::Exit))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opto_trigger_serializes_little_endian() {
        let trigger = OptoTrigger {
            start_delay_ms: 1,
            max_duration_ms: 10_000,
        };
        let words = trigger.serial_words();
        assert_eq!(words[0], [1, 0, 0, 0]);
        assert_eq!(words[1], [0x10, 0x27, 0, 0]);
    }

    #[test]
    fn undefined_target_is_reported() {
        let matrix = StateMatrix {
            states: vec![StateDef {
                name: MatrixState::ItiSignal,
                timer: 0.0,
                transitions: vec![(Event::Tup, Target::State(MatrixState::Reward))],
                outputs: vec![],
            }],
            global_timers: vec![],
            opto: None,
            draw: None,
        };
        assert_eq!(matrix.undefined_targets(), vec![MatrixState::Reward]);
        assert!(!matrix.exit_reachable());
    }
}
