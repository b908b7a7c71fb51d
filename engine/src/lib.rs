//! Trial engine and Bpod state-matrix encoder for a two-alternative
//! forced-choice rodent task. The engine generates trials in batches, scores
//! finished trials from state-visit logs and adapts the session parameters;
//! the encoder turns one generated trial into the transition table the rig
//! executes.

pub mod calibration;
pub mod config;
pub mod error;
pub mod ledger;
pub mod matrix;
pub mod run;
pub mod sampling;
pub mod stimulus;
pub mod summary;
pub mod visits;

pub use calibration::{ValveCalibration, DEFAULT_CALIBRATION};
pub use config::{ExperimentType, OmegaTable, StimulusSelection, TaskParameters};
pub use error::{EngineError, Result};
pub use ledger::{Trial, TrialLedger, TRIAL_CAPACITY};
pub use matrix::{build, MatrixState, StateMatrix};
pub use run::TrialEngine;
pub use summary::SessionSummary;
pub use visits::{TrialVisits, Visit};
