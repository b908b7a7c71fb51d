//! Fatal error taxonomy for the trial engine and encoder.
//!
//! Everything here is configuration / operator error: the session must abort
//! rather than guess a default. Recoverable data oddities (e.g. a missing
//! hardware state in a visit log) are `tracing::warn!`ed instead, never
//! surfaced as errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A trial index past the ledger's pre-sized capacity was requested.
    #[error("trial ledger capacity exceeded: requested through trial {requested}, capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// A valve has no calibration table, or fewer than the two measured
    /// points needed to fit the volume-to-duration curve.
    #[error("valve {valve}: {measurements} liquid calibration measurement(s), at least 2 required")]
    InsufficientCalibration { valve: u8, measurements: usize },

    /// The fitted calibration polynomial produced a negative open duration.
    #[error("valve {valve}: calibration yields negative open time for {volume_ul} ul")]
    NegativeValveTime { valve: u8, volume_ul: f64 },

    /// Truncated-exponential support collapsed to a single point at zero.
    #[error("truncated exponential: min and max are both 0")]
    DegenerateExponentialRange,

    /// A distribution parameter that must be strictly positive was not.
    #[error("{name} must be positive, got {value}")]
    NonPositiveParameter { name: &'static str, value: f64 },

    /// The encoder was asked to build a trial whose future fields were never
    /// generated.
    #[error("trial {index} has not been generated yet")]
    TrialNotGenerated { index: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;
