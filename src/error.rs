//! Error taxonomy for the erosion engine.

use thiserror::Error;

use crate::erosion::SimulationState;

#[derive(Debug, Error)]
pub enum ErosionError {
    /// No compute adapter or device could be obtained.
    #[error("compute context unavailable: {0}")]
    Initialization(String),

    /// The input heightfield does not match the requested grid.
    #[error("heightfield has {actual} cells, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Buffer, shader or pipeline allocation failed.
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation { resource: &'static str, reason: String },

    /// A dispatch or readback failed while the simulation was running.
    #[error("compute failure: {0}")]
    RuntimeCompute(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Height that is not finite or does not fit the fixed-point range.
    #[error("height {value} at cell {index} cannot be represented in fixed point")]
    InvalidHeight { index: usize, value: f32 },

    #[error("simulation cannot run from state {0}")]
    NotRunnable(SimulationState),
}
