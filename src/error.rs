//! Crate-wide errors.

use thiserror::Error;

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by grid generation, snapping, batch filtering and
/// inference. An incomplete assembly is not an error: it is signalled by
/// [`crate::assemble::assemble`] returning `None`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid grid spec: {0}")]
    InvalidGridSpec(String),

    #[error("no valid quality-map cell within radius {radius} of ({i}, {x})")]
    GridSnapFailed { i: usize, x: usize, radius: usize },

    #[error("component `{component}` has {got} entries, expected {expected}")]
    ComponentMisalignment {
        component: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("failed to load crop at {position:?}: {reason}")]
    LoadFailed { position: [usize; 3], reason: String },

    #[error("predictor returned {got} crops, expected {expected}")]
    PredictionMismatch { expected: usize, got: usize },
}
