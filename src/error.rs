//! Typed errors surfaced by the forecast engine.
//!
//! Only genuine input faults are errors. Missing readings, zero wind and
//! sub-threshold propagation are ordinary outcomes and never reach this type.

use crate::models::AlertStatus;

/// Result alias used throughout the engine.
pub type ForecastResult<T> = Result<T, ForecastError>;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    #[error("degenerate partition input: {reason}")]
    DegenerateInput { reason: String },

    #[error("invalid coordinates: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("invalid bounding region: {reason}")]
    InvalidBounds { reason: String },

    #[error("illegal alert transition from {from:?} to {to:?}")]
    InvalidAlertTransition { from: AlertStatus, to: AlertStatus },
}

impl ForecastError {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        ForecastError::DegenerateInput {
            reason: reason.into(),
        }
    }
}
