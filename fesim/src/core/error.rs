use thiserror::Error;

/// SimError covers every fallible operation of the simulation kernel.
///
/// Construction errors (`BadTrack`, `BadConfig`, `BadGrid`) prevent any tick
/// from running. `NumericalBlowup` aborts the affected tick without committing
/// partial state; the simulation may be resumed only after the caller
/// acknowledges the error. Agent retirements (DNF) are state transitions
/// reported through the event stream, never errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("bad track: {reason}")]
    BadTrack { reason: String },

    #[error("bad config: {reason}")]
    BadConfig { reason: String },

    #[error("bad starting grid: {reason}")]
    BadGrid { reason: String },

    #[error("numerical blowup in tick {step_index}: {detail}")]
    NumericalBlowup { step_index: u64, detail: String },

    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

impl SimError {
    pub fn bad_track(reason: impl Into<String>) -> Self {
        SimError::BadTrack {
            reason: reason.into(),
        }
    }

    pub fn bad_config(reason: impl Into<String>) -> Self {
        SimError::BadConfig {
            reason: reason.into(),
        }
    }

    pub fn bad_grid(reason: impl Into<String>) -> Self {
        SimError::BadGrid {
            reason: reason.into(),
        }
    }
}
