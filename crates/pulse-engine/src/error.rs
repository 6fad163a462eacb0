//! Device Error Types

use pulse_ring::{Cell, RingError, Status};
use thiserror::Error;

/// Errors surfaced synchronously to the producer side
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Ring capacity is zero or larger than the region allows
    #[error("Invalid capacity {requested}: region holds at most {max} cells")]
    Capacity { requested: usize, max: usize },

    /// Control operation not permitted in the current state
    #[error("Cannot {op} while {status}")]
    InvalidState { op: &'static str, status: Status },

    /// The engine ran out of cells and latched an underrun
    #[error("Engine underrun with {pending} cells pending")]
    Underrun { pending: usize },

    /// Requested mapping window exceeds the region
    #[error("Mapping of {requested} bytes exceeds {available} byte region")]
    Size { requested: usize, available: usize },

    /// Region window could not be exposed
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Cell rejected by the producer's overlap check
    #[error("Cell clears and sets the same bits: {0:?}")]
    InvalidCell(Cell),

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Consumer thread could not be started
    #[error("Failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<RingError> for DeviceError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Capacity { requested, max } => DeviceError::Capacity { requested, max },
            RingError::InvalidState { op, status } => DeviceError::InvalidState { op, status },
        }
    }
}
