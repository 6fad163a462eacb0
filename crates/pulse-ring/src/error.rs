//! Ring Error Types

use crate::Status;
use thiserror::Error;

/// Errors raised by ring setup and producer-side ring control
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Zero capacity, or more cells than the backing region can address
    #[error("Invalid capacity {requested}: region holds at most {max} cells")]
    Capacity { requested: usize, max: usize },

    /// Operation not permitted in the current engine state
    #[error("Cannot {op} while {status}")]
    InvalidState { op: &'static str, status: Status },
}
