// Mining scheduler

mod job;
mod scheduler;

pub use job::MiningJob;
pub use scheduler::{MiningOutcome, mine};

use crate::bio::BioError;
use std::fmt;

/// Errors fatal to a mining job (never to the engine).
#[derive(Debug, Clone, PartialEq)]
pub enum MiningError {
    /// Header could not be parsed or serialised
    InvalidHeader(String),
    /// Compact bits decode to no usable target
    InvalidTarget(String),
    /// Bio-compute failure that could not be degraded away
    Bio(BioError),
    /// Unexpected scheduler failure
    Internal(String),
}

impl fmt::Display for MiningError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MiningError::InvalidHeader(msg) => write!(f, "invalid header: {}", msg),
            MiningError::InvalidTarget(msg) => write!(f, "invalid target: {}", msg),
            MiningError::Bio(err) => write!(f, "bio subsystem: {}", err),
            MiningError::Internal(msg) => write!(f, "scheduler error: {}", msg),
        }
    }
}

impl std::error::Error for MiningError {}

impl From<BioError> for MiningError {
    fn from(err: BioError) -> Self {
        MiningError::Bio(err)
    }
}
