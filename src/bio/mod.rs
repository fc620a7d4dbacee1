// Bio-compute subsystem: capability contract and backends

pub mod mea;
mod memory;
mod response;
pub mod simulated;

pub use memory::{PatternMemory, PatternRecord, cosine_similarity};
pub use response::{BioResponse, SpikeEvent};

use crate::entropy::StimulusPattern;
use std::fmt;

/// Bio-compute error kinds. `NotReady`, `Timeout` and `DeviceDisconnected`
/// are retryable after re-initialisation; the rest are reported and make
/// the current job fall back to uniform starting points.
#[derive(Debug, Clone, PartialEq)]
pub enum BioError {
    /// Backend not initialised, or initialisation lost
    NotReady,
    /// Device did not answer within the allowed window
    Timeout,
    /// Transport closed or device went away
    DeviceDisconnected,
    /// Captured response too noisy to use
    SignalQualityBelowFloor,
    /// Anything unexpected inside a backend
    Internal(String),
    /// Persisted model does not match the configured topology
    ModelIncompatible(String),
}

impl BioError {
    /// Whether the scheduler may re-issue the operation after re-init.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BioError::NotReady | BioError::Timeout | BioError::DeviceDisconnected
        )
    }
}

impl fmt::Display for BioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BioError::NotReady => write!(f, "bio backend not ready"),
            BioError::Timeout => write!(f, "bio device timed out"),
            BioError::DeviceDisconnected => write!(f, "bio device disconnected"),
            BioError::SignalQualityBelowFloor => write!(f, "signal quality below floor"),
            BioError::Internal(msg) => write!(f, "bio internal error: {}", msg),
            BioError::ModelIncompatible(msg) => write!(f, "model incompatible: {}", msg),
        }
    }
}

impl std::error::Error for BioError {}

/// The capability every bio-compute backend provides. Deliberately
/// blocking: the engine calls it from a dedicated bio worker thread, never
/// from a mining worker.
pub trait BioCompute: Send {
    /// Bring the backend to a ready state (connect, calibrate, or build
    /// the simulated network). Idempotent when already ready.
    fn initialise(&mut self) -> Result<(), BioError>;

    /// True once `initialise` has succeeded and the backend can stimulate.
    fn ready(&self) -> bool;

    /// Apply a stimulus and capture the 60-electrode response, waiting up
    /// to `wait_ms` for the device.
    fn stimulate_and_capture(
        &mut self,
        pattern: &StimulusPattern,
        wait_ms: u64,
    ) -> Result<BioResponse, BioError>;

    /// Feed back a mining outcome. `reward` is in [-1, 1]; positive reward
    /// amplifies the association between `pattern` and `nonce`.
    fn reinforce(&mut self, pattern: &StimulusPattern, nonce: u32, reward: f64)
    -> Result<(), BioError>;

    /// Return to a freshly-initialised state.
    fn reset(&mut self) -> Result<(), BioError>;

    /// Human-readable one-line state summary.
    fn diagnostic(&self) -> String;
}
