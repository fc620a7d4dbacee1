// Bio-entropy guided Bitcoin proof-of-work mining engine
//
// A block header is turned into an electrode stimulus, a bio-compute
// backend (simulated neural model or a real multi-electrode array) answers
// with a response, and the response seeds the nonce starting points the
// parallel scheduler scans. Successful nonces are fed back so the backend
// amplifies the patterns that worked.

pub mod bio;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod entropy;
pub mod metrics;
pub mod mining;

// Re-exports for convenience
pub use cli::{Cli, CliHandler};
pub use config::{BioConfig, BioMode, EngineConfig, MiningConfig, TransportKind};
pub use crate::core::{BlockHeader, Hash256, Target, hash256, hash_candidate};
pub use engine::{EngineStage, EngineStatus, JobReport, MiningEngine};
pub use entropy::{EntropySeed, HeaderFeatures, StartingPoints, StimulusPattern, Strategy};
pub use metrics::{Metrics, MetricsSnapshot};
pub use mining::{MiningError, MiningJob, MiningOutcome};
