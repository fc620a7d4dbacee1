// Engine configuration

use crate::entropy::{DEFAULT_STARTING_POINTS, DEFAULT_WINDOW, ELECTRODE_COUNT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration error, fatal at engine start.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Could not read the configuration file
    Io(String),
    /// Not valid JSON
    Parse(String),
    /// Parsed fine but the values are unusable
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which bio-compute backend drives the entropy pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BioMode {
    Simulated,
    RealMea,
}

/// Transport used to reach a physical MEA device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Serial,
    Tcp,
    Udp,
    SharedMemory,
    NamedPipe,
    File,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::SharedMemory => write!(f, "shared_memory"),
            TransportKind::NamedPipe => write!(f, "named_pipe"),
            TransportKind::File => write!(f, "file"),
        }
    }
}

/// Simulated-backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Layer sizes, input through output
    pub layers: Vec<usize>,
    pub learning_rate: f64,
    pub decay: f64,
    pub momentum: f64,
    /// Epoch cap for initial learning
    pub max_iterations: u32,
    /// Accuracy that ends initial learning early
    pub target_accuracy: f64,
    /// Seed for weight init and activation jitter
    pub noise_seed: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            layers: vec![ELECTRODE_COUNT, 128, 64, 32],
            learning_rate: 0.01,
            decay: 0.995,
            momentum: 0.9,
            max_iterations: 100,
            target_accuracy: 0.85,
            noise_seed: 0x00b1_0c41_ae60_5eed,
        }
    }
}

/// Bio-compute configuration, shared by both backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BioConfig {
    pub mode: BioMode,
    /// Fixed at 60; validated, not variable
    pub electrode_count: usize,
    pub sampling_rate_hz: u32,
    pub amplification: u32,
    pub filter_low_hz: f64,
    pub filter_high_hz: f64,
    /// Stimulation voltage ceiling
    pub stim_v_max: f64,
    /// Stimulation current ceiling, microamps
    pub stim_i_max_ua: f64,
    pub spike_detection: bool,
    pub spike_threshold_uv: f64,
    /// Copy a waveform window into each spike event
    pub capture_waveforms: bool,
    pub transport: TransportKind,
    pub device_path: String,
    pub network_host: String,
    pub network_port: u16,
    pub baud_rate: u32,
    pub connect_timeout_ms: u32,
    pub read_timeout_ms: u32,
    pub max_retries: u32,
    pub auto_calibration: bool,
    pub calibration_file: Option<PathBuf>,
    pub simulated: SimulatedConfig,
}

impl Default for BioConfig {
    fn default() -> Self {
        Self {
            mode: BioMode::Simulated,
            electrode_count: ELECTRODE_COUNT,
            sampling_rate_hz: 25_000,
            amplification: 1200,
            filter_low_hz: 300.0,
            filter_high_hz: 8000.0,
            stim_v_max: 5.0,
            stim_i_max_ua: 100.0,
            spike_detection: true,
            spike_threshold_uv: -50.0,
            capture_waveforms: false,
            transport: TransportKind::Serial,
            device_path: "/dev/ttyUSB0".to_string(),
            network_host: "127.0.0.1".to_string(),
            network_port: 6340,
            baud_rate: 115_200,
            connect_timeout_ms: 5000,
            read_timeout_ms: 1000,
            max_retries: 3,
            auto_calibration: true,
            calibration_file: None,
            simulated: SimulatedConfig::default(),
        }
    }
}

/// Starting-point strategy override; `Auto` follows seed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOverride {
    Auto,
    Uniform,
    Fibonacci,
    BioGuided,
}

/// Mining configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Worker threads; 0 means logical cores minus one
    pub threads: u32,
    pub starting_points: u32,
    pub window_size: u32,
    pub strategy_override: StrategyOverride,
    /// Weight given to bio guidance when degrading; in [0, 1]
    pub bio_weight: f64,
    pub max_duration_ms: Option<u64>,
    /// How long to wait for a bio response per job
    pub stimulate_wait_ms: u64,
    /// Record and punish exhausted jobs
    pub negative_reinforcement: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            starting_points: DEFAULT_STARTING_POINTS as u32,
            window_size: DEFAULT_WINDOW,
            strategy_override: StrategyOverride::Auto,
            bio_weight: 1.0,
            max_duration_ms: None,
            stimulate_wait_ms: 500,
            negative_reinforcement: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bio: BioConfig,
    pub mining: MiningConfig,
    /// Where the simulated model is persisted; never saved when unset
    pub model_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bio = &self.bio;
        if bio.electrode_count != ELECTRODE_COUNT {
            return Err(ConfigError::Invalid(format!(
                "electrode_count must be {}, got {}",
                ELECTRODE_COUNT, bio.electrode_count
            )));
        }
        if bio.stim_v_max <= 0.0 || !bio.stim_v_max.is_finite() {
            return Err(ConfigError::Invalid("stim_v_max must be positive".into()));
        }
        if bio.stim_i_max_ua <= 0.0 || !bio.stim_i_max_ua.is_finite() {
            return Err(ConfigError::Invalid("stim_i_max_ua must be positive".into()));
        }
        if bio.filter_low_hz >= bio.filter_high_hz {
            return Err(ConfigError::Invalid(format!(
                "filter band is empty: {} Hz .. {} Hz",
                bio.filter_low_hz, bio.filter_high_hz
            )));
        }
        if bio.sampling_rate_hz == 0 {
            return Err(ConfigError::Invalid("sampling_rate_hz must be nonzero".into()));
        }

        let sim = &bio.simulated;
        if sim.layers.len() < 2 {
            return Err(ConfigError::Invalid("simulated.layers needs at least input and output".into()));
        }
        if sim.layers[0] != ELECTRODE_COUNT {
            return Err(ConfigError::Invalid(format!(
                "simulated input layer must be {}, got {}",
                ELECTRODE_COUNT, sim.layers[0]
            )));
        }
        if *sim.layers.last().unwrap() != 32 {
            return Err(ConfigError::Invalid(format!(
                "simulated output layer must be 32, got {}",
                sim.layers.last().unwrap()
            )));
        }
        if sim.learning_rate <= 0.0 || sim.learning_rate >= 1.0 {
            return Err(ConfigError::Invalid("simulated.learning_rate must be in (0, 1)".into()));
        }
        if sim.decay <= 0.0 || sim.decay > 1.0 {
            return Err(ConfigError::Invalid("simulated.decay must be in (0, 1]".into()));
        }
        if !(0.0..1.0).contains(&sim.momentum) {
            return Err(ConfigError::Invalid("simulated.momentum must be in [0, 1)".into()));
        }
        if !(0.0..=1.0).contains(&sim.target_accuracy) {
            return Err(ConfigError::Invalid("simulated.target_accuracy must be in [0, 1]".into()));
        }

        let mining = &self.mining;
        if mining.starting_points == 0 {
            return Err(ConfigError::Invalid("mining.starting_points must be nonzero".into()));
        }
        if mining.window_size == 0 {
            return Err(ConfigError::Invalid("mining.window_size must be nonzero".into()));
        }
        if !(0.0..=1.0).contains(&mining.bio_weight) {
            return Err(ConfigError::Invalid("mining.bio_weight must be in [0, 1]".into()));
        }

        Ok(())
    }

    /// Effective worker-thread count: configured, or cores minus one.
    pub fn worker_threads(&self) -> usize {
        if self.mining.threads > 0 {
            self.mining.threads as usize
        } else {
            (num_cpus::get().saturating_sub(1)).max(1)
        }
    }
}
