// Simulated bio-compute backend

pub mod network;
pub mod training;

pub use network::{LayeredNetwork, OUTPUT_BITS, bits_to_nonce, nonce_bits};
pub use training::{TrainingExample, TrainingReport, TrainingState};

use crate::bio::{BioCompute, BioError, BioResponse, PatternRecord};
use crate::config::SimulatedConfig;
use crate::entropy::StimulusPattern;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// Version tag of the persisted model document.
const MODEL_FORMAT_VERSION: u32 = 1;

/// Minimum gap between retro-learning passes.
const RETRO_INTERVAL: Duration = Duration::from_secs(30);

/// Persisted form of the simulated backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedModel {
    version: u32,
    layers: Vec<usize>,
    network: LayeredNetwork,
    state: TrainingState,
    trained_epochs: u64,
    reinforcements: u64,
}

/// In-process layered neural model standing in for a physical array.
/// Plasticity is Hebbian with an optional supervised pull toward a known
/// nonce, so reinforcement has a monotone, observable effect.
pub struct SimulatedBackend {
    config: SimulatedConfig,
    network: LayeredNetwork,
    state: TrainingState,
    initialised: bool,
    trained_epochs: u64,
    reinforcements: u64,
    last_retro: Option<Instant>,
}

impl SimulatedBackend {
    pub fn new(config: &SimulatedConfig) -> Result<Self, BioError> {
        if config.layers.len() < 2 {
            return Err(BioError::Internal(format!(
                "network needs at least two layers, got {}",
                config.layers.len()
            )));
        }
        if *config.layers.last().unwrap() != OUTPUT_BITS {
            return Err(BioError::Internal(format!(
                "output layer must be {} wide, got {}",
                OUTPUT_BITS,
                config.layers.last().unwrap()
            )));
        }

        Ok(Self {
            network: Self::build_network(config),
            config: config.clone(),
            state: TrainingState::Untrained,
            initialised: false,
            trained_epochs: 0,
            reinforcements: 0,
            last_retro: None,
        })
    }

    fn build_network(config: &SimulatedConfig) -> LayeredNetwork {
        LayeredNetwork::new(
            &config.layers,
            config.learning_rate,
            config.decay,
            config.momentum,
            config.noise_seed,
        )
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Predicted nonce and prediction confidence for a stimulus.
    pub fn predict_nonce(&self, pattern: &StimulusPattern) -> (u32, f64) {
        self.network.predict_nonce(&pattern.amplitudes())
    }

    /// Initial supervised learning over a set of examples. Transitions
    /// `Untrained -> InitialLearning -> Trained` when the accuracy target
    /// is reached or the epoch cap is hit.
    pub fn train(&mut self, examples: &[TrainingExample]) -> TrainingReport {
        self.state = TrainingState::InitialLearning;
        let report = training::run_epochs(
            &mut self.network,
            examples,
            self.config.max_iterations,
            self.config.target_accuracy,
            self.config.noise_seed.wrapping_add(self.trained_epochs),
        );
        self.trained_epochs += report.epochs as u64;
        self.state = TrainingState::Trained;
        log::info!(
            "initial learning finished: {} epochs, bit accuracy {:.3}",
            report.epochs,
            report.accuracy
        );
        report
    }

    /// Short focused pass over remembered successes. Rate-limited; returns
    /// None when called again too soon or with nothing to learn from.
    pub fn retro_learn(&mut self, records: &[PatternRecord]) -> Option<TrainingReport> {
        if let Some(last) = self.last_retro {
            if last.elapsed() < RETRO_INTERVAL {
                return None;
            }
        }

        let examples: Vec<TrainingExample> = records
            .iter()
            .filter(|record| record.success_score > 0.5)
            .map(|record| TrainingExample {
                features: record.features.clone(),
                nonce: record.nonce,
            })
            .collect();
        if examples.is_empty() {
            return None;
        }

        self.last_retro = Some(Instant::now());
        let previous = self.state;
        self.state = TrainingState::Retraining;
        let report = training::run_epochs(
            &mut self.network,
            &examples,
            (self.config.max_iterations / 5).max(1),
            self.config.target_accuracy,
            self.config.noise_seed.wrapping_add(self.reinforcements),
        );
        self.trained_epochs += report.epochs as u64;
        self.state = match previous {
            TrainingState::Untrained => TrainingState::Trained,
            other => other,
        };
        Some(report)
    }

    /// Serialise the full state to a JSON document at `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let saved = SavedModel {
            version: MODEL_FORMAT_VERSION,
            layers: self.config.layers.clone(),
            network: self.network.clone(),
            state: self.state,
            trained_epochs: self.trained_epochs,
            reinforcements: self.reinforcements,
        };
        let json = serde_json::to_string(&saved).map_err(|e| format!("serialise model: {}", e))?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| format!("write {}: {}", path.as_ref().display(), e))
    }

    /// Load a persisted model. The stored topology must match the
    /// configured one exactly; otherwise the caller has to reset or
    /// reconfigure.
    pub fn load<P: AsRef<Path>>(config: &SimulatedConfig, path: P) -> Result<Self, BioError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BioError::Internal(format!("read {}: {}", path.as_ref().display(), e)))?;
        let saved: SavedModel = serde_json::from_str(&json)
            .map_err(|e| BioError::Internal(format!("parse model: {}", e)))?;

        if saved.version != MODEL_FORMAT_VERSION {
            return Err(BioError::ModelIncompatible(format!(
                "model format v{} (expected v{})",
                saved.version, MODEL_FORMAT_VERSION
            )));
        }
        if saved.layers != config.layers {
            return Err(BioError::ModelIncompatible(format!(
                "model topology {:?} does not match configured {:?}",
                saved.layers, config.layers
            )));
        }

        Ok(Self {
            config: config.clone(),
            network: saved.network,
            state: saved.state,
            initialised: false,
            trained_epochs: saved.trained_epochs,
            reinforcements: saved.reinforcements,
            last_retro: None,
        })
    }
}

impl BioCompute for SimulatedBackend {
    fn initialise(&mut self) -> Result<(), BioError> {
        self.initialised = true;
        Ok(())
    }

    fn ready(&self) -> bool {
        self.initialised
    }

    fn stimulate_and_capture(
        &mut self,
        pattern: &StimulusPattern,
        _wait_ms: u64,
    ) -> Result<BioResponse, BioError> {
        if !self.ready() {
            return Err(BioError::NotReady);
        }

        let activations = self.network.forward(&pattern.amplitudes());
        // The captured response is the first hidden layer, resized to the
        // electrode count
        Ok(BioResponse::from_samples(activations[1].clone()))
    }

    fn reinforce(
        &mut self,
        pattern: &StimulusPattern,
        nonce: u32,
        reward: f64,
    ) -> Result<(), BioError> {
        if !self.ready() {
            return Err(BioError::NotReady);
        }

        let input = pattern.amplitudes();
        let activations = self.network.forward(&input);
        self.network.hebbian_update(&activations, reward.clamp(-1.0, 1.0));

        // Pull the output layer toward the nonce only when it was a success
        if reward > 0.0 {
            self.network.backprop(&input, &nonce_bits(nonce));
        }

        self.reinforcements += 1;
        if self.state == TrainingState::Trained {
            self.state = TrainingState::Optimising;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BioError> {
        self.network = Self::build_network(&self.config);
        self.state = TrainingState::Untrained;
        self.trained_epochs = 0;
        self.reinforcements = 0;
        self.last_retro = None;
        self.initialised = true;
        Ok(())
    }

    fn diagnostic(&self) -> String {
        format!(
            "simulated backend: layers {:?}, state {}, {} epochs, {} reinforcements",
            self.config.layers, self.state, self.trained_epochs, self.reinforcements
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::cosine_similarity;
    use crate::core::{BlockHeader, Hash256};
    use crate::entropy::{ELECTRODE_COUNT, HeaderFeatures};

    fn small_config() -> SimulatedConfig {
        SimulatedConfig {
            layers: vec![60, 16, 32],
            learning_rate: 0.05,
            decay: 0.9995,
            ..SimulatedConfig::default()
        }
    }

    fn sample_pattern() -> StimulusPattern {
        let header = BlockHeader::new(
            1,
            Hash256::from_hex("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f")
                .unwrap(),
            Hash256::from_hex("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b")
                .unwrap(),
            1231469665,
            0x1d00ffff,
            0,
        );
        StimulusPattern::build(&HeaderFeatures::extract(&header, 244.0), 5.0)
    }

    fn ready_backend() -> SimulatedBackend {
        let mut backend = SimulatedBackend::new(&small_config()).unwrap();
        backend.initialise().unwrap();
        backend
    }

    #[test]
    fn test_requires_initialise() {
        let mut backend = SimulatedBackend::new(&small_config()).unwrap();
        assert!(!backend.ready());
        assert_eq!(
            backend.stimulate_and_capture(&sample_pattern(), 100).unwrap_err(),
            BioError::NotReady
        );

        backend.initialise().unwrap();
        assert!(backend.ready());
        let response = backend.stimulate_and_capture(&sample_pattern(), 100).unwrap();
        assert_eq!(response.samples.len(), ELECTRODE_COUNT);
    }

    #[test]
    fn test_rejects_bad_topology() {
        let mut config = small_config();
        config.layers = vec![60, 16, 16];
        assert!(SimulatedBackend::new(&config).is_err());
    }

    #[test]
    fn test_capture_is_reproducible() {
        let mut backend = ready_backend();
        let pattern = sample_pattern();
        let a = backend.stimulate_and_capture(&pattern, 100).unwrap();
        let b = backend.stimulate_and_capture(&pattern, 100).unwrap();
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn test_reinforcement_pulls_prediction_toward_nonce() {
        let mut backend = ready_backend();
        let pattern = sample_pattern();
        let target_bits = nonce_bits(0xdeadbeef);

        let initial = backend.network.output(&pattern.amplitudes());
        let initial_similarity = cosine_similarity(&initial, &target_bits);

        for _ in 0..50 {
            backend.reinforce(&pattern, 0xdeadbeef, 1.0).unwrap();
        }

        let trained = backend.network.output(&pattern.amplitudes());
        let trained_similarity = cosine_similarity(&trained, &target_bits);
        assert!(
            trained_similarity > initial_similarity,
            "similarity {} -> {}",
            initial_similarity,
            trained_similarity
        );
    }

    #[test]
    fn test_state_transitions() {
        let mut backend = ready_backend();
        assert_eq!(backend.state(), TrainingState::Untrained);

        let examples = vec![TrainingExample {
            features: vec![0.4; 60],
            nonce: 0x1234_5678,
        }];
        backend.train(&examples);
        assert_eq!(backend.state(), TrainingState::Trained);

        backend.reinforce(&sample_pattern(), 1, 1.0).unwrap();
        assert_eq!(backend.state(), TrainingState::Optimising);

        backend.reset().unwrap();
        assert_eq!(backend.state(), TrainingState::Untrained);
    }

    #[test]
    fn test_save_load_round_trip_is_bitwise() {
        let dir = std::env::temp_dir().join("bio-mining-model-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.json");

        let mut backend = ready_backend();
        let examples = vec![TrainingExample {
            features: (0..60).map(|i| i as f64 / 60.0).collect(),
            nonce: 0xcafe_babe,
        }];
        backend.train(&examples);
        backend.save(&path).unwrap();

        let restored = SimulatedBackend::load(&small_config(), &path).unwrap();
        let pattern = sample_pattern();
        assert_eq!(
            backend.network.forward(&pattern.amplitudes()),
            restored.network.forward(&pattern.amplitudes())
        );
        assert_eq!(restored.state(), TrainingState::Trained);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_rejects_topology_mismatch() {
        let dir = std::env::temp_dir().join("bio-mining-model-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model-mismatch.json");

        ready_backend().save(&path).unwrap();

        let mut other = small_config();
        other.layers = vec![60, 32, 32];
        match SimulatedBackend::load(&other, &path) {
            Err(BioError::ModelIncompatible(_)) => {}
            other => panic!("expected ModelIncompatible, got {:?}", other.map(|_| ())),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_retro_learning_rate_limited() {
        let mut backend = ready_backend();
        let record = PatternRecord {
            features: vec![0.6; 60],
            response: vec![0.1; 60],
            nonce: 42,
            success_score: 1.0,
            timestamp_us: 0,
        };

        assert!(backend.retro_learn(std::slice::from_ref(&record)).is_some());
        // Immediately again: blocked by the interval
        assert!(backend.retro_learn(std::slice::from_ref(&record)).is_none());
    }

    #[test]
    fn test_retro_learning_ignores_failures() {
        let mut backend = ready_backend();
        let failure = PatternRecord {
            features: vec![0.6; 60],
            response: vec![0.1; 60],
            nonce: 0,
            success_score: 0.0,
            timestamp_us: 0,
        };
        assert!(backend.retro_learn(std::slice::from_ref(&failure)).is_none());
    }
}
