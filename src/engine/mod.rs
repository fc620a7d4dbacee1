// Engine supervisor: composes the bio pipeline with the mining scheduler

mod bio_worker;
mod status;

pub use bio_worker::BioWorker;
pub use status::{EngineStage, EngineStatus, ErrorKind, StatusCell};

use crate::bio::simulated::{TrainingExample, TrainingReport};
use crate::bio::{BioError, BioResponse, PatternMemory, PatternRecord};
use crate::config::{BioMode, EngineConfig, StrategyOverride};
use crate::core::{BlockHeader, Target, hash256};
use crate::entropy::{EntropySeed, HeaderFeatures, StartingPoints, StimulusPattern, Strategy, synthesise};
use crate::metrics::Metrics;
use crate::mining::{MiningError, MiningJob, MiningOutcome, mine};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Capacity of the engine's pattern memory.
const PATTERN_MEMORY_CAPACITY: usize = 1000;

/// Neural nonce predictions below this confidence are not used.
const PREDICTION_CONFIDENCE_FLOOR: f64 = 0.5;

/// Reward applied on an exhausted job when negative reinforcement is on.
const NEGATIVE_REWARD: f64 = -0.2;

/// Fatal engine-construction errors.
#[derive(Debug)]
pub enum EngineError {
    Config(crate::config::ConfigError),
    Bio(BioError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Config(err) => write!(f, "{}", err),
            EngineError::Bio(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<BioError> for EngineError {
    fn from(err: BioError) -> Self {
        EngineError::Bio(err)
    }
}

/// What one mining job produced.
#[derive(Debug, Clone, Copy)]
pub struct JobReport {
    pub job_id: u64,
    pub outcome: MiningOutcome,
    pub strategy: Strategy,
    /// Seed confidence after weighting; None when the bio pipeline was
    /// degraded away
    pub bio_confidence: Option<f64>,
}

/// The mining engine. Owns all state: configuration, metrics, pattern
/// memory, the bio worker and the status cell. Jobs are fully serialised;
/// an external pool client calls `mine_header` per job and may cancel
/// through the handle from `cancel_handle`.
pub struct MiningEngine {
    config: EngineConfig,
    metrics: Arc<Metrics>,
    memory: Arc<RwLock<PatternMemory>>,
    bio: BioWorker,
    status: Arc<StatusCell>,
    cancel: Arc<AtomicBool>,
    next_job_id: u64,
}

impl MiningEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let memory = Arc::new(RwLock::new(PatternMemory::new(PATTERN_MEMORY_CAPACITY)));
        let bio = BioWorker::spawn(&config.bio, config.model_path.as_ref(), memory.clone())?;

        let engine = Self {
            config,
            metrics: Arc::new(Metrics::new()),
            memory,
            bio,
            status: Arc::new(StatusCell::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            next_job_id: 1,
        };

        // Bring the backend up eagerly; a failure here degrades per job
        // instead of killing the engine
        if let Err(err) = engine.bio.initialise() {
            log::warn!("bio backend not ready at start: {}", err);
            engine.status.set_error(ErrorKind::from_bio(&err));
            engine.metrics.record_error();
        }

        Ok(engine)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Override the per-job wall-clock budget.
    pub fn set_max_duration_ms(&mut self, ms: Option<u64>) {
        self.config.mining.max_duration_ms = ms;
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            stage: self.status.stage(),
            last_error: self.status.last_error(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn diagnostic(&self) -> String {
        self.bio
            .diagnostic()
            .unwrap_or_else(|err| format!("bio worker unavailable: {}", err))
    }

    /// Run one full job for a header: stimulate, seed, generate starting
    /// points, mine, reinforce. Bio failures degrade to uniform starting
    /// points from a header-derived seed; only header/target problems fail
    /// the job.
    pub fn mine_header(&mut self, header: BlockHeader) -> Result<JobReport, MiningError> {
        let target = Target::from_bits(header.bits).map_err(MiningError::InvalidTarget)?;

        let job_id = self.next_job_id;
        self.next_job_id += 1;
        self.metrics.record_job();
        self.cancel.store(false, Ordering::Relaxed);
        self.status.clear_error();

        self.status.set_stage(EngineStage::Stimulating);
        let features = HeaderFeatures::extract(&header, target.difficulty());
        let pattern = StimulusPattern::build(&features, self.config.bio.stim_v_max);
        let bio_result = self.capture_response(&pattern);

        self.status.set_stage(EngineStage::Seeding);
        let count = self.config.mining.starting_points as usize;
        let window = self.config.mining.window_size;

        let (mut starting_points, seed) = match bio_result {
            Ok(response) => {
                let mut seed = synthesise(&response, &features);
                seed.confidence = (seed.confidence * self.config.mining.bio_weight).clamp(0.0, 1.0);
                let points = self.pick_starting_points(&seed, count, window);
                (points, Some(seed))
            }
            Err(err) => {
                log::warn!("bio pipeline failed ({}); degrading to uniform starting points", err);
                self.status.set_error(ErrorKind::from_bio(&err));
                self.metrics.record_error();
                (
                    StartingPoints::uniform(header_fallback_seed(&header), count, window),
                    None,
                )
            }
        };

        // A confident neural prediction joins the search as one more
        // starting point, scanned first
        if seed.is_some() {
            if let Ok(Some((nonce, confidence))) = self.bio.predict(&pattern) {
                if confidence >= PREDICTION_CONFIDENCE_FLOOR {
                    log::debug!(
                        "job {}: neural prediction {} (confidence {:.2})",
                        job_id,
                        nonce,
                        confidence
                    );
                    starting_points.points.insert(0, nonce);
                }
            }
        }

        self.status.set_stage(EngineStage::Mining);
        let strategy = starting_points.strategy;
        let job = MiningJob::new(job_id, header, target, starting_points);
        let max_duration = self.config.mining.max_duration_ms.map(Duration::from_millis);
        let outcome = mine(
            &job,
            self.config.worker_threads(),
            max_duration,
            &self.cancel,
            &self.metrics,
        )?;

        self.status.set_stage(EngineStage::Reinforcing);
        self.feed_back(&features, &pattern, &seed, &outcome);
        self.persist_model();
        self.status.set_stage(EngineStage::Idle);

        Ok(JobReport {
            job_id,
            outcome,
            strategy,
            bio_confidence: seed.map(|s| s.confidence),
        })
    }

    /// Initial supervised training (CLI `train`). Saves the model
    /// afterwards when a model path is configured.
    pub fn train(&self, examples: Vec<TrainingExample>) -> Result<TrainingReport, BioError> {
        self.bio.initialise()?;
        let report = self.bio.train(examples)?;
        self.persist_model();
        Ok(report)
    }

    /// Re-run backend bring-up (including impedance calibration for real
    /// hardware) and report the diagnostic line.
    pub fn calibrate(&self) -> Result<String, BioError> {
        self.bio.reset()?;
        self.bio.diagnostic()
    }

    fn pick_starting_points(&self, seed: &EntropySeed, count: usize, window: u32) -> StartingPoints {
        match self.config.mining.strategy_override {
            StrategyOverride::Auto => StartingPoints::generate(seed, count, window),
            StrategyOverride::Uniform => StartingPoints::uniform(seed.primary, count, window),
            StrategyOverride::Fibonacci => StartingPoints::fibonacci(seed.primary, count, window),
            StrategyOverride::BioGuided => StartingPoints::bio_guided(seed, count, window),
        }
    }

    /// Stimulate with the configured retry budget, re-initialising the
    /// backend between retryable failures.
    fn capture_response(&self, pattern: &StimulusPattern) -> Result<BioResponse, BioError> {
        let wait_ms = self.config.mining.stimulate_wait_ms;
        let retries = self.config.bio.max_retries;
        let mut last_err = BioError::NotReady;

        for attempt in 0..=retries {
            // Idempotent when already up; re-establishes a lost session
            if let Err(init_err) = self.bio.initialise() {
                log::warn!(
                    "bio init attempt {}/{} failed: {}",
                    attempt + 1,
                    retries + 1,
                    init_err
                );
                last_err = init_err;
                continue;
            }

            let started = Instant::now();
            match self.bio.stimulate(pattern, wait_ms) {
                Ok(response) => {
                    self.metrics.record_bio_prediction();
                    self.metrics.add_bio_response_time(started.elapsed().as_micros() as u64);
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < retries => {
                    log::warn!(
                        "bio stimulate attempt {}/{} failed: {}",
                        attempt + 1,
                        retries + 1,
                        err
                    );
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    fn feed_back(
        &self,
        features: &HeaderFeatures,
        pattern: &StimulusPattern,
        seed: &Option<EntropySeed>,
        outcome: &MiningOutcome,
    ) {
        match outcome {
            MiningOutcome::Found { nonce, .. } => {
                self.metrics.record_share();
                let Some(seed) = seed else { return };
                self.metrics.record_bio_success();

                self.remember(features, &seed.response, *nonce, 1.0);
                if let Err(err) = self.bio.reinforce(pattern, *nonce, 1.0) {
                    log::warn!("reinforcement failed: {}", err);
                }
                match self.bio.retro_learn(features.to_vector().to_vec()) {
                    Ok(Some(report)) => {
                        log::debug!(
                            "retro pass: {} epochs, accuracy {:.3}",
                            report.epochs,
                            report.accuracy
                        );
                    }
                    Ok(None) => {}
                    Err(err) => log::warn!("retro-learning failed: {}", err),
                }
            }
            MiningOutcome::Exhausted => {
                if !self.config.mining.negative_reinforcement {
                    return;
                }
                let Some(seed) = seed else { return };
                self.remember(features, &seed.response, 0, 0.0);
                if let Err(err) = self.bio.reinforce(pattern, 0, NEGATIVE_REWARD) {
                    log::warn!("negative reinforcement failed: {}", err);
                }
            }
            MiningOutcome::Cancelled => {}
        }
    }

    fn remember(&self, features: &HeaderFeatures, response: &BioResponse, nonce: u32, score: f64) {
        let record = PatternRecord {
            features: features.to_vector().to_vec(),
            response: response.samples.clone(),
            nonce,
            success_score: score,
            timestamp_us: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0),
        };
        if let Ok(mut memory) = self.memory.write() {
            memory.record(record);
        }
    }

    fn persist_model(&self) {
        if self.config.bio.mode != BioMode::Simulated {
            return;
        }
        let Some(path) = &self.config.model_path else { return };
        if let Err(err) = self.bio.save_model(path.clone()) {
            // Persistence problems never stop the engine
            log::warn!("could not persist model to {}: {}", path.display(), err);
        }
    }
}

/// Deterministic fallback seed when the bio pipeline is unavailable:
/// the first eight bytes of the header's own hash.
fn header_fallback_seed(header: &BlockHeader) -> u64 {
    let digest = hash256(&header.serialize());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BioConfig, MiningConfig, SimulatedConfig, TransportKind};
    use crate::core::Hash256;

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    fn simulated_config() -> EngineConfig {
        EngineConfig {
            bio: BioConfig {
                simulated: SimulatedConfig {
                    layers: vec![60, 16, 32],
                    ..SimulatedConfig::default()
                },
                ..BioConfig::default()
            },
            mining: MiningConfig {
                threads: 2,
                starting_points: 16,
                window_size: 1 << 12,
                max_duration_ms: Some(500),
                ..MiningConfig::default()
            },
            model_path: None,
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = simulated_config();
        config.bio.electrode_count = 10;
        assert!(matches!(
            MiningEngine::new(config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_bits_fail_the_job() {
        let mut engine = MiningEngine::new(simulated_config()).unwrap();
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 0, 0x00800000, 0);
        assert!(matches!(
            engine.mine_header(header),
            Err(MiningError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_easy_target_mines_end_to_end() {
        let mut engine = MiningEngine::new(simulated_config()).unwrap();
        // Trivial difficulty: essentially every nonce qualifies
        let header = BlockHeader::from_hex(GENESIS_HEX)
            .unwrap()
            .with_nonce(0);
        let mut easy = header;
        easy.bits = 0x207fffff;

        let report = engine.mine_header(easy).unwrap();
        match report.outcome {
            MiningOutcome::Found { digest, .. } => {
                let target = Target::from_bits(0x207fffff).unwrap();
                assert!(target.meets(&digest));
            }
            other => panic!("expected Found, got {:?}", other),
        }
        assert!(report.bio_confidence.is_some());

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.jobs, 1);
        assert_eq!(snapshot.shares_found, 1);
        assert!(snapshot.total_hashes > 0);
        assert_eq!(engine.status().stage, EngineStage::Idle);
    }

    #[test]
    fn test_impossible_target_exhausts() {
        let mut engine = MiningEngine::new(simulated_config()).unwrap();
        let mut header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        header.bits = 0x01010000; // target of one

        let report = engine.mine_header(header).unwrap();
        assert_eq!(report.outcome, MiningOutcome::Exhausted);
    }

    #[test]
    fn test_dead_mea_degrades_to_uniform_and_completes() {
        let mut config = simulated_config();
        config.bio.mode = BioMode::RealMea;
        config.bio.transport = TransportKind::File;
        config.bio.device_path = "/nonexistent/mea-device.bin".into();
        config.bio.max_retries = 1;
        config.mining.max_duration_ms = Some(200);

        let mut engine = MiningEngine::new(config).unwrap();
        let mut header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        header.bits = 0x01010000;

        let report = engine.mine_header(header).unwrap();
        assert_eq!(report.outcome, MiningOutcome::Exhausted);
        assert_eq!(report.strategy, Strategy::Uniform);
        assert_eq!(report.bio_confidence, None);

        let status = engine.status();
        assert_eq!(status.last_error, Some(ErrorKind::BioDisconnected));
        assert!(status.metrics.errors > 0);
    }

    #[test]
    fn test_cancellation_round_trip() {
        let mut engine = MiningEngine::new(simulated_config()).unwrap();
        let cancel = engine.cancel_handle();
        let mut header = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        header.bits = 0x01010000;

        // Big windows, no deadline; only the cancel can end this job
        let mut config_override = engine.config.mining.clone();
        config_override.max_duration_ms = None;
        config_override.window_size = u32::MAX;
        engine.config.mining = config_override;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                cancel.store(true, Ordering::Relaxed);
            });
            let report = engine.mine_header(header).unwrap();
            assert_eq!(report.outcome, MiningOutcome::Cancelled);
        });
    }

    #[test]
    fn test_training_round_trip() {
        let engine = MiningEngine::new(simulated_config()).unwrap();
        let examples = vec![TrainingExample {
            features: vec![0.5; 60],
            nonce: 0xabc,
        }];
        let report = engine.train(examples).unwrap();
        assert!(report.epochs >= 1);
    }

    #[test]
    fn test_fallback_seed_is_header_derived() {
        let a = BlockHeader::from_hex(GENESIS_HEX).unwrap();
        let mut b = a;
        b.timestamp += 1;
        assert_eq!(header_fallback_seed(&a), header_fallback_seed(&a));
        assert_ne!(header_fallback_seed(&a), header_fallback_seed(&b));
    }
}
