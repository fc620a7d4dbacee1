// Dedicated bio-compute worker thread

use crate::bio::mea::MeaBackend;
use crate::bio::simulated::{SimulatedBackend, TrainingExample, TrainingReport};
use crate::bio::{BioCompute, BioError, BioResponse, PatternMemory};
use crate::config::{BioConfig, BioMode};
use crate::entropy::StimulusPattern;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// How many remembered outcomes one retro pass may consume.
const RETRO_BATCH: usize = 20;

/// The two concrete backends behind the worker.
enum Backend {
    Simulated(SimulatedBackend),
    Mea(Box<MeaBackend>),
}

impl Backend {
    fn as_bio(&mut self) -> &mut dyn BioCompute {
        match self {
            Backend::Simulated(backend) => backend,
            Backend::Mea(backend) => backend.as_mut(),
        }
    }
}

enum BioRequest {
    Initialise {
        reply: Sender<Result<(), BioError>>,
    },
    Stimulate {
        pattern: StimulusPattern,
        wait_ms: u64,
        reply: Sender<Result<BioResponse, BioError>>,
    },
    Reinforce {
        pattern: StimulusPattern,
        nonce: u32,
        reward: f64,
        reply: Sender<Result<(), BioError>>,
    },
    /// Simulated backends answer with a nonce guess; MEA backends with None
    Predict {
        pattern: StimulusPattern,
        reply: Sender<Option<(u32, f64)>>,
    },
    Train {
        examples: Vec<TrainingExample>,
        reply: Sender<Result<TrainingReport, BioError>>,
    },
    RetroLearn {
        /// Feature vector of the job that just finished; similar memories
        /// are replayed first
        features: Vec<f64>,
        reply: Sender<Option<TrainingReport>>,
    },
    Reset {
        reply: Sender<Result<(), BioError>>,
    },
    Diagnostic {
        reply: Sender<String>,
    },
    SaveModel {
        path: PathBuf,
        reply: Sender<Result<(), String>>,
    },
    Shutdown,
}

/// Handle to the bio worker. The backend lives on its own thread and is
/// reached only through this mailbox, so its state is never touched from
/// a mining worker.
pub struct BioWorker {
    sender: Sender<BioRequest>,
    handle: Option<JoinHandle<()>>,
}

impl BioWorker {
    /// Build the configured backend and spawn its thread. For a simulated
    /// backend with a model file present, the model is loaded first; a
    /// topology mismatch is fatal here (the caller must reset or
    /// reconfigure).
    pub fn spawn(
        config: &BioConfig,
        model_path: Option<&PathBuf>,
        memory: Arc<RwLock<PatternMemory>>,
    ) -> Result<Self, BioError> {
        let backend = match config.mode {
            BioMode::Simulated => {
                let simulated = match model_path {
                    Some(path) if path.exists() => {
                        log::info!("loading simulated model from {}", path.display());
                        SimulatedBackend::load(&config.simulated, path)?
                    }
                    _ => SimulatedBackend::new(&config.simulated)?,
                };
                Backend::Simulated(simulated)
            }
            BioMode::RealMea => Backend::Mea(Box::new(MeaBackend::new(config))),
        };

        let (sender, receiver) = channel();
        let handle = std::thread::Builder::new()
            .name("bio-worker".into())
            .spawn(move || run(backend, receiver, memory))
            .map_err(|e| BioError::Internal(format!("spawn bio worker: {}", e)))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> BioRequest) -> Result<T, BioError> {
        let (reply, response) = channel();
        self.sender
            .send(build(reply))
            .map_err(|_| BioError::Internal("bio worker is gone".into()))?;
        response
            .recv()
            .map_err(|_| BioError::Internal("bio worker dropped the request".into()))
    }

    pub fn initialise(&self) -> Result<(), BioError> {
        self.call(|reply| BioRequest::Initialise { reply })?
    }

    pub fn stimulate(&self, pattern: &StimulusPattern, wait_ms: u64) -> Result<BioResponse, BioError> {
        self.call(|reply| BioRequest::Stimulate {
            pattern: pattern.clone(),
            wait_ms,
            reply,
        })?
    }

    pub fn reinforce(&self, pattern: &StimulusPattern, nonce: u32, reward: f64) -> Result<(), BioError> {
        self.call(|reply| BioRequest::Reinforce {
            pattern: pattern.clone(),
            nonce,
            reward,
            reply,
        })?
    }

    pub fn predict(&self, pattern: &StimulusPattern) -> Result<Option<(u32, f64)>, BioError> {
        self.call(|reply| BioRequest::Predict {
            pattern: pattern.clone(),
            reply,
        })
    }

    pub fn train(&self, examples: Vec<TrainingExample>) -> Result<TrainingReport, BioError> {
        self.call(|reply| BioRequest::Train { examples, reply })?
    }

    pub fn retro_learn(&self, features: Vec<f64>) -> Result<Option<TrainingReport>, BioError> {
        self.call(|reply| BioRequest::RetroLearn { features, reply })
    }

    pub fn reset(&self) -> Result<(), BioError> {
        self.call(|reply| BioRequest::Reset { reply })?
    }

    pub fn diagnostic(&self) -> Result<String, BioError> {
        self.call(|reply| BioRequest::Diagnostic { reply })
    }

    pub fn save_model(&self, path: PathBuf) -> Result<(), BioError> {
        self.call(|reply| BioRequest::SaveModel { path, reply })?
            .map_err(BioError::Internal)
    }
}

impl Drop for BioWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(BioRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(mut backend: Backend, receiver: Receiver<BioRequest>, memory: Arc<RwLock<PatternMemory>>) {
    while let Ok(request) = receiver.recv() {
        match request {
            BioRequest::Initialise { reply } => {
                let _ = reply.send(backend.as_bio().initialise());
            }
            BioRequest::Stimulate {
                pattern,
                wait_ms,
                reply,
            } => {
                let _ = reply.send(backend.as_bio().stimulate_and_capture(&pattern, wait_ms));
            }
            BioRequest::Reinforce {
                pattern,
                nonce,
                reward,
                reply,
            } => {
                let _ = reply.send(backend.as_bio().reinforce(&pattern, nonce, reward));
            }
            BioRequest::Predict { pattern, reply } => {
                let prediction = match &backend {
                    Backend::Simulated(simulated) => Some(simulated.predict_nonce(&pattern)),
                    Backend::Mea(_) => None,
                };
                let _ = reply.send(prediction);
            }
            BioRequest::Train { examples, reply } => {
                let result = match &mut backend {
                    Backend::Simulated(simulated) => Ok(simulated.train(&examples)),
                    Backend::Mea(_) => Err(BioError::Internal(
                        "training applies to the simulated backend only".into(),
                    )),
                };
                let _ = reply.send(result);
            }
            BioRequest::RetroLearn { features, reply } => {
                let report = match &mut backend {
                    Backend::Simulated(simulated) => {
                        let records: Vec<_> = match memory.read() {
                            Ok(memory) => {
                                let similar = memory.similar(&features, RETRO_BATCH);
                                if similar.is_empty() {
                                    memory.recent(RETRO_BATCH).into_iter().cloned().collect()
                                } else {
                                    similar.into_iter().cloned().collect()
                                }
                            }
                            Err(_) => Vec::new(),
                        };
                        simulated.retro_learn(&records)
                    }
                    Backend::Mea(_) => None,
                };
                let _ = reply.send(report);
            }
            BioRequest::Reset { reply } => {
                let _ = reply.send(backend.as_bio().reset());
            }
            BioRequest::Diagnostic { reply } => {
                let _ = reply.send(backend.as_bio().diagnostic());
            }
            BioRequest::SaveModel { path, reply } => {
                let result = match &backend {
                    Backend::Simulated(simulated) => simulated.save(&path),
                    Backend::Mea(_) => Err("no persistable model on the mea backend".into()),
                };
                let _ = reply.send(result);
            }
            BioRequest::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;
    use crate::core::{BlockHeader, Hash256};
    use crate::entropy::{ELECTRODE_COUNT, HeaderFeatures};

    fn worker() -> BioWorker {
        let config = BioConfig {
            simulated: SimulatedConfig {
                layers: vec![60, 16, 32],
                ..SimulatedConfig::default()
            },
            ..BioConfig::default()
        };
        let memory = Arc::new(RwLock::new(PatternMemory::new(100)));
        BioWorker::spawn(&config, None, memory).unwrap()
    }

    fn sample_pattern() -> StimulusPattern {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1231469665, 0x1d00ffff, 0);
        StimulusPattern::build(&HeaderFeatures::extract(&header, 1.0), 5.0)
    }

    #[test]
    fn test_round_trips_through_mailbox() {
        let worker = worker();
        worker.initialise().unwrap();

        let response = worker.stimulate(&sample_pattern(), 100).unwrap();
        assert_eq!(response.samples.len(), ELECTRODE_COUNT);

        worker.reinforce(&sample_pattern(), 42, 1.0).unwrap();
        assert!(worker.predict(&sample_pattern()).unwrap().is_some());
        assert!(worker.diagnostic().unwrap().contains("simulated"));
    }

    #[test]
    fn test_stimulate_before_initialise_not_ready() {
        let worker = worker();
        assert_eq!(
            worker.stimulate(&sample_pattern(), 100).unwrap_err(),
            BioError::NotReady
        );
    }

    #[test]
    fn test_model_load_rejects_bad_topology() {
        let dir = std::env::temp_dir().join("bio-mining-worker-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("worker-model.json");

        // Save with one topology
        let mut backend = SimulatedBackend::new(&SimulatedConfig {
            layers: vec![60, 16, 32],
            ..SimulatedConfig::default()
        })
        .unwrap();
        backend.initialise().unwrap();
        backend.save(&path).unwrap();

        // Spawn with another
        let config = BioConfig {
            simulated: SimulatedConfig {
                layers: vec![60, 24, 32],
                ..SimulatedConfig::default()
            },
            ..BioConfig::default()
        };
        let memory = Arc::new(RwLock::new(PatternMemory::new(100)));
        match BioWorker::spawn(&config, Some(&path), memory) {
            Err(BioError::ModelIncompatible(_)) => {}
            other => panic!("expected ModelIncompatible, got {:?}", other.err()),
        }

        std::fs::remove_file(&path).ok();
    }
}
