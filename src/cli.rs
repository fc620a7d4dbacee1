// CLI commands

use crate::bio::simulated::TrainingExample;
use crate::config::EngineConfig;
use crate::core::BlockHeader;
use crate::engine::{EngineError, MiningEngine};
use crate::mining::{MiningError, MiningOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit codes promised to callers.
pub const EXIT_OK: i32 = 0;
pub const EXIT_EXHAUSTED: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_BIO: i32 = 3;
pub const EXIT_IO: i32 = 4;

#[derive(Parser)]
#[command(name = "biominer")]
#[command(about = "Bio-entropy guided Bitcoin proof-of-work engine", long_about = None)]
pub struct Cli {
    /// Path to a JSON engine configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mine one job for an 80-byte header
    Mine {
        /// Header as 160 hex characters
        header_hex: String,
        /// Compact difficulty bits (0x-prefixed hex or decimal); defaults
        /// to the header's own bits field
        bits: Option<String>,
        /// Wall-clock budget in milliseconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Train the simulated backend from a JSON examples file
    Train {
        /// JSON array of { features: [f64; 60], nonce: u32 }
        examples_file: PathBuf,
    },

    /// Re-run device bring-up and impedance calibration
    Calibrate,

    /// Print engine status and bio diagnostics
    Status,
}

/// CLI handler owning the engine.
pub struct CliHandler {
    engine: MiningEngine,
}

impl CliHandler {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            engine: MiningEngine::new(config)?,
        })
    }

    /// Run a command and return the process exit code.
    pub fn handle(&mut self, command: Commands) -> i32 {
        match command {
            Commands::Mine {
                header_hex,
                bits,
                duration,
            } => self.mine(&header_hex, bits.as_deref(), duration),
            Commands::Train { examples_file } => self.train(&examples_file),
            Commands::Calibrate => self.calibrate(),
            Commands::Status => self.status(),
        }
    }

    fn mine(&mut self, header_hex: &str, bits: Option<&str>, duration: Option<u64>) -> i32 {
        let mut header = match BlockHeader::from_hex(header_hex) {
            Ok(header) => header,
            Err(err) => {
                eprintln!("Error: {}", err);
                return EXIT_CONFIG;
            }
        };

        if let Some(bits) = bits {
            header.bits = match parse_bits(bits) {
                Ok(bits) => bits,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    return EXIT_CONFIG;
                }
            };
        }

        if duration.is_some() {
            self.engine.set_max_duration_ms(duration);
        }

        println!("Mining header {} with bits {:#010x}...", header.hash(), header.bits);
        match self.engine.mine_header(header) {
            Ok(report) => {
                println!(
                    "Job {} used {} starting points{}",
                    report.job_id,
                    report.strategy,
                    report
                        .bio_confidence
                        .map(|c| format!(" (bio confidence {:.2})", c))
                        .unwrap_or_default()
                );
                match report.outcome {
                    MiningOutcome::Found { nonce, digest } => {
                        println!("Found nonce {}", nonce);
                        println!("  Hash: {}", digest);
                        EXIT_OK
                    }
                    MiningOutcome::Exhausted => {
                        println!("Exhausted the search without a valid nonce");
                        EXIT_EXHAUSTED
                    }
                    MiningOutcome::Cancelled => {
                        println!("Cancelled");
                        EXIT_EXHAUSTED
                    }
                }
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                match err {
                    MiningError::InvalidHeader(_) | MiningError::InvalidTarget(_) => EXIT_CONFIG,
                    MiningError::Bio(_) | MiningError::Internal(_) => EXIT_BIO,
                }
            }
        }
    }

    fn train(&mut self, examples_file: &std::path::Path) -> i32 {
        let text = match std::fs::read_to_string(examples_file) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("Error: cannot read {}: {}", examples_file.display(), err);
                return EXIT_IO;
            }
        };
        let examples: Vec<TrainingExample> = match serde_json::from_str(&text) {
            Ok(examples) => examples,
            Err(err) => {
                eprintln!("Error: cannot parse {}: {}", examples_file.display(), err);
                return EXIT_IO;
            }
        };

        println!("Training on {} examples...", examples.len());
        match self.engine.train(examples) {
            Ok(report) => {
                println!(
                    "Training finished: {} epochs, bit accuracy {:.1}%",
                    report.epochs,
                    report.accuracy * 100.0
                );
                EXIT_OK
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                EXIT_BIO
            }
        }
    }

    fn calibrate(&mut self) -> i32 {
        println!("Calibrating bio backend...");
        match self.engine.calibrate() {
            Ok(diagnostic) => {
                println!("{}", diagnostic);
                EXIT_OK
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                EXIT_BIO
            }
        }
    }

    fn status(&self) -> i32 {
        println!("{}", self.engine.status());
        println!("{}", self.engine.diagnostic());
        EXIT_OK
    }
}

/// Accept compact bits as 0x-prefixed hex or plain decimal.
fn parse_bits(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid bits {}: {}", raw, e))
    } else {
        raw.parse::<u32>().map_err(|e| format!("invalid bits {}: {}", raw, e))
    }
}
