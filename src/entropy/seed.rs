// Entropy seed synthesis from bio responses

use crate::bio::BioResponse;
use crate::entropy::HeaderFeatures;
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Number of diversified sub-seeds derived from the primary seed.
const SUB_SEED_COUNT: usize = 16;

/// Linear-congruential constants used for sub-seed diversification.
const LCG_MULTIPLIER: u64 = 0x5DEECE66D;
const LCG_INCREMENT: u64 = 0xB;

/// High-entropy seed mixed from a bio response and header features.
#[derive(Debug, Clone, PartialEq)]
pub struct EntropySeed {
    /// Primary 64-bit seed
    pub primary: u64,
    /// Diversified 32-bit sub-seeds
    pub sub_seeds: Vec<u32>,
    /// How informative the response looks, in [0, 1]
    pub confidence: f64,
    /// Mean absolute response amplitude
    pub response_strength: f64,
    /// The raw response, kept for later reinforcement
    pub response: BioResponse,
    /// Wall-clock microseconds spent generating this seed
    pub generation_us: u64,
}

/// Mix a bio response and header features into an entropy seed.
///
/// The primary seed is SHA-256 over the little-endian f64 bits of the 60
/// response samples followed by the difficulty-log, timestamp and
/// prev-hash-entropy features; its first 8 bytes are read little-endian.
pub fn synthesise(response: &BioResponse, features: &HeaderFeatures) -> EntropySeed {
    let started = Instant::now();

    let mut hasher = Sha256::new();
    for sample in &response.samples {
        hasher.update(sample.to_le_bytes());
    }
    hasher.update(features.difficulty_log.to_le_bytes());
    hasher.update(features.timestamp_norm.to_le_bytes());
    hasher.update(features.prev_entropy.to_le_bytes());
    let digest = hasher.finalize();

    let mut primary_bytes = [0u8; 8];
    primary_bytes.copy_from_slice(&digest[..8]);
    let primary = u64::from_le_bytes(primary_bytes);

    let sub_seeds = (0..SUB_SEED_COUNT as u64)
        .map(|i| {
            let mixed = (primary ^ (i << 32))
                .wrapping_mul(LCG_MULTIPLIER)
                .wrapping_add(LCG_INCREMENT);
            ((mixed >> 16) & 0xffff_ffff) as u32
        })
        .collect();

    let strength = mean_abs(&response.samples);
    let confidence = (strength / (1.0 + variance(&response.samples))).clamp(0.0, 1.0);

    EntropySeed {
        primary,
        sub_seeds,
        confidence,
        response_strength: strength,
        response: response.clone(),
        generation_us: started.elapsed().as_micros() as u64,
    }
}

fn mean_abs(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|v| v.abs()).sum::<f64>() / samples.len() as f64
}

fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / samples.len() as f64
}
