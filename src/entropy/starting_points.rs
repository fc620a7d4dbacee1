// Nonce starting-point generation

use crate::entropy::EntropySeed;
use sha2::{Digest, Sha256};

/// Default number of starting points per job.
pub const DEFAULT_STARTING_POINTS: usize = 1000;
/// Default number of nonces scanned from each starting point (2^22).
pub const DEFAULT_WINDOW: u32 = 1 << 22;

const NONCE_SPACE: u64 = 1 << 32;

/// Confidence above this uses the response peaks directly.
const BIO_GUIDED_THRESHOLD: f64 = 0.7;
/// Confidence above this (but below bio-guided) uses low-discrepancy points.
const FIBONACCI_THRESHOLD: f64 = 0.4;

/// Peaks below this absolute amplitude are ignored.
const PEAK_FLOOR: f64 = 0.1;

/// How the starting points were generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Uniform,
    Fibonacci,
    BioGuided,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strategy::Uniform => write!(f, "uniform"),
            Strategy::Fibonacci => write!(f, "fibonacci"),
            Strategy::BioGuided => write!(f, "bio-guided"),
        }
    }
}

/// Ordered nonce starting positions plus the scan window applied to each.
#[derive(Debug, Clone, PartialEq)]
pub struct StartingPoints {
    pub points: Vec<u32>,
    pub window: u32,
    /// `min(1, count * window / 2^32)`
    pub expected_coverage: f64,
    pub strategy: Strategy,
}

impl StartingPoints {
    /// Generate starting points from an entropy seed. The strategy follows
    /// the seed's confidence: bio-guided above 0.7, Fibonacci above 0.4,
    /// uniform otherwise. A bio-guided request without usable peaks falls
    /// back to Fibonacci.
    pub fn generate(seed: &EntropySeed, count: usize, window: u32) -> Self {
        match select_strategy(seed.confidence) {
            Strategy::Uniform => Self::uniform(seed.primary, count, window),
            Strategy::Fibonacci => Self::fibonacci(seed.primary, count, window),
            Strategy::BioGuided => Self::bio_guided(seed, count, window),
        }
    }

    /// Scatter points around the response's peaks; Fibonacci when the
    /// response has no usable peaks.
    pub fn bio_guided(seed: &EntropySeed, count: usize, window: u32) -> Self {
        let peaks = response_peaks(&seed.response.samples);
        if peaks.is_empty() {
            Self::fibonacci(seed.primary, count, window)
        } else {
            Self {
                points: bio_guided_points(seed.primary, &peaks, count),
                window,
                expected_coverage: coverage(count, window),
                strategy: Strategy::BioGuided,
            }
        }
    }

    /// Evenly strided points offset by the seed. Consecutive points differ
    /// by exactly `2^32 / count` modulo 2^32.
    pub fn uniform(primary: u64, count: usize, window: u32) -> Self {
        let mut points = Vec::with_capacity(count);
        if count > 0 {
            let step = NONCE_SPACE / count as u64;
            let offset = if step > 0 { primary % step } else { 0 };
            for i in 0..count as u64 {
                points.push(((offset + i * step) % NONCE_SPACE) as u32);
            }
        }
        Self {
            points,
            window,
            expected_coverage: coverage(count, window),
            strategy: Strategy::Uniform,
        }
    }

    /// Golden-ratio low-discrepancy sequence offset by the seed.
    pub fn fibonacci(primary: u64, count: usize, window: u32) -> Self {
        let phi = (1.0 + 5f64.sqrt()) / 2.0;
        let offset = (primary % NONCE_SPACE) as f64 / NONCE_SPACE as f64;
        let points = (0..count)
            .map(|i| {
                let p = (offset + i as f64 / phi).fract();
                (p * NONCE_SPACE as f64) as u64 as u32
            })
            .collect();
        Self {
            points,
            window,
            expected_coverage: coverage(count, window),
            strategy: Strategy::Fibonacci,
        }
    }
}

/// Map a seed confidence to a generation strategy.
pub fn select_strategy(confidence: f64) -> Strategy {
    if confidence > BIO_GUIDED_THRESHOLD {
        Strategy::BioGuided
    } else if confidence > FIBONACCI_THRESHOLD {
        Strategy::Fibonacci
    } else {
        Strategy::Uniform
    }
}

#[derive(Debug, Clone, Copy)]
struct Peak {
    index: usize,
    magnitude: f64,
}

/// Local maxima of the absolute response above the peak floor.
fn response_peaks(samples: &[f64]) -> Vec<Peak> {
    let mut peaks = Vec::new();
    for (i, v) in samples.iter().enumerate() {
        let magnitude = v.abs();
        if magnitude <= PEAK_FLOOR || !magnitude.is_finite() {
            continue;
        }
        let left_ok = i == 0 || magnitude >= samples[i - 1].abs();
        let right_ok = i + 1 == samples.len() || magnitude >= samples[i + 1].abs();
        if left_ok && right_ok {
            peaks.push(Peak { index: i, magnitude });
        }
    }
    peaks
}

/// Spread `count` points across the peaks, proportionally to magnitude.
/// Each peak becomes a centre `(index/60) * 2^32` with half-width
/// `magnitude * 2^28`; points scatter inside the window deterministically.
fn bio_guided_points(primary: u64, peaks: &[Peak], count: usize) -> Vec<u32> {
    let total_magnitude: f64 = peaks.iter().map(|p| p.magnitude).sum();
    let mut points = Vec::with_capacity(count);

    for (peak_idx, peak) in peaks.iter().enumerate() {
        let share = if peak_idx + 1 == peaks.len() {
            count - points.len()
        } else {
            ((count as f64 * peak.magnitude / total_magnitude).round() as usize)
                .min(count - points.len())
        };

        let centre = peak.index as u64 * NONCE_SPACE / 60;
        let half_width = ((peak.magnitude * (1u64 << 28) as f64) as u64).max(1);

        for j in 0..share {
            let scatter = point_hash(primary, peak_idx as u32, j as u32) % half_width;
            let point =
                (centre as i64 + scatter as i64 - (half_width / 2) as i64).rem_euclid(NONCE_SPACE as i64);
            points.push(point as u32);
        }
        if points.len() >= count {
            break;
        }
    }

    points
}

/// Deterministic scatter hash for one bio-guided point.
fn point_hash(primary: u64, peak_idx: u32, j: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(primary.to_le_bytes());
    hasher.update(peak_idx.to_le_bytes());
    hasher.update(j.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn coverage(count: usize, window: u32) -> f64 {
    (count as f64 * window as f64 / NONCE_SPACE as f64).min(1.0)
}
