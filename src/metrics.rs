// Engine metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lock-free counters observed by every stage. Hot-path updates are plain
/// fetch-adds; derived values are computed at snapshot time.
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    total_hashes: AtomicU64,
    shares_found: AtomicU64,
    bio_predictions: AtomicU64,
    bio_successes: AtomicU64,
    bio_response_time_us: AtomicU64,
    jobs: AtomicU64,
    errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_hashes: AtomicU64::new(0),
            shares_found: AtomicU64::new(0),
            bio_predictions: AtomicU64::new(0),
            bio_successes: AtomicU64::new(0),
            bio_response_time_us: AtomicU64::new(0),
            jobs: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn add_hashes(&self, n: u64) {
        self.total_hashes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_share(&self) {
        self.shares_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bio_prediction(&self) {
        self.bio_predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bio_success(&self) {
        self.bio_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bio_response_time(&self, us: u64) {
        self.bio_response_time_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn record_job(&self) {
        self.jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_hashes = self.total_hashes.load(Ordering::Relaxed);
        let bio_predictions = self.bio_predictions.load(Ordering::Relaxed);
        let bio_successes = self.bio_successes.load(Ordering::Relaxed);
        let bio_response_time_us = self.bio_response_time_us.load(Ordering::Relaxed);
        let elapsed_secs = self.started.elapsed().as_secs_f64();

        MetricsSnapshot {
            total_hashes,
            shares_found: self.shares_found.load(Ordering::Relaxed),
            bio_predictions,
            bio_successes,
            bio_response_time_us,
            jobs: self.jobs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed_secs,
            hashrate: if elapsed_secs > 0.0 {
                total_hashes as f64 / elapsed_secs
            } else {
                0.0
            },
            bio_accuracy: if bio_predictions > 0 {
                bio_successes as f64 / bio_predictions as f64
            } else {
                0.0
            },
            avg_bio_response_us: if bio_predictions > 0 {
                bio_response_time_us as f64 / bio_predictions as f64
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time copy of the counters plus derived rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub total_hashes: u64,
    pub shares_found: u64,
    pub bio_predictions: u64,
    pub bio_successes: u64,
    pub bio_response_time_us: u64,
    pub jobs: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
    pub hashrate: f64,
    pub bio_accuracy: f64,
    pub avg_bio_response_us: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "  Hashes:           {} ({:.1} kH/s)", self.total_hashes, self.hashrate / 1000.0)?;
        writeln!(f, "  Shares found:     {}", self.shares_found)?;
        writeln!(
            f,
            "  Bio predictions:  {} ({} hits, {:.1}% accuracy)",
            self.bio_predictions,
            self.bio_successes,
            self.bio_accuracy * 100.0
        )?;
        writeln!(f, "  Bio response:     {:.0} us average", self.avg_bio_response_us)?;
        writeln!(f, "  Jobs:             {}", self.jobs)?;
        write!(f, "  Errors:           {}", self.errors)
    }
}
