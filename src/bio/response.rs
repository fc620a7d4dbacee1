// Captured electrode responses

use crate::entropy::ELECTRODE_COUNT;
use std::time::{SystemTime, UNIX_EPOCH};

/// A threshold-crossing event recorded on real hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeEvent {
    pub electrode_id: usize,
    pub amplitude_uv: f64,
    pub timestamp_us: u64,
    /// Waveform window around the crossing, when capture is enabled
    pub waveform: Option<Vec<f64>>,
}

/// One captured response: a voltage per electrode plus derived quality
/// measures. Spikes are populated by the real-MEA backend only.
#[derive(Debug, Clone, PartialEq)]
pub struct BioResponse {
    /// Exactly `ELECTRODE_COUNT` voltages
    pub samples: Vec<f64>,
    /// Mean absolute amplitude
    pub response_strength: f64,
    /// 1 / (1 + variance), in [0, 1]
    pub signal_quality: f64,
    /// Capture time, microseconds since the Unix epoch
    pub captured_at_us: u64,
    pub spikes: Vec<SpikeEvent>,
}

impl BioResponse {
    /// Build a response from raw samples, deriving strength and quality.
    /// Samples are padded with zeros or truncated to `ELECTRODE_COUNT`.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.resize(ELECTRODE_COUNT, 0.0);

        let strength = samples.iter().map(|v| v.abs()).sum::<f64>() / samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / samples.len() as f64;

        Self {
            samples,
            response_strength: strength,
            signal_quality: (1.0 / (1.0 + variance)).clamp(0.0, 1.0),
            captured_at_us: now_us(),
            spikes: Vec::new(),
        }
    }

    pub fn with_spikes(mut self, spikes: Vec<SpikeEvent>) -> Self {
        self.spikes = spikes;
        self
    }
}

pub(crate) fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
