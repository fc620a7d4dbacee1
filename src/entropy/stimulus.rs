// Stimulus pattern construction

use crate::entropy::HeaderFeatures;

/// Number of electrodes on the array. Matches the feature dimension.
pub const ELECTRODE_COUNT: usize = 60;

/// Default stimulation duration in milliseconds.
const DEFAULT_DURATION_MS: f64 = 100.0;

/// One electrode's drive: amplitude in volts, frequency in hertz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Electrode {
    pub amplitude: f64,
    pub frequency_hz: f64,
}

/// Per-electrode stimulation pattern derived from header features.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusPattern {
    /// Exactly `ELECTRODE_COUNT` entries
    pub electrodes: Vec<Electrode>,
    /// Stimulation duration in milliseconds
    pub duration_ms: f64,
    /// Sum of squared amplitudes
    pub total_energy: f64,
}

impl StimulusPattern {
    /// Map the 60 features onto electrodes in six contiguous blocks of 10.
    /// Deterministic and pure; amplitudes are `value * v_max` clamped to
    /// `[0, v_max]`, never NaN or infinite.
    pub fn build(features: &HeaderFeatures, v_max: f64) -> Self {
        let mut electrodes = Vec::with_capacity(ELECTRODE_COUNT);

        for i in 0..ELECTRODE_COUNT {
            let (value, frequency_hz) = match i {
                // Difficulty and timestamp, interleaved
                0..=9 => {
                    let value = if i % 2 == 0 {
                        features.difficulty_log / 10.0
                    } else {
                        features.timestamp_norm
                    };
                    (value, 50.0 + 100.0 * value)
                }
                // Previous-hash bytes 0..10
                10..=19 => {
                    let b = features.prev_bytes[i - 10];
                    (b, 100.0 + 50.0 * b)
                }
                // Merkle bytes 0..10
                20..=29 => {
                    let b = features.merkle_bytes[i - 20];
                    (b, 75.0 + 75.0 * b)
                }
                // Hash entropies, interleaved
                30..=39 => {
                    let value = if i % 2 == 0 {
                        features.prev_entropy
                    } else {
                        features.merkle_entropy
                    };
                    (value, 60.0 + 90.0 * value)
                }
                // Previous-hash bytes 10..20
                40..=49 => {
                    let b = features.prev_bytes[i - 30];
                    (b, 80.0 + 70.0 * b)
                }
                // Merkle bytes 10..20
                _ => {
                    let b = features.merkle_bytes[i - 40];
                    (b, 90.0 + 60.0 * b)
                }
            };

            let amplitude = if value.is_finite() {
                (value * v_max).clamp(0.0, v_max)
            } else {
                0.0
            };
            let frequency_hz = if frequency_hz.is_finite() { frequency_hz } else { 0.0 };

            electrodes.push(Electrode {
                amplitude,
                frequency_hz,
            });
        }

        let total_energy = electrodes.iter().map(|e| e.amplitude * e.amplitude).sum();

        Self {
            electrodes,
            duration_ms: DEFAULT_DURATION_MS,
            total_energy,
        }
    }

    /// Amplitudes alone, in electrode order. This is the input vector the
    /// bio backends consume.
    pub fn amplitudes(&self) -> Vec<f64> {
        self.electrodes.iter().map(|e| e.amplitude).collect()
    }
}
