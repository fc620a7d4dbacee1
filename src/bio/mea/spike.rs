// Threshold spike detection

use crate::bio::SpikeEvent;
use crate::config::BioConfig;
use crate::entropy::ELECTRODE_COUNT;
use std::collections::VecDeque;

/// Ring capacity for detected spikes.
pub const SPIKE_BUFFER_CAPACITY: usize = 1000;

/// Dead time after a detection, milliseconds.
const DEAD_TIME_MS: f64 = 1.0;
/// Waveform capture window, milliseconds.
const WAVEFORM_WINDOW_MS: f64 = 2.0;

/// Falling-edge threshold detector with per-electrode dead time.
///
/// A spike fires when a sample crosses below the threshold while the
/// previous sample was at or above it. One dead-time window follows each
/// detection so a single crossing is not counted twice.
#[derive(Debug)]
pub struct SpikeDetector {
    threshold_uv: f64,
    dead_time_samples: u32,
    window_samples: usize,
    capture_waveforms: bool,
    prev: Vec<f64>,
    dead: Vec<u32>,
    history: Vec<VecDeque<f64>>,
    buffer: VecDeque<SpikeEvent>,
}

impl SpikeDetector {
    pub fn new(config: &BioConfig) -> Self {
        let per_ms = config.sampling_rate_hz as f64 / 1000.0;
        Self {
            threshold_uv: config.spike_threshold_uv,
            dead_time_samples: (per_ms * DEAD_TIME_MS).max(1.0) as u32,
            window_samples: (per_ms * WAVEFORM_WINDOW_MS).max(1.0) as usize,
            capture_waveforms: config.capture_waveforms,
            prev: vec![0.0; ELECTRODE_COUNT],
            dead: vec![0; ELECTRODE_COUNT],
            history: vec![VecDeque::new(); ELECTRODE_COUNT],
            buffer: VecDeque::with_capacity(SPIKE_BUFFER_CAPACITY),
        }
    }

    /// Feed one frame of per-electrode samples (microvolts). Returns the
    /// number of spikes detected in this frame.
    pub fn process_frame(&mut self, samples_uv: &[f64], timestamp_us: u64) -> usize {
        let mut detected = 0;

        for (e, sample) in samples_uv.iter().take(ELECTRODE_COUNT).enumerate() {
            if self.capture_waveforms {
                let history = &mut self.history[e];
                if history.len() == self.window_samples {
                    history.pop_front();
                }
                history.push_back(*sample);
            }

            if self.dead[e] > 0 {
                self.dead[e] -= 1;
            } else if *sample < self.threshold_uv && self.prev[e] >= self.threshold_uv {
                let waveform = self
                    .capture_waveforms
                    .then(|| self.history[e].iter().copied().collect());
                self.record(SpikeEvent {
                    electrode_id: e,
                    amplitude_uv: *sample,
                    timestamp_us,
                    waveform,
                });
                self.dead[e] = self.dead_time_samples;
                detected += 1;
            }

            self.prev[e] = *sample;
        }

        detected
    }

    fn record(&mut self, spike: SpikeEvent) {
        if self.buffer.len() == SPIKE_BUFFER_CAPACITY {
            self.buffer.pop_front();
        }
        self.buffer.push_back(spike);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Newest `n` spikes, oldest of those first.
    pub fn recent(&self, n: usize) -> Vec<SpikeEvent> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.prev.iter_mut().for_each(|v| *v = 0.0);
        self.dead.iter_mut().for_each(|d| *d = 0);
        self.history.iter_mut().for_each(|h| h.clear());
    }
}
