// Spike-timing-dependent plasticity

use crate::bio::SpikeEvent;
use crate::entropy::ELECTRODE_COUNT;

/// Pairs further apart than this never interact (microseconds).
pub const STDP_WINDOW_US: u64 = 20_000;

/// Weights are clamped to this magnitude.
const WEIGHT_CLIP: f64 = 5.0;

/// Synaptic-weight table between electrode pairs, updated by spike-timing
/// coincidence: `w[pre][post] += eta * reward * exp(-|dt|/tau) * sign(dt)`.
/// Pre-before-post strengthens, post-before-pre weakens.
#[derive(Debug, Clone)]
pub struct StdpTable {
    weights: Vec<f64>,
    eta: f64,
    tau_us: f64,
}

impl StdpTable {
    pub fn new(eta: f64, tau_us: f64) -> Self {
        Self {
            weights: vec![0.0; ELECTRODE_COUNT * ELECTRODE_COUNT],
            eta,
            tau_us,
        }
    }

    pub fn weight(&self, pre: usize, post: usize) -> f64 {
        self.weights[pre * ELECTRODE_COUNT + post]
    }

    /// Apply one reinforcement round over a set of spikes. Every ordered
    /// pair of spikes on distinct electrodes within the pairing window
    /// contributes.
    pub fn apply(&mut self, spikes: &[SpikeEvent], reward: f64) -> usize {
        let mut updates = 0;

        for pre in spikes {
            for post in spikes {
                if pre.electrode_id == post.electrode_id {
                    continue;
                }
                let dt = post.timestamp_us as i64 - pre.timestamp_us as i64;
                if dt.unsigned_abs() > STDP_WINDOW_US {
                    continue;
                }

                let decay = (-(dt.abs() as f64) / self.tau_us).exp();
                let delta = self.eta * reward * decay * dt.signum() as f64;
                let idx = pre.electrode_id * ELECTRODE_COUNT + post.electrode_id;
                self.weights[idx] = (self.weights[idx] + delta).clamp(-WEIGHT_CLIP, WEIGHT_CLIP);
                updates += 1;
            }
        }

        updates
    }

    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike(electrode_id: usize, timestamp_us: u64) -> SpikeEvent {
        SpikeEvent {
            electrode_id,
            amplitude_uv: -80.0,
            timestamp_us,
            waveform: None,
        }
    }

    #[test]
    fn test_causal_pair_strengthens() {
        let mut table = StdpTable::new(0.1, 5000.0);
        let spikes = vec![spike(1, 1000), spike(2, 3000)];
        let updates = table.apply(&spikes, 1.0);

        assert_eq!(updates, 2); // both orderings visited
        assert!(table.weight(1, 2) > 0.0); // pre before post
        assert!(table.weight(2, 1) < 0.0); // post before pre
    }

    #[test]
    fn test_negative_reward_inverts() {
        let mut table = StdpTable::new(0.1, 5000.0);
        table.apply(&[spike(1, 1000), spike(2, 3000)], -1.0);
        assert!(table.weight(1, 2) < 0.0);
    }

    #[test]
    fn test_distant_pairs_ignored() {
        let mut table = StdpTable::new(0.1, 5000.0);
        let updates = table.apply(&[spike(1, 0), spike(2, STDP_WINDOW_US + 1)], 1.0);
        assert_eq!(updates, 0);
        assert_eq!(table.weight(1, 2), 0.0);
    }

    #[test]
    fn test_same_electrode_ignored() {
        let mut table = StdpTable::new(0.1, 5000.0);
        assert_eq!(table.apply(&[spike(1, 0), spike(1, 100)], 1.0), 0);
    }

    #[test]
    fn test_closer_pairs_change_more() {
        let mut near = StdpTable::new(0.1, 5000.0);
        near.apply(&[spike(1, 0), spike(2, 1000)], 1.0);
        let mut far = StdpTable::new(0.1, 5000.0);
        far.apply(&[spike(1, 0), spike(2, 15_000)], 1.0);
        assert!(near.weight(1, 2) > far.weight(1, 2));
    }

    #[test]
    fn test_weights_clamped_and_reset() {
        let mut table = StdpTable::new(10.0, 5000.0);
        for _ in 0..100 {
            table.apply(&[spike(1, 0), spike(2, 100)], 1.0);
        }
        assert!(table.weight(1, 2) <= WEIGHT_CLIP);

        table.reset();
        assert_eq!(table.weight(1, 2), 0.0);
    }
}
