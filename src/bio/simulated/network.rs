// Layered neuron model with Hebbian plasticity

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Output width: one neuron per nonce bit.
pub const OUTPUT_BITS: usize = 32;

/// Weights are clamped to this magnitude after every update.
const WEIGHT_CLIP: f64 = 5.0;

/// Standard deviation of the activation jitter.
const NOISE_SIGMA: f64 = 0.01;

/// Flat-array layered network. Weights for connection layer `l` live in a
/// single row-major vector indexed `src * layer_size(l+1) + dst`; there are
/// no per-neuron heap objects.
///
/// Activation jitter is drawn from a generator seeded by the stored seed
/// mixed with the input bits, so the forward pass is a pure function of
/// (state, input) and survives serialisation bit-for-bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredNetwork {
    layers: Vec<usize>,
    weights: Vec<Vec<f64>>,
    thresholds: Vec<Vec<f64>>,
    momentum_buf: Vec<Vec<f64>>,
    learning_rate: f64,
    decay_rate: f64,
    momentum: f64,
    noise_seed: u64,
}

impl LayeredNetwork {
    /// Build a network with small random weights drawn from the seed.
    pub fn new(layers: &[usize], learning_rate: f64, decay_rate: f64, momentum: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = Vec::with_capacity(layers.len() - 1);
        let mut thresholds = Vec::with_capacity(layers.len() - 1);
        let mut momentum_buf = Vec::with_capacity(layers.len() - 1);

        for pair in layers.windows(2) {
            let (src, dst) = (pair[0], pair[1]);
            weights.push((0..src * dst).map(|_| rng.gen_range(-0.5..0.5)).collect());
            thresholds.push((0..dst).map(|_| rng.gen_range(-0.1..0.1)).collect());
            momentum_buf.push(vec![0.0; src * dst]);
        }

        Self {
            layers: layers.to_vec(),
            weights,
            thresholds,
            momentum_buf,
            learning_rate,
            decay_rate,
            momentum,
            noise_seed: seed,
        }
    }

    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    /// Forward pass. Returns the activations of every layer, input first.
    /// `a_j = sigmoid(sum_i w_ij * a_i - threshold_j + noise)`.
    pub fn forward(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut first = vec![0.0; self.layers[0]];
        for (slot, v) in first.iter_mut().zip(input) {
            *slot = *v;
        }

        let noise = Normal::new(0.0, NOISE_SIGMA).expect("sigma is a positive constant");
        let mut noise_rng = StdRng::seed_from_u64(self.noise_seed ^ input_hash(input));

        let mut activations = Vec::with_capacity(self.layers.len());
        activations.push(first);

        for l in 0..self.weights.len() {
            let src_len = self.layers[l];
            let dst_len = self.layers[l + 1];
            let prev = &activations[l];
            let mut next = Vec::with_capacity(dst_len);

            for j in 0..dst_len {
                let mut z = -self.thresholds[l][j];
                for i in 0..src_len {
                    z += self.weights[l][i * dst_len + j] * prev[i];
                }
                z += noise.sample(&mut noise_rng);
                next.push(sigmoid(z));
            }
            activations.push(next);
        }

        activations
    }

    /// Output-layer activations only.
    pub fn output(&self, input: &[f64]) -> Vec<f64> {
        self.forward(input).pop().expect("network has at least one layer")
    }

    /// Hebbian update over every connection layer: co-active neurons are
    /// strengthened in proportion to the reward, smoothed by momentum and
    /// pulled back by decay.
    pub fn hebbian_update(&mut self, activations: &[Vec<f64>], reward: f64) {
        for l in 0..self.weights.len() {
            let dst_len = self.layers[l + 1];
            let pre = &activations[l];
            let post = &activations[l + 1];

            for i in 0..self.layers[l] {
                for j in 0..dst_len {
                    let idx = i * dst_len + j;
                    let delta = self.learning_rate * reward * pre[i] * post[j];
                    let m = self.momentum * self.momentum_buf[l][idx] + (1.0 - self.momentum) * delta;
                    self.momentum_buf[l][idx] = m;
                    self.weights[l][idx] =
                        ((self.weights[l][idx] + m) * self.decay_rate).clamp(-WEIGHT_CLIP, WEIGHT_CLIP);
                }
            }
        }
    }

    /// One backward pass toward a 32-bit target. Mean-squared error is
    /// propagated one layer at a time through the sigmoid derivative.
    /// Returns the output-layer MSE before the update.
    pub fn backprop(&mut self, input: &[f64], target: &[f64; OUTPUT_BITS]) -> f64 {
        let activations = self.forward(input);
        let output = activations.last().expect("network has at least one layer");

        let mse = output
            .iter()
            .zip(target.iter())
            .map(|(a, t)| (a - t) * (a - t))
            .sum::<f64>()
            / output.len() as f64;

        // Output deltas
        let mut deltas: Vec<f64> = output
            .iter()
            .zip(target.iter())
            .map(|(a, t)| (a - t) * a * (1.0 - a))
            .collect();

        for l in (0..self.weights.len()).rev() {
            let src_len = self.layers[l];
            let dst_len = self.layers[l + 1];
            let pre = &activations[l];

            // Deltas for the layer below, computed against the pre-update
            // weights
            let mut prev_deltas = vec![0.0; src_len];
            if l > 0 {
                for (i, prev_delta) in prev_deltas.iter_mut().enumerate() {
                    let mut acc = 0.0;
                    for (j, delta) in deltas.iter().enumerate() {
                        acc += self.weights[l][i * dst_len + j] * delta;
                    }
                    let a = pre[i];
                    *prev_delta = acc * a * (1.0 - a);
                }
            }

            for i in 0..src_len {
                for (j, delta) in deltas.iter().enumerate() {
                    let idx = i * dst_len + j;
                    self.weights[l][idx] = (self.weights[l][idx]
                        - self.learning_rate * pre[i] * delta)
                        .clamp(-WEIGHT_CLIP, WEIGHT_CLIP);
                }
            }
            for (j, delta) in deltas.iter().enumerate() {
                self.thresholds[l][j] += self.learning_rate * delta;
            }

            deltas = prev_deltas;
        }

        mse
    }

    /// Interpret the output layer as a nonce: output `i` above 0.5 sets
    /// bit `i`. The confidence is how far outputs sit from the threshold,
    /// 0 at exactly 0.5 everywhere and 1 at full saturation.
    pub fn predict_nonce(&self, input: &[f64]) -> (u32, f64) {
        let output = self.output(input);
        let nonce = bits_to_nonce(&output);
        let confidence =
            output.iter().map(|a| (a - 0.5).abs()).sum::<f64>() / output.len() as f64 * 2.0;
        (nonce, confidence)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// FNV-1a over the input's f64 bit patterns; mixes the input into the
/// jitter seed so equal inputs always see equal noise.
fn input_hash(input: &[f64]) -> u64 {
    input.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, v| {
        (h ^ v.to_bits()).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Bitwise 0.0/1.0 encoding of a nonce, bit `i` at index `i`.
pub fn nonce_bits(nonce: u32) -> [f64; OUTPUT_BITS] {
    let mut bits = [0.0; OUTPUT_BITS];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = ((nonce >> i) & 1) as f64;
    }
    bits
}

/// Threshold an output vector back into a nonce.
pub fn bits_to_nonce(output: &[f64]) -> u32 {
    output
        .iter()
        .take(OUTPUT_BITS)
        .enumerate()
        .fold(0u32, |acc, (i, a)| if *a > 0.5 { acc | (1 << i) } else { acc })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_network() -> LayeredNetwork {
        LayeredNetwork::new(&[60, 16, 32], 0.05, 0.999, 0.9, 42)
    }

    fn sample_input() -> Vec<f64> {
        (0..60).map(|i| (i as f64 / 60.0)).collect()
    }

    #[test]
    fn test_forward_shapes() {
        let activations = small_network().forward(&sample_input());
        assert_eq!(activations.len(), 3);
        assert_eq!(activations[0].len(), 60);
        assert_eq!(activations[1].len(), 16);
        assert_eq!(activations[2].len(), 32);
        for a in &activations[1] {
            assert!(*a > 0.0 && *a < 1.0);
        }
    }

    #[test]
    fn test_forward_is_pure() {
        let network = small_network();
        let input = sample_input();
        assert_eq!(network.forward(&input), network.forward(&input));
    }

    #[test]
    fn test_short_input_is_padded() {
        let network = small_network();
        let padded: Vec<f64> = sample_input().into_iter().take(10).collect();
        let out = network.forward(&padded);
        assert_eq!(out[0].len(), 60);
        assert!(out[0][10..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_nonce_bits_round_trip() {
        for nonce in [0u32, 1, 0xdeadbeef, u32::MAX] {
            let bits = nonce_bits(nonce);
            assert_eq!(bits_to_nonce(&bits), nonce);
        }
    }

    #[test]
    fn test_backprop_reduces_error() {
        let mut network = small_network();
        let input = sample_input();
        let target = nonce_bits(0xdeadbeef);

        let initial = network.backprop(&input, &target);
        let mut last = initial;
        for _ in 0..200 {
            last = network.backprop(&input, &target);
        }
        assert!(last < initial, "mse {} did not drop below {}", last, initial);
    }

    #[test]
    fn test_weights_stay_clipped() {
        let mut network = small_network();
        let input = vec![1.0; 60];
        let activations = network.forward(&input);
        for _ in 0..1000 {
            network.hebbian_update(&activations, 1.0);
        }
        for layer in &network.weights {
            for w in layer {
                assert!(w.abs() <= WEIGHT_CLIP);
            }
        }
    }

    #[test]
    fn test_serde_round_trip_preserves_forward() {
        let network = small_network();
        let json = serde_json::to_string(&network).unwrap();
        let restored: LayeredNetwork = serde_json::from_str(&json).unwrap();

        // Bit-identical outputs across many random patterns
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..1000 {
            let input: Vec<f64> = (0..60).map(|_| rng.gen_range(0.0..5.0)).collect();
            assert_eq!(network.forward(&input), restored.forward(&input));
        }
    }
}
