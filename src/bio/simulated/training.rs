// Training for the simulated backend

use crate::bio::simulated::network::{LayeredNetwork, OUTPUT_BITS, bits_to_nonce, nonce_bits};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the model sits in its learning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    Untrained,
    InitialLearning,
    Trained,
    Retraining,
    Optimising,
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrainingState::Untrained => write!(f, "untrained"),
            TrainingState::InitialLearning => write!(f, "initial-learning"),
            TrainingState::Trained => write!(f, "trained"),
            TrainingState::Retraining => write!(f, "retraining"),
            TrainingState::Optimising => write!(f, "optimising"),
        }
    }
}

/// One supervised example: a 60-dim feature/stimulus vector and the nonce
/// it should map to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: Vec<f64>,
    pub nonce: u32,
}

/// Result of a training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub epochs: u32,
    /// Mean per-bit accuracy over the final epoch, in [0, 1]
    pub accuracy: f64,
}

/// Run supervised epochs until the bit accuracy reaches `target_accuracy`
/// or `max_iterations` epochs elapse. Examples are reshuffled every epoch
/// from a deterministic stream.
pub fn run_epochs(
    network: &mut LayeredNetwork,
    examples: &[TrainingExample],
    max_iterations: u32,
    target_accuracy: f64,
    shuffle_seed: u64,
) -> TrainingReport {
    if examples.is_empty() {
        return TrainingReport {
            epochs: 0,
            accuracy: 0.0,
        };
    }

    let mut order: Vec<usize> = (0..examples.len()).collect();
    let mut rng = StdRng::seed_from_u64(shuffle_seed);
    let mut accuracy = 0.0;
    let mut epochs = 0;

    for epoch in 0..max_iterations {
        order.shuffle(&mut rng);

        let mut correct_bits = 0usize;
        for idx in &order {
            let example = &examples[*idx];
            let target = nonce_bits(example.nonce);

            let predicted = bits_to_nonce(&network.output(&example.features));
            correct_bits += matching_bits(predicted, example.nonce);

            network.backprop(&example.features, &target);
        }

        epochs = epoch + 1;
        accuracy = correct_bits as f64 / (examples.len() * OUTPUT_BITS) as f64;
        log::debug!("training epoch {}: bit accuracy {:.3}", epochs, accuracy);

        if accuracy >= target_accuracy {
            break;
        }
    }

    TrainingReport { epochs, accuracy }
}

fn matching_bits(a: u32, b: u32) -> usize {
    (!(a ^ b)).count_ones() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_examples() {
        let mut network = LayeredNetwork::new(&[60, 8, 32], 0.05, 1.0, 0.9, 7);
        let report = run_epochs(&mut network, &[], 10, 0.85, 1);
        assert_eq!(report.epochs, 0);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn test_accuracy_improves_on_single_example() {
        let mut network = LayeredNetwork::new(&[60, 8, 32], 0.2, 1.0, 0.9, 7);
        let examples = vec![TrainingExample {
            features: (0..60).map(|i| i as f64 / 60.0).collect(),
            nonce: 0x0f0f_0f0f,
        }];

        let before = run_epochs(&mut network, &examples, 1, 1.1, 1).accuracy;
        let after = run_epochs(&mut network, &examples, 300, 0.99, 1).accuracy;
        assert!(after >= before, "accuracy fell from {} to {}", before, after);
        assert!(after > 0.8, "accuracy only reached {}", after);
    }

    #[test]
    fn test_stops_at_target() {
        let mut network = LayeredNetwork::new(&[60, 8, 32], 0.2, 1.0, 0.9, 7);
        let examples = vec![TrainingExample {
            features: vec![0.5; 60],
            nonce: 0,
        }];
        // A target of zero accuracy is met after the first epoch
        let report = run_epochs(&mut network, &examples, 50, 0.0, 1);
        assert_eq!(report.epochs, 1);
    }

    #[test]
    fn test_matching_bits() {
        assert_eq!(matching_bits(0, 0), 32);
        assert_eq!(matching_bits(0, u32::MAX), 0);
        assert_eq!(matching_bits(0b1010, 0b1000), 31);
    }
}
