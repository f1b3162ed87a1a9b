//! Deterministic shuffled train/test split of window tensors.

use ndarray::Axis;
use rand::seq::SliceRandom;

use crate::config::SplitConfig;
use crate::data::WindowTensors;
use crate::errors::ExtractError;

/// Train and test partitions of one tensor set.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainTestSplit {
    /// Training windows.
    pub train: WindowTensors,
    /// Held-out windows.
    pub test: WindowTensors,
}

/// SplitMix64 stream; identical seeds give identical permutations on every
/// platform.
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64_internal(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9E3779B97F4A7C15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

impl rand::RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64_internal() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u64_internal()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64_internal().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// Number of windows assigned to the test partition: `ceil(fraction * total)`.
pub fn test_len(total: usize, test_fraction: f64) -> usize {
    ((test_fraction * total as f64).ceil() as usize).min(total)
}

/// Shuffle windows with `config.seed` and split them into train and test sets.
///
/// Inputs and labels are permuted identically. The first `test_len` windows of
/// the permutation form the test set. Empty tensors split into two empty sets.
pub fn train_test_split(
    tensors: &WindowTensors,
    config: SplitConfig,
) -> Result<TrainTestSplit, ExtractError> {
    let config = config.validate()?;
    let mut order: Vec<usize> = (0..tensors.len()).collect();
    let mut rng = DeterministicRng::new(config.seed);
    order.shuffle(&mut rng);

    let (test, train) = order.split_at(test_len(order.len(), config.test_fraction));
    Ok(TrainTestSplit {
        train: take_windows(tensors, train),
        test: take_windows(tensors, test),
    })
}

fn take_windows(tensors: &WindowTensors, indices: &[usize]) -> WindowTensors {
    WindowTensors {
        inputs: tensors.inputs.select(Axis(0), indices),
        labels: tensors.labels.select(Axis(0), indices),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn tensors(windows: usize) -> WindowTensors {
        WindowTensors {
            inputs: Array3::from_shape_fn((windows, 2, 1), |(w, h, _)| (w * 10 + h) as f64),
            labels: Array2::from_shape_fn((windows, 1), |(w, _)| w as f64),
        }
    }

    fn config(seed: u64) -> SplitConfig {
        SplitConfig {
            test_fraction: 0.3,
            seed,
        }
    }

    #[test]
    fn split_sizes_round_test_partition_up() {
        let split = train_test_split(&tensors(10), config(7)).unwrap();
        assert_eq!(split.test.len(), 3);
        assert_eq!(split.train.len(), 7);
        assert_eq!(test_len(5, 0.5), 3);
    }

    #[test]
    fn inputs_and_labels_share_the_permutation() {
        let split = train_test_split(&tensors(12), config(3)).unwrap();
        for part in [&split.train, &split.test] {
            for window in 0..part.len() {
                let label = part.labels[[window, 0]];
                assert_eq!(part.inputs[[window, 0, 0]], label * 10.0);
                assert_eq!(part.inputs[[window, 1, 0]], label * 10.0 + 1.0);
            }
        }
        let mut seen: Vec<f64> = split
            .train
            .labels
            .iter()
            .chain(split.test.labels.iter())
            .copied()
            .collect();
        seen.sort_by(f64::total_cmp);
        assert_eq!(seen, (0..12).map(|w| w as f64).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_same_split() {
        let a = train_test_split(&tensors(20), config(11)).unwrap();
        let b = train_test_split(&tensors(20), config(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_tensors_split_into_empty_parts() {
        let split = train_test_split(&WindowTensors::empty(2, 1, 1), config(1)).unwrap();
        assert!(split.train.is_empty());
        assert!(split.test.is_empty());
        assert_eq!(split.train.inputs.shape(), &[0, 2, 1]);
    }

    #[test]
    fn invalid_fraction_is_rejected() {
        let bad = SplitConfig {
            test_fraction: 1.0,
            seed: 0,
        };
        assert!(matches!(
            train_test_split(&tensors(4), bad),
            Err(ExtractError::Configuration(_))
        ));
    }
}
