//! Seeded train/validation split.

use oorandom::Rand64;
use tracing::info;

/// The two disjoint partitions of a labeled table.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit<T> {
    pub train: Vec<T>,
    pub validation: Vec<T>,
}

/// Fisher-Yates permutation of `0..len` driven by `seed`.
pub fn seeded_permutation(len: usize, seed: u64) -> Vec<usize> {
    let mut rng = Rand64::new(u128::from(seed));
    let mut indices: Vec<usize> = (0..len).collect();
    for i in (1..len).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
    indices
}

/// Shuffle `rows` with `seed` and hold out `⌈len × validation_fraction⌉`
/// of them for validation.
///
/// The same seed over the same rows always yields the same partition.
pub fn split_train_validation<T>(
    rows: Vec<T>,
    validation_fraction: f64,
    seed: u64,
) -> DatasetSplit<T> {
    let total = rows.len();
    let n_val = ((total as f64 * validation_fraction).ceil() as usize).min(total);

    let mut slots: Vec<Option<T>> = rows.into_iter().map(Some).collect();
    let order = seeded_permutation(total, seed);

    let mut validation = Vec::with_capacity(n_val);
    let mut train = Vec::with_capacity(total - n_val);
    for (pos, idx) in order.into_iter().enumerate() {
        if let Some(row) = slots[idx].take() {
            if pos < n_val {
                validation.push(row);
            } else {
                train.push(row);
            }
        }
    }

    info!(
        "Dataset split: {} training, {} validation",
        train.len(),
        validation.len()
    );

    DatasetSplit { train, validation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn correct_split_sizes() {
        let split = split_train_validation((0..100).collect::<Vec<usize>>(), 0.2, 100);
        assert_eq!(split.train.len(), 80);
        assert_eq!(split.validation.len(), 20);
    }

    #[test]
    fn validation_size_rounds_up() {
        let split = split_train_validation(vec!["a", "b"], 0.2, 100);
        assert_eq!(split.validation.len(), 1);
        assert_eq!(split.train.len(), 1);
    }

    #[test]
    fn empty_dataset() {
        let split = split_train_validation(Vec::<usize>::new(), 0.2, 1);
        assert!(split.train.is_empty());
        assert!(split.validation.is_empty());
    }

    #[test]
    fn zero_fraction_keeps_everything_for_training() {
        let split = split_train_validation((0..10).collect::<Vec<usize>>(), 0.0, 7);
        assert_eq!(split.train.len(), 10);
        assert!(split.validation.is_empty());
    }

    #[test]
    fn same_seed_same_partition() {
        let rows: Vec<usize> = (0..37).collect();
        let a = split_train_validation(rows.clone(), 0.2, 100);
        let b = split_train_validation(rows, 0.2, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn permutation_is_a_permutation() {
        let mut perm = seeded_permutation(50, 3);
        perm.sort_unstable();
        assert_eq!(perm, (0..50).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn split_is_disjoint_and_exhaustive(len in 0usize..300, seed in any::<u64>(), frac in 0.0f64..0.95) {
            let split = split_train_validation((0..len).collect::<Vec<usize>>(), frac, seed);
            prop_assert_eq!(split.train.len() + split.validation.len(), len);

            let train: HashSet<_> = split.train.iter().copied().collect();
            let val: HashSet<_> = split.validation.iter().copied().collect();
            prop_assert!(train.is_disjoint(&val));
            prop_assert_eq!(train.len() + val.len(), len);
        }
    }
}
