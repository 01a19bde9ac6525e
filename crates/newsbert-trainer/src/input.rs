//! Batch ordering for the three estimator modes.

use newsbert_core::data::seeded_permutation;

/// Endless stream of training batches.
///
/// Each pass over the data is its own seeded permutation (`seed + pass`),
/// and passes are concatenated before batching, so every batch holds
/// exactly `batch_size` indices even when the data size is not a multiple
/// of it.
#[derive(Debug, Clone)]
pub struct TrainingStream {
    len: usize,
    batch_size: usize,
    seed: u64,
    pass: u64,
    order: Vec<usize>,
    cursor: usize,
}

impl TrainingStream {
    pub fn new(len: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            len,
            batch_size,
            seed,
            pass: 0,
            order: seeded_permutation(len, seed),
            cursor: 0,
        }
    }

    /// Indices of the next batch; empty only when there is no data.
    pub fn next_batch(&mut self) -> Vec<usize> {
        if self.len == 0 || self.batch_size == 0 {
            return Vec::new();
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.pass += 1;
                self.order = seeded_permutation(self.len, self.seed.wrapping_add(self.pass));
                self.cursor = 0;
            }
            let take = (self.batch_size - batch.len()).min(self.order.len() - self.cursor);
            batch.extend_from_slice(&self.order[self.cursor..self.cursor + take]);
            self.cursor += take;
        }
        batch
    }

    /// Discard `steps` batches, as a resumed run must.
    pub fn skip(&mut self, steps: usize) {
        for _ in 0..steps {
            self.next_batch();
        }
    }

    /// Number of completed passes over the data.
    pub fn pass(&self) -> u64 {
        self.pass
    }
}

/// In-order batches for evaluation and prediction; the last may be short.
pub fn sequential_batches(len: usize, batch_size: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let step = batch_size.max(1);
    (0..len).step_by(step).map(move |start| start..(start + step).min(len))
}
