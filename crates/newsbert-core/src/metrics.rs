//! # Evaluation Metrics
//!
//! Accuracy and one-vs-rest confusion counts over the fixed label set,
//! accumulated batch by batch.

use serde::{Deserialize, Serialize};

use crate::labels::NewsCategory;

/// One-vs-rest confusion counts for a single category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

impl ConfusionCounts {
    fn add(&mut self, other: &ConfusionCounts) {
        self.true_positives += other.true_positives;
        self.true_negatives += other.true_negatives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }
}

/// Counts for one category of the label set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub category: NewsCategory,
    #[serde(flatten)]
    pub counts: ConfusionCounts,
}

/// Aggregate metrics over a full evaluation split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub num_examples: u64,
    pub accuracy: f64,
    /// Example-weighted mean loss.
    pub loss: f64,
    /// Micro-summed one-vs-rest counts across all categories.
    #[serde(flatten)]
    pub totals: ConfusionCounts,
    pub per_class: Vec<ClassMetrics>,
}

/// Running totals fed one batch at a time.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    correct: u64,
    seen: u64,
    loss_sum: f64,
    per_class: [ConfusionCounts; NewsCategory::NUM_LABELS],
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch of true labels, predictions and its mean loss.
    pub fn update(&mut self, labels: &[usize], predictions: &[usize], batch_loss: f64) {
        let n = labels.len().min(predictions.len());
        for (&label, &pred) in labels.iter().zip(predictions) {
            if label == pred {
                self.correct += 1;
            }
            for (class, counts) in self.per_class.iter_mut().enumerate() {
                match (pred == class, label == class) {
                    (true, true) => counts.true_positives += 1,
                    (true, false) => counts.false_positives += 1,
                    (false, true) => counts.false_negatives += 1,
                    (false, false) => counts.true_negatives += 1,
                }
            }
        }
        self.seen += n as u64;
        self.loss_sum += batch_loss * n as f64;
    }

    pub fn finish(&self) -> EvalMetrics {
        let mut totals = ConfusionCounts::default();
        let per_class = NewsCategory::all()
            .iter()
            .zip(self.per_class.iter())
            .map(|(category, counts)| {
                totals.add(counts);
                ClassMetrics {
                    category: *category,
                    counts: *counts,
                }
            })
            .collect();

        EvalMetrics {
            num_examples: self.seen,
            accuracy: ratio(self.correct, self.seen),
            loss: if self.seen > 0 {
                self.loss_sum / self.seen as f64
            } else {
                0.0
            },
            totals,
            per_class,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
