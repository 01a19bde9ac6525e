//! Normalized units of supervision.

use crate::data::loader::RawRow;
use crate::labels::NewsCategory;

/// A single text example with its label id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledExample {
    /// Optional identifier, unique within a batch.
    pub guid: Option<String>,
    /// The story text that is classified.
    pub text_a: String,
    /// Second segment for sentence-pair tasks; this task never sets it.
    pub text_b: Option<String>,
    /// Label id; the placeholder `0` when the true label is unknown.
    pub label: usize,
}

impl LabeledExample {
    pub fn new(text_a: impl Into<String>, label: usize) -> Self {
        Self {
            guid: None,
            text_a: text_a.into(),
            text_b: None,
            label,
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }
}

/// Map raw rows to examples, preserving order. Unlabeled rows get the
/// placeholder label.
pub fn normalize_rows(rows: &[RawRow]) -> Vec<LabeledExample> {
    rows.iter()
        .map(|row| LabeledExample::new(row.story.clone(), row.section.unwrap_or(0)))
        .collect()
}

/// Examples for inference-only sentences, each carrying the placeholder label.
pub fn prediction_examples<S: AsRef<str>>(sentences: &[S]) -> Vec<LabeledExample> {
    sentences
        .iter()
        .map(|s| LabeledExample::new(s.as_ref(), 0))
        .collect()
}

/// Count how many examples fall into each category, in label-id order.
pub fn label_distribution(examples: &[LabeledExample]) -> [usize; NewsCategory::NUM_LABELS] {
    let mut counts = [0usize; NewsCategory::NUM_LABELS];
    for example in examples {
        if let Some(slot) = counts.get_mut(example.label) {
            *slot += 1;
        }
    }
    counts
}
