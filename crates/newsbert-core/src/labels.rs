//! # News Categories
//!
//! The fixed, ordered label set of the classifier. The order defines both the
//! integer label ids found in the training data and the display names used
//! when exporting predictions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four news sections a story can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NewsCategory {
    Politics,
    Technology,
    Entertainment,
    Business,
}

impl NewsCategory {
    /// Total number of distinct labels.
    pub const NUM_LABELS: usize = 4;

    /// All categories in label-id order.
    pub fn all() -> &'static [NewsCategory] {
        &[
            NewsCategory::Politics,
            NewsCategory::Technology,
            NewsCategory::Entertainment,
            NewsCategory::Business,
        ]
    }

    /// Get the label id for tensor operations.
    pub fn index(&self) -> usize {
        match self {
            NewsCategory::Politics => 0,
            NewsCategory::Technology => 1,
            NewsCategory::Entertainment => 2,
            NewsCategory::Business => 3,
        }
    }

    /// Get the category for a label id.
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(NewsCategory::Politics),
            1 => Some(NewsCategory::Technology),
            2 => Some(NewsCategory::Entertainment),
            3 => Some(NewsCategory::Business),
            _ => None,
        }
    }

    /// Human-readable section name.
    pub fn name(&self) -> &'static str {
        match self {
            NewsCategory::Politics => "Politics",
            NewsCategory::Technology => "Technology",
            NewsCategory::Entertainment => "Entertainment",
            NewsCategory::Business => "Business",
        }
    }
}

impl fmt::Display for NewsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_roundtrip_covers_label_set() {
        assert_eq!(NewsCategory::all().len(), NewsCategory::NUM_LABELS);
        for (i, category) in NewsCategory::all().iter().enumerate() {
            assert_eq!(category.index(), i);
            assert_eq!(NewsCategory::from_index(i), Some(*category));
        }
        assert_eq!(NewsCategory::from_index(4), None);
    }

    #[test]
    fn display_table_order() {
        let names: Vec<String> = NewsCategory::all().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, ["Politics", "Technology", "Entertainment", "Business"]);
    }
}
