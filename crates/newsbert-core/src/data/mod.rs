//! # Dataset Plumbing
//!
//! Reading labeled and unlabeled story tables (workbooks or CSV), the seeded train/validation
//! split, and normalization of rows into [`LabeledExample`]s.

pub mod example;
pub mod loader;
pub mod split;

pub use example::{LabeledExample, label_distribution, normalize_rows, prediction_examples};
pub use loader::{RawRow, is_workbook, load_labeled, load_unlabeled};
pub use split::{DatasetSplit, seeded_permutation, split_train_validation};
