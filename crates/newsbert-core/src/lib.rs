//! # Newsbert Core
//!
//! Building blocks for fine-tuning a pretrained BERT encoder on the
//! four-section news classification task: dataset loading and the seeded
//! split, wordpiece feature encoding, the encoder and classifier head,
//! the learning-rate schedule, evaluation metrics and prediction export.
//!
//! ## Quick Start
//!
//! ```rust
//! use newsbert_core::{FeatureEncoder, LabeledExample, WordpieceTokenizer};
//!
//! let vocab = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "new", "phone"];
//! let tokenizer = WordpieceTokenizer::from_vocab(&vocab, true).unwrap();
//! let encoder = FeatureEncoder::new(&tokenizer, 8);
//!
//! let feature = encoder.encode(&LabeledExample::new("New phone", 1)).unwrap();
//! assert_eq!(feature.input_ids, vec![2, 4, 5, 3, 0, 0, 0, 0]);
//! assert_eq!(feature.input_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
//! ```
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod features;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod schedule;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod testing;

// Re-export primary API
pub use config::{
    DEFAULT_MODEL_REPO, DEFAULT_MODEL_REVISION, DataConfig, ModelLocation, ModelSource,
    TrainingConfig,
};
pub use data::{
    DatasetSplit, LabeledExample, RawRow, label_distribution, load_labeled, load_unlabeled,
    normalize_rows, prediction_examples, split_train_validation,
};
pub use error::{NewsbertError, Result};
pub use export::{ExportFormat, PredictionResult, export_predictions};
pub use features::{EncodedFeature, FeatureBatch, FeatureEncoder};
pub use labels::NewsCategory;
pub use metrics::{ClassMetrics, ConfusionCounts, EvalMetrics, MetricsAccumulator};
pub use model::{
    BertEncoder, Classifier, Mode, ModelArtifact, ModelOutput, TextEncoder, Tokenize,
    WordpieceTokenizer,
};
pub use schedule::WarmupLinearDecay;
