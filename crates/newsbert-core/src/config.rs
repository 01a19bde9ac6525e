//! # Run Configuration
//!
//! Hyperparameters, input layout and model locator. Every component takes
//! the piece it needs by value; nothing reads ambient globals.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{NewsbertError, Result};

/// Hyperparameters for fine-tuning and the derived step counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fixed length of every encoded sequence, boundary markers included.
    pub max_seq_length: usize,
    /// Examples per optimizer step.
    pub batch_size: usize,
    /// Peak learning rate reached at the end of warmup.
    pub learning_rate: f64,
    /// Number of passes over the training split (may be fractional).
    pub num_train_epochs: f64,
    /// Fraction of the total steps spent ramping the learning rate up.
    pub warmup_proportion: f64,
    /// Persist the parameters every this many steps.
    pub save_checkpoints_steps: usize,
    /// Emit a training summary every this many steps.
    pub save_summary_steps: usize,
    /// Number of most recent checkpoints kept on disk.
    pub keep_checkpoint_max: usize,
    /// Probability of keeping a pooled activation under dropout.
    pub dropout_keep_prob: f64,
    /// Decoupled weight decay for non-bias, non-LayerNorm parameters.
    pub weight_decay: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    /// Global gradient norm ceiling.
    pub clip_norm: f64,
    /// Share of the labeled rows held out for validation.
    pub validation_fraction: f64,
    /// Seed of the train/validation split.
    pub split_seed: u64,
    /// Seed of the per-epoch training shuffle.
    pub shuffle_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_seq_length: 128,
            batch_size: 32,
            learning_rate: 2e-5,
            num_train_epochs: 3.0,
            warmup_proportion: 0.1,
            save_checkpoints_steps: 300,
            save_summary_steps: 100,
            keep_checkpoint_max: 5,
            dropout_keep_prob: 0.9,
            weight_decay: 0.01,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-6,
            clip_norm: 1.0,
            validation_fraction: 0.2,
            split_seed: 100,
            shuffle_seed: 12345,
        }
    }
}

impl TrainingConfig {
    /// Create a configuration with the default hyperparameters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_num_train_epochs(mut self, epochs: f64) -> Self {
        self.num_train_epochs = epochs;
        self
    }

    pub fn with_warmup_proportion(mut self, proportion: f64) -> Self {
        self.warmup_proportion = proportion;
        self
    }

    pub fn with_save_checkpoints_steps(mut self, steps: usize) -> Self {
        self.save_checkpoints_steps = steps;
        self
    }

    pub fn with_save_summary_steps(mut self, steps: usize) -> Self {
        self.save_summary_steps = steps;
        self
    }

    pub fn with_keep_checkpoint_max(mut self, keep: usize) -> Self {
        self.keep_checkpoint_max = keep;
        self
    }

    pub fn with_dropout_keep_prob(mut self, keep_prob: f64) -> Self {
        self.dropout_keep_prob = keep_prob;
        self
    }

    pub fn with_validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    pub fn with_split_seed(mut self, seed: u64) -> Self {
        self.split_seed = seed;
        self
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = seed;
        self
    }

    /// Reject values no run can be built from.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(NewsbertError::InvalidConfig(msg));

        if self.max_seq_length < 3 {
            return fail(format!(
                "max_seq_length must leave room for [CLS] and [SEP], got {}",
                self.max_seq_length
            ));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".into());
        }
        if !(self.learning_rate > 0.0) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.num_train_epochs > 0.0) {
            return fail(format!(
                "num_train_epochs must be positive, got {}",
                self.num_train_epochs
            ));
        }
        if !(0.0..=1.0).contains(&self.warmup_proportion) {
            return fail(format!(
                "warmup_proportion must be in [0, 1], got {}",
                self.warmup_proportion
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return fail(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            ));
        }
        if !(self.dropout_keep_prob > 0.0 && self.dropout_keep_prob <= 1.0) {
            return fail(format!(
                "dropout_keep_prob must be in (0, 1], got {}",
                self.dropout_keep_prob
            ));
        }
        if self.save_checkpoints_steps == 0 || self.save_summary_steps == 0 {
            return fail("checkpoint and summary cadences must be positive".into());
        }
        if self.keep_checkpoint_max == 0 {
            return fail("keep_checkpoint_max must be positive".into());
        }
        Ok(())
    }

    /// Total optimizer steps for `num_examples` training features:
    /// `⌊num_examples / batch_size × num_train_epochs⌋`.
    pub fn num_train_steps(&self, num_examples: usize) -> usize {
        (num_examples as f64 / self.batch_size as f64 * self.num_train_epochs) as usize
    }

    /// Warmup steps for a run of `num_train_steps` steps.
    pub fn num_warmup_steps(&self, num_train_steps: usize) -> usize {
        (num_train_steps as f64 * self.warmup_proportion) as usize
    }
}

/// Where the tabular inputs live and which columns to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Labeled rows (text and label columns).
    pub train_path: PathBuf,
    /// Unlabeled rows (text column only).
    pub test_path: PathBuf,
    pub text_column: String,
    pub label_column: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("datasets/Data_Train.xlsx"),
            test_path: PathBuf::from("datasets/Data_Test.xlsx"),
            text_column: "STORY".to_string(),
            label_column: "SECTION".to_string(),
        }
    }
}

/// Version-pinned locator of the pretrained encoder artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelLocation {
    /// A directory already holding the artifact files.
    Local { dir: PathBuf },
    /// A Hugging Face hub repository at a fixed revision.
    Hub { repo: String, revision: String },
}

/// Hub repository of the default pretrained encoder.
pub const DEFAULT_MODEL_REPO: &str = "google-bert/bert-base-uncased";

/// Commit of [`DEFAULT_MODEL_REPO`] every default run resolves to.
pub const DEFAULT_MODEL_REVISION: &str = "86b5e0934494bd15c9632b12f734a8a67f723594";

/// The pretrained encoder to fine-tune.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub location: ModelLocation,
    /// Parameter-name prefix of the encoder weights (`bert` for
    /// `bert.embeddings.*`); empty when the names are unprefixed.
    pub weight_prefix: String,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::hub(DEFAULT_MODEL_REPO, DEFAULT_MODEL_REVISION)
    }
}

impl ModelSource {
    pub fn hub(repo: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            location: ModelLocation::Hub {
                repo: repo.into(),
                revision: revision.into(),
            },
            weight_prefix: "bert".to_string(),
        }
    }

    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: ModelLocation::Local { dir: dir.into() },
            weight_prefix: "bert".to_string(),
        }
    }

    pub fn with_weight_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.weight_prefix = prefix.into();
        self
    }

    /// Human-readable locator for logs.
    pub fn describe(&self) -> String {
        match &self.location {
            ModelLocation::Local { dir } => dir.display().to_string(),
            ModelLocation::Hub { repo, revision } => format!("{repo}@{revision}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = TrainingConfig::default();
        assert_eq!(config.max_seq_length, 128);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 2e-5);
        assert_eq!(config.num_train_epochs, 3.0);
        assert_eq!(config.warmup_proportion, 0.1);
        assert_eq!(config.save_checkpoints_steps, 300);
        assert_eq!(config.save_summary_steps, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn step_counts_use_floor_division() {
        let config = TrainingConfig::default();
        // 7628 * 0.8 rows -> 6102 features: 6102 / 32 * 3 = 572.06
        assert_eq!(config.num_train_steps(6102), 572);
        assert_eq!(config.num_warmup_steps(572), 57);
        // Fewer examples than one batch still count fractionally.
        assert_eq!(config.num_train_steps(10), 0);
        let small = config.with_batch_size(4);
        assert_eq!(small.num_train_steps(10), 7);
    }

    #[test]
    fn builder_and_validation() {
        let config = TrainingConfig::new()
            .with_batch_size(0)
            .with_learning_rate(1e-4);
        assert_eq!(config.learning_rate, 1e-4);
        assert!(config.validate().is_err());

        assert!(TrainingConfig::new().with_max_seq_length(2).validate().is_err());
        assert!(TrainingConfig::new().with_validation_fraction(1.0).validate().is_err());
        assert!(TrainingConfig::new().with_dropout_keep_prob(0.0).validate().is_err());
        assert!(TrainingConfig::new().with_save_summary_steps(0).validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TrainingConfig = serde_json::from_str(r#"{"batch_size": 8}"#).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.max_seq_length, 128);
    }

    #[test]
    fn model_source_describe() {
        assert_eq!(
            ModelSource::default().describe(),
            "google-bert/bert-base-uncased@86b5e0934494bd15c9632b12f734a8a67f723594"
        );
        let local = ModelSource::local("/models/bert").with_weight_prefix("");
        assert_eq!(local.weight_prefix, "");
        assert_eq!(local.describe(), "/models/bert");
    }
}
