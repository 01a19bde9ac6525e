//! Run-level configuration: everything one invocation of the pipeline needs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use newsbert_core::{DataConfig, ExportFormat, ModelSource, TrainingConfig};
use serde::{Deserialize, Serialize};

/// File the effective configuration is persisted to inside the output dir.
pub const RUN_CONFIG_FILE: &str = "run_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelSource,
    pub data: DataConfig,
    pub training: TrainingConfig,
    /// Checkpoints, summaries and evaluation results.
    pub output_dir: PathBuf,
    /// Remove `output_dir` before the run starts.
    pub do_delete: bool,
    /// Destination of the exported test predictions.
    pub submission_path: PathBuf,
    pub export_format: ExportFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelSource::default(),
            data: DataConfig::default(),
            training: TrainingConfig::default(),
            output_dir: PathBuf::from("trainedModel/predictNewsCategory"),
            do_delete: false,
            submission_path: PathBuf::from("datasets/submission.xlsx"),
            export_format: ExportFormat::Index,
        }
    }
}

impl RunConfig {
    /// Load a JSON configuration; absent fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Write the configuration as pretty JSON into the output directory.
    pub fn persist(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(RUN_CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        self.training
            .validate()
            .context("invalid training hyperparameters")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsbert_core::ModelLocation;

    #[test]
    fn defaults_follow_reference_run() {
        let config = RunConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("trainedModel/predictNewsCategory"));
        assert!(!config.do_delete);
        assert_eq!(config.export_format, ExportFormat::Index);
        assert_eq!(config.data.text_column, "STORY");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "model": {"location": {"kind": "local", "dir": "/models/bert"}, "weight_prefix": ""},
                "training": {"batch_size": 4},
                "export_format": "name"
            }"#,
        )
        .unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(
            config.model.location,
            ModelLocation::Local {
                dir: PathBuf::from("/models/bert")
            }
        );
        assert_eq!(config.training.batch_size, 4);
        assert_eq!(config.training.max_seq_length, 128);
        assert_eq!(config.export_format, ExportFormat::Name);
    }

    #[test]
    fn persist_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            output_dir: dir.path().join("out"),
            ..RunConfig::default()
        };
        let path = config.persist().unwrap();
        assert_eq!(RunConfig::from_file(path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = RunConfig::from_file("/nonexistent/run.json").unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
