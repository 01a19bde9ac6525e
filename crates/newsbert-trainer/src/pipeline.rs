//! # Pipeline
//!
//! The end-to-end run (load, split, encode, train, evaluate, predict,
//! export) and the two standalone entry points that work from an existing
//! checkpoint.

use std::io;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use newsbert_core::model::{BertConfig, load_pretrained_weights};
use newsbert_core::{
    BertEncoder, Classifier, DataConfig, EncodedFeature, FeatureEncoder, LabeledExample,
    ModelArtifact, NewsCategory, PredictionResult, RawRow, TrainingConfig, WordpieceTokenizer,
    export_predictions, label_distribution, load_labeled, load_unlabeled, normalize_rows,
    prediction_examples, split_train_validation,
};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::estimator::{EvalReport, Estimator, TrainReport};
use crate::output_dir::{DirReset, prepare_output_dir};

/// GPU 0 when candle was built with CUDA and one is present, else the CPU.
pub fn select_device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

/// Encoder from `artifact` plus a freshly initialized classification head.
///
/// With `load_pretrained` the encoder variables are overwritten by the
/// artifact's weights; otherwise they keep their random initialization,
/// which is enough when a checkpoint will be restored over them.
pub fn build_classifier(
    artifact: &ModelArtifact,
    config: &TrainingConfig,
    device: &Device,
    load_pretrained: bool,
) -> Result<(Classifier<BertEncoder>, VarMap)> {
    let config_json = artifact.config_json()?;
    let dims = BertConfig::from_json(&config_json)?;
    if config.max_seq_length > dims.max_position_embeddings {
        bail!(
            "max_seq_length {} exceeds the encoder's {} positions",
            config.max_seq_length,
            dims.max_position_embeddings
        );
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let encoder = BertEncoder::load(vb.clone(), &config_json, &artifact.weight_prefix)?;
    if load_pretrained {
        load_pretrained_weights(&varmap, &artifact.weights_file, &artifact.weight_prefix, device)
            .context("failed to initialize the encoder from pretrained weights")?;
    }
    let classifier = Classifier::new(
        encoder,
        vb,
        NewsCategory::NUM_LABELS,
        config.dropout_keep_prob,
    )?;
    Ok((classifier, varmap))
}

/// Normalized examples of the three input partitions.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: Vec<LabeledExample>,
    pub validation: Vec<LabeledExample>,
    pub test_sentences: Vec<String>,
}

/// Read both tables and split the labeled one.
pub fn load_datasets(data: &DataConfig, training: &TrainingConfig) -> Result<Datasets> {
    let labeled = load_labeled(&data.train_path, &data.text_column, &data.label_column)
        .with_context(|| format!("failed to load {}", data.train_path.display()))?;
    let test = load_unlabeled(&data.test_path, &data.text_column)
        .with_context(|| format!("failed to load {}", data.test_path.display()))?;

    let split = split_train_validation(labeled, training.validation_fraction, training.split_seed);
    let train = tag_examples(normalize_rows(&split.train), "train");
    log_label_distribution(&train);

    Ok(Datasets {
        train,
        validation: tag_examples(normalize_rows(&split.validation), "dev"),
        test_sentences: test.into_iter().map(|row: RawRow| row.story).collect(),
    })
}

/// Name each example `{set}-{i}` so logged features can be traced back.
fn tag_examples(examples: Vec<LabeledExample>, set: &str) -> Vec<LabeledExample> {
    examples
        .into_iter()
        .enumerate()
        .map(|(i, example)| example.with_guid(format!("{set}-{i}")))
        .collect()
}

fn log_label_distribution(examples: &[LabeledExample]) {
    let counts = label_distribution(examples);
    info!("Training label distribution:");
    for (category, count) in NewsCategory::all().iter().zip(counts) {
        info!("  {:<13} {}", category.name(), count);
    }
}

/// Tokenizer and estimator bound to one run configuration.
pub struct Session {
    pub config: RunConfig,
    pub tokenizer: WordpieceTokenizer,
    pub estimator: Estimator<BertEncoder>,
}

impl Session {
    pub async fn open(config: RunConfig, load_pretrained: bool) -> Result<Self> {
        let artifact = ModelArtifact::resolve(&config.model)
            .await
            .context("failed to resolve the pretrained encoder")?;
        let tokenizer = artifact.tokenizer()?;
        info!(
            "Tokenizer: {} wordpieces, lowercase = {}",
            tokenizer.vocab_size(),
            tokenizer.do_lower_case()
        );

        let device = select_device();
        let (classifier, varmap) = build_classifier(&artifact, &config.training, &device, load_pretrained)?;
        let estimator = Estimator::new(
            classifier,
            varmap,
            config.training,
            &config.output_dir,
            device,
        );
        Ok(Self {
            config,
            tokenizer,
            estimator,
        })
    }

    pub fn encode(&self, examples: &[LabeledExample]) -> Result<Vec<EncodedFeature>> {
        FeatureEncoder::new(&self.tokenizer, self.config.training.max_seq_length)
            .encode_all(examples)
            .context("failed to encode examples")
    }

    /// Predict arbitrary sentences.
    pub fn predict_sentences(&mut self, sentences: &[String]) -> Result<Vec<PredictionResult>> {
        let features = self.encode(&prediction_examples(sentences))?;
        self.estimator.predict(sentences, &features)
    }

    fn require_checkpoint(&self) -> Result<()> {
        if self.estimator.checkpoints().latest()?.is_none() {
            bail!(
                "no checkpoint in {}; run training first",
                self.estimator.output_dir().display()
            );
        }
        Ok(())
    }
}

/// Outcome of a full run.
pub struct PipelineReport {
    pub train: TrainReport,
    pub eval: EvalReport,
    pub predictions: Vec<PredictionResult>,
    /// What happened to the output directory before training.
    pub reset: DirReset,
}

/// prepare dir → load → split → encode → train → evaluate → predict → export.
pub async fn run_pipeline(config: RunConfig) -> Result<PipelineReport> {
    run_pipeline_with(config, |dir| std::fs::remove_dir_all(dir)).await
}

/// [`run_pipeline`] with the output directory deletion supplied by the
/// caller. A failed deletion is logged and the run goes on.
pub async fn run_pipeline_with<F>(config: RunConfig, remove: F) -> Result<PipelineReport>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    config.validate()?;
    let started = Instant::now();

    let reset = reset_output_dir(&config, remove)?;
    config.persist()?;

    let datasets = load_datasets(&config.data, &config.training)?;
    let mut session = Session::open(config, true).await?;

    let train = session.encode(&datasets.train)?;
    let validation = session.encode(&datasets.validation)?;

    let train_report = session.estimator.train(&train)?;
    let eval_report = session.estimator.evaluate(&validation)?;
    let predictions = session.predict_sentences(&datasets.test_sentences)?;

    export_predictions(
        &session.config.submission_path,
        &predictions,
        session.config.export_format,
    )?;

    info!("Pipeline finished in {:.2?}", started.elapsed());
    Ok(PipelineReport {
        train: train_report,
        eval: eval_report,
        predictions,
        reset,
    })
}

fn reset_output_dir<F>(config: &RunConfig, remove: F) -> Result<DirReset>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let reset = prepare_output_dir(&config.output_dir, config.do_delete, remove)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    if reset.is_failure() {
        warn!("Continuing with the existing contents of the output directory");
    }
    Ok(reset)
}

/// Evaluate the latest checkpoint on the validation split.
pub async fn run_evaluate(config: RunConfig) -> Result<EvalReport> {
    config.validate()?;
    let datasets = load_datasets(&config.data, &config.training)?;
    let mut session = Session::open(config, false).await?;
    session.require_checkpoint()?;

    let validation = session.encode(&datasets.validation)?;
    session.estimator.evaluate(&validation)
}

/// Predict `sentences` with the latest checkpoint, or the test table when
/// none are given; the test table's predictions are also exported.
pub async fn run_predict(config: RunConfig, sentences: Vec<String>) -> Result<Vec<PredictionResult>> {
    config.validate()?;
    let from_test_file = sentences.is_empty();
    let sentences = if from_test_file {
        load_unlabeled(&config.data.test_path, &config.data.text_column)
            .with_context(|| format!("failed to load {}", config.data.test_path.display()))?
            .into_iter()
            .map(|row| row.story)
            .collect()
    } else {
        sentences
    };

    let mut session = Session::open(config, false).await?;
    session.require_checkpoint()?;
    let predictions = session.predict_sentences(&sentences)?;

    if from_test_file {
        export_predictions(
            &session.config.submission_path,
            &predictions,
            session.config.export_format,
        )?;
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsbert_core::testing::write_tiny_artifact;
    use newsbert_core::{ExportFormat, ModelSource};
    use std::sync::{Arc, Mutex};

    fn write_csv(path: &Path, header: &str, rows: &[&str]) {
        let mut contents = format!("{header}\n");
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        std::fs::write(path, contents).unwrap();
    }

    fn run_config(root: &Path) -> RunConfig {
        let artifact = root.join("bert");
        write_tiny_artifact(&artifact).unwrap();

        RunConfig {
            model: ModelSource::local(&artifact),
            data: DataConfig {
                train_path: root.join("Data_Train.csv"),
                test_path: root.join("Data_Test.csv"),
                ..DataConfig::default()
            },
            training: TrainingConfig::default()
                .with_max_seq_length(16)
                .with_batch_size(1)
                .with_num_train_epochs(3.0)
                .with_learning_rate(1e-3)
                .with_save_checkpoints_steps(2)
                .with_save_summary_steps(1),
            output_dir: root.join("trainedModel").join("predictNewsCategory"),
            do_delete: true,
            submission_path: root.join("submission.csv"),
            export_format: ExportFormat::Name,
        }
    }

    #[tokio::test]
    async fn two_row_run_predicts_one_test_row() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        write_csv(
            &config.data.train_path,
            "STORY,SECTION",
            &["Government passes new bill,0", "New phone launched today,1"],
        );
        write_csv(&config.data.test_path, "STORY", &["Election results announced"]);

        let report = run_pipeline(config.clone()).await.unwrap();

        // ⌈2 × 0.2⌉ = 1 validation row leaves one training row: 1 / 1 × 3 steps.
        assert_eq!(report.train.num_train_steps, 3);
        assert_eq!(report.eval.metrics.num_examples, 1);
        assert_eq!(report.predictions.len(), 1);

        let prediction = &report.predictions[0];
        assert_eq!(prediction.sentence, "Election results announced");
        let category = NewsCategory::from_index(prediction.label_index).unwrap();
        assert_eq!(prediction.label_name, category.name());

        let exported = std::fs::read_to_string(&config.submission_path).unwrap();
        assert_eq!(exported, format!("SECTION\n{}\n", category.name()));
        assert!(config.output_dir.join("run_config.json").is_file());
        assert!(config.output_dir.join("eval_results.json").is_file());
    }

    fn refuse_removal(_: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only mount"))
    }

    #[tokio::test]
    async fn failed_delete_continues_over_old_contents() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        write_csv(
            &config.data.train_path,
            "STORY,SECTION",
            &["Government passes new bill,0", "New phone launched today,1"],
        );
        write_csv(&config.data.test_path, "STORY", &["Election results announced"]);
        std::fs::create_dir_all(&config.output_dir).unwrap();
        let stale = config.output_dir.join("notes.txt");
        std::fs::write(&stale, "previous run").unwrap();

        let report = run_pipeline_with(config.clone(), refuse_removal).await.unwrap();

        assert!(matches!(report.reset, DirReset::DeleteFailed(_)));
        assert_eq!(report.predictions.len(), 1);
        assert!(stale.is_file());
        assert!(config.submission_path.is_file());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_delete_is_logged_as_a_warning() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        std::fs::create_dir_all(&config.output_dir).unwrap();

        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let reset = tracing::subscriber::with_default(subscriber, || {
            reset_output_dir(&config, refuse_removal).unwrap()
        });

        assert!(reset.is_failure());
        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"), "{output}");
        assert!(output.contains("read-only mount"), "{output}");
        assert!(output.contains("Continuing with the existing contents"), "{output}");
    }

    #[tokio::test]
    async fn standalone_commands_reuse_the_checkpoint() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        write_csv(
            &config.data.train_path,
            "STORY,SECTION",
            &[
                "Government passes new bill,0",
                "New phone launched today,1",
                "The film launched,2",
                "Market shares announced,3",
            ],
        );
        write_csv(&config.data.test_path, "STORY", &["Election results announced", "New film"]);

        let report = run_pipeline(config.clone()).await.unwrap();

        let evaluated = run_evaluate(config.clone()).await.unwrap();
        assert_eq!(evaluated.global_step, report.train.global_step);
        assert_eq!(evaluated.metrics.num_examples, report.eval.metrics.num_examples);

        let predicted = run_predict(config.clone(), Vec::new()).await.unwrap();
        assert_eq!(predicted, report.predictions);

        let single = run_predict(config, vec!["New phone".to_string()]).await.unwrap();
        assert_eq!(single.len(), 1);
    }

    #[tokio::test]
    async fn evaluate_without_checkpoint_fails() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        write_csv(&config.data.train_path, "STORY,SECTION", &["New phone,1", "New bill,0"]);
        write_csv(&config.data.test_path, "STORY", &["News"]);

        let err = run_evaluate(config).await.unwrap_err();
        assert!(err.to_string().contains("no checkpoint"));
    }

    #[test]
    fn split_is_reproducible_across_loads() {
        let root = tempfile::tempdir().unwrap();
        let config = run_config(root.path());
        let rows: Vec<String> = (0..20).map(|i| format!("story number {i},{}", i % 4)).collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        write_csv(&config.data.train_path, "STORY,SECTION", &refs);
        write_csv(&config.data.test_path, "STORY", &["News"]);

        let a = load_datasets(&config.data, &config.training).unwrap();
        let b = load_datasets(&config.data, &config.training).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.validation, b.validation);
        assert_eq!(a.train.len() + a.validation.len(), 20);
        assert_eq!(a.validation.len(), 4);
        assert!(a.validation.iter().all(|v| a.train.iter().all(|t| t.text_a != v.text_a)));
        assert_eq!(a.train[0].guid.as_deref(), Some("train-0"));
        assert_eq!(a.validation[3].guid.as_deref(), Some("dev-3"));
    }

    #[test]
    fn sequence_longer_than_positions_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        write_tiny_artifact(root.path()).unwrap();
        let artifact = ModelArtifact::from_dir(root.path()).unwrap();
        let config = TrainingConfig::default().with_max_seq_length(512);

        let err = build_classifier(&artifact, &config, &Device::Cpu, false).err().unwrap();
        assert!(err.to_string().contains("exceeds"));
    }
}
