//! # Estimator
//!
//! Owns the classifier parameters and runs one of three jobs against them:
//! training for a fixed number of steps, evaluation over a labeled split,
//! or prediction over unlabeled sentences. Every job goes through
//! [`model_fn`]; the mode is an explicit argument, never shared state.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use candle_core::Device;
use candle_nn::VarMap;
use newsbert_core::{
    Classifier, EncodedFeature, EvalMetrics, FeatureBatch, MetricsAccumulator, Mode, ModelOutput,
    PredictionResult, TextEncoder, TrainingConfig, WarmupLinearDecay,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::input::{TrainingStream, sequential_batches};
use crate::optimizer::BertAdamW;
use crate::summary::{SummaryWriter, TrainingSummary};

/// Evaluation results inside the output directory.
pub const EVAL_RESULTS_FILE: &str = "eval_results.json";

/// The one forward function shared by all three modes.
pub fn model_fn<E: TextEncoder>(
    classifier: &Classifier<E>,
    batch: &FeatureBatch,
    mode: Mode,
) -> Result<ModelOutput> {
    classifier
        .forward(batch, mode)
        .with_context(|| format!("{mode:?} forward pass failed"))
}

/// A unit of work for [`Estimator::run`].
pub enum Job<'a> {
    Train(&'a [EncodedFeature]),
    Eval(&'a [EncodedFeature]),
    Predict {
        sentences: &'a [String],
        features: &'a [EncodedFeature],
    },
}

pub enum JobOutput {
    Trained(TrainReport),
    Evaluated(EvalReport),
    Predicted(Vec<PredictionResult>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Step reached when training stopped.
    pub global_step: usize,
    /// Steps taken by this call; zero when resuming a finished run.
    pub steps_run: usize,
    pub num_train_steps: usize,
    pub num_warmup_steps: usize,
    pub final_loss: Option<f32>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub global_step: usize,
    #[serde(flatten)]
    pub metrics: EvalMetrics,
}

pub struct Estimator<E: TextEncoder> {
    classifier: Classifier<E>,
    varmap: VarMap,
    config: TrainingConfig,
    device: Device,
    output_dir: PathBuf,
    checkpoints: CheckpointStore,
    global_step: usize,
    /// Whether the in-memory parameters already reflect the latest checkpoint.
    synced: bool,
}

impl<E: TextEncoder> Estimator<E> {
    /// `varmap` must hold every trainable variable of `classifier`.
    pub fn new(
        classifier: Classifier<E>,
        varmap: VarMap,
        config: TrainingConfig,
        output_dir: impl Into<PathBuf>,
        device: Device,
    ) -> Self {
        let output_dir = output_dir.into();
        Self {
            checkpoints: CheckpointStore::new(&output_dir, config.keep_checkpoint_max),
            classifier,
            varmap,
            config,
            device,
            output_dir,
            global_step: 0,
            synced: false,
        }
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    #[cfg(test)]
    pub(crate) fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn run(&mut self, job: Job<'_>) -> Result<JobOutput> {
        match job {
            Job::Train(features) => self.train(features).map(JobOutput::Trained),
            Job::Eval(features) => self.evaluate(features).map(JobOutput::Evaluated),
            Job::Predict {
                sentences,
                features,
            } => self.predict(sentences, features).map(JobOutput::Predicted),
        }
    }

    /// Load the newest checkpoint once, if the output directory has one.
    fn restore_latest(&mut self) -> Result<()> {
        if self.synced {
            return Ok(());
        }
        if let Some(checkpoint) = self.checkpoints.latest()? {
            self.checkpoints
                .restore(&self.varmap, &checkpoint, &self.device)?;
            self.global_step = checkpoint.step;
        }
        self.synced = true;
        Ok(())
    }

    fn stack(&self, features: &[&EncodedFeature]) -> Result<FeatureBatch> {
        FeatureBatch::stack(features, self.config.max_seq_length, &self.device)
            .context("features do not match the configured sequence length")
    }

    /// Train until `⌊n / batch_size × epochs⌋` steps have been taken,
    /// counting steps restored from an earlier checkpoint.
    pub fn train(&mut self, features: &[EncodedFeature]) -> Result<TrainReport> {
        self.restore_latest()?;

        let total = self.config.num_train_steps(features.len());
        let warmup = self.config.num_warmup_steps(total);
        let schedule = WarmupLinearDecay::new(self.config.learning_rate, warmup, total);

        info!("***** Running training *****");
        info!("  Num examples = {}", features.len());
        info!("  Batch size = {}", self.config.batch_size);
        info!("  Num steps = {total} ({warmup} warmup)");

        let started = Instant::now();
        let start_step = self.global_step;
        if start_step >= total && start_step > 0 {
            info!("Checkpoint at step {start_step} already covers {total} steps");
        }

        let mut stream = TrainingStream::new(
            features.len(),
            self.config.batch_size,
            self.config.shuffle_seed,
        );
        stream.skip(start_step.min(total));

        let mut optimizer = BertAdamW::new(&self.varmap, &self.config)?;
        let mut summaries = SummaryWriter::open(&self.output_dir)?;
        let mut last_saved = self.checkpoints.latest()?.map(|c| c.step);
        let mut final_loss = None;
        let mut window = (Instant::now(), start_step);

        while self.global_step < total {
            let indices = stream.next_batch();
            let refs: Vec<&EncodedFeature> = indices.iter().map(|&i| &features[i]).collect();
            let batch = self.stack(&refs)?;

            let lr = schedule.lr_at(self.global_step);
            let output = model_fn(&self.classifier, &batch, Mode::Train)?;
            let loss = output
                .loss
                .as_ref()
                .ok_or_else(|| anyhow!("training pass produced no loss"))?;
            let loss_value = output.loss_value()?.unwrap_or(f32::NAN);
            if !loss_value.is_finite() {
                bail!("loss is {loss_value} at step {}", self.global_step);
            }

            optimizer.backward_step(loss, lr)?;
            self.global_step += 1;
            final_loss = Some(loss_value);
            let step = self.global_step;

            if step % self.config.save_summary_steps == 0 {
                let elapsed = window.0.elapsed().as_secs_f64().max(f64::EPSILON);
                summaries.write(&TrainingSummary {
                    step,
                    loss: loss_value,
                    learning_rate: lr,
                    steps_per_sec: (step - window.1) as f64 / elapsed,
                })?;
                window = (Instant::now(), step);
            }

            if step % self.config.save_checkpoints_steps == 0 || step == total {
                self.checkpoints.save(&self.varmap, step)?;
                last_saved = Some(step);
            }
        }

        if last_saved != Some(self.global_step) {
            self.checkpoints.save(&self.varmap, self.global_step)?;
        }

        let elapsed = started.elapsed();
        info!(
            "Training took {:.2?} ({} steps, {} full passes, loss {:?})",
            elapsed,
            self.global_step - start_step,
            stream.pass(),
            final_loss
        );

        Ok(TrainReport {
            global_step: self.global_step,
            steps_run: self.global_step - start_step,
            num_train_steps: total,
            num_warmup_steps: warmup,
            final_loss,
            elapsed,
        })
    }

    /// Score every labeled feature once, keeping the final short batch.
    pub fn evaluate(&mut self, features: &[EncodedFeature]) -> Result<EvalReport> {
        self.restore_latest()?;
        info!("***** Running evaluation *****");
        info!("  Num examples = {}", features.len());

        let mut accumulator = MetricsAccumulator::new();
        for range in sequential_batches(features.len(), self.config.batch_size) {
            let refs: Vec<&EncodedFeature> = features[range].iter().collect();
            let batch = self.stack(&refs)?;
            let output = model_fn(&self.classifier, &batch, Mode::Eval)?;

            let labels: Vec<usize> = refs.iter().map(|f| f.label_id as usize).collect();
            let predictions = output.predicted_labels()?;
            let loss = output.loss_value()?.unwrap_or(0.0);
            accumulator.update(&labels, &predictions, f64::from(loss));
        }

        let report = EvalReport {
            global_step: self.global_step,
            metrics: accumulator.finish(),
        };
        self.write_eval_results(&report)?;

        info!("***** Eval results *****");
        info!("  global_step = {}", report.global_step);
        info!("  eval_accuracy = {:.4}", report.metrics.accuracy);
        info!("  loss = {:.4}", report.metrics.loss);
        info!("  true_positives = {}", report.metrics.totals.true_positives);
        info!("  true_negatives = {}", report.metrics.totals.true_negatives);
        info!("  false_positives = {}", report.metrics.totals.false_positives);
        info!("  false_negatives = {}", report.metrics.totals.false_negatives);
        for class in &report.metrics.per_class {
            info!(
                "  {:<13} precision = {:.4}, recall = {:.4}",
                class.category.name(),
                class.counts.precision(),
                class.counts.recall()
            );
        }
        Ok(report)
    }

    fn write_eval_results(&self, report: &EvalReport) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join(EVAL_RESULTS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Log-probabilities and predicted category for each sentence.
    ///
    /// `features[i]` must encode `sentences[i]`; their labels are ignored.
    pub fn predict(
        &mut self,
        sentences: &[String],
        features: &[EncodedFeature],
    ) -> Result<Vec<PredictionResult>> {
        if sentences.len() != features.len() {
            bail!(
                "{} sentences but {} encoded features",
                sentences.len(),
                features.len()
            );
        }
        self.restore_latest()?;

        let mut results = Vec::with_capacity(sentences.len());
        for range in sequential_batches(features.len(), self.config.batch_size) {
            let refs: Vec<&EncodedFeature> = features[range.clone()].iter().collect();
            let batch = self.stack(&refs)?;
            let output = model_fn(&self.classifier, &batch, Mode::Predict)?;

            for (sentence, row) in sentences[range].iter().zip(output.log_prob_rows()?) {
                results.push(PredictionResult::from_log_probs(sentence.as_str(), row)?);
            }
        }
        info!("Predicted {} sentences", results.len());
        Ok(results)
    }
}
