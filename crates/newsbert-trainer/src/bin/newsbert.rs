//! Newsbert command line
//!
//! Fine-tunes BERT on the news category table, evaluates the latest
//! checkpoint, or predicts categories for new sentences.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use newsbert_core::{ExportFormat, ModelLocation, ModelSource};
use newsbert_trainer::{RunConfig, run_evaluate, run_pipeline, run_predict};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsbert")]
#[command(about = "Fine-tune BERT to classify news stories into four sections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON run configuration; flags below override its fields
    #[arg(short, long, env = "NEWSBERT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Hub repository or local directory of the pretrained encoder
    #[arg(short, long, env = "NEWSBERT_MODEL", global = true)]
    model: Option<String>,

    /// Hub revision to pin
    #[arg(long, global = true)]
    revision: Option<String>,

    /// Labeled training table
    #[arg(long, global = true)]
    train: Option<PathBuf>,

    /// Unlabeled test table
    #[arg(long, global = true)]
    test: Option<PathBuf>,

    /// Checkpoint and summary directory
    #[arg(short, long, env = "NEWSBERT_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Delete the output directory before training
    #[arg(long, global = true)]
    delete: bool,

    /// Destination of the exported predictions
    #[arg(short, long, global = true)]
    submission: Option<PathBuf>,

    /// Write label ids (`index`) or section names (`name`)
    #[arg(long, global = true)]
    export_format: Option<ExportFormat>,

    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[arg(long, global = true)]
    epochs: Option<f64>,

    #[arg(long, global = true)]
    learning_rate: Option<f64>,

    #[arg(long, global = true)]
    max_seq_length: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, evaluate and export test predictions
    Run,
    /// Evaluate the latest checkpoint on the validation split
    Evaluate,
    /// Predict sentences, or the test table when none are given
    Predict {
        /// Sentence to classify; repeatable
        #[arg(long = "sentence")]
        sentences: Vec<String>,
    },
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(model) = &self.model {
            let prefix = config.model.weight_prefix.clone();
            let path = PathBuf::from(model);
            config.model = if path.is_dir() {
                ModelSource::local(path)
            } else {
                let revision = self.revision.as_deref().unwrap_or_else(|| {
                    warn!("No --revision given for {model}; following its moving `main` branch");
                    "main"
                });
                ModelSource::hub(model.as_str(), revision)
            }
            .with_weight_prefix(prefix);
        } else if let (Some(revision), ModelLocation::Hub { repo, .. }) =
            (&self.revision, &config.model.location)
        {
            config.model = ModelSource::hub(repo.as_str(), revision.as_str())
                .with_weight_prefix(config.model.weight_prefix.clone());
        }

        if let Some(path) = &self.train {
            config.data.train_path = path.clone();
        }
        if let Some(path) = &self.test {
            config.data.test_path = path.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(path) = &self.submission {
            config.submission_path = path.clone();
        }
        if let Some(format) = self.export_format {
            config.export_format = format;
        }
        config.do_delete |= self.delete;

        let mut training = config.training;
        if let Some(batch_size) = self.batch_size {
            training = training.with_batch_size(batch_size);
        }
        if let Some(epochs) = self.epochs {
            training = training.with_num_train_epochs(epochs);
        }
        if let Some(lr) = self.learning_rate {
            training = training.with_learning_rate(lr);
        }
        if let Some(len) = self.max_seq_length {
            training = training.with_max_seq_length(len);
        }
        config.training = training;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.run_config()?;

    match cli.command {
        Commands::Run => {
            let report = run_pipeline(config).await?;
            info!(
                "Finished at step {}: accuracy {:.4}, {} test predictions",
                report.train.global_step,
                report.eval.metrics.accuracy,
                report.predictions.len()
            );
        }
        Commands::Evaluate => {
            let report = run_evaluate(config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Predict { sentences } => {
            let explicit = !sentences.is_empty();
            let predictions = run_predict(config, sentences).await?;
            if explicit {
                for p in &predictions {
                    println!("{}\t{} ({:.3})", p.label_name, p.sentence, p.confidence());
                }
            }
        }
    }

    Ok(())
}
