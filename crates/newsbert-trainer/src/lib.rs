//! # Newsbert Trainer
//!
//! Fine-tuning driver for the news category classifier in `newsbert-core`.
//! The [`Estimator`] trains, evaluates and predicts through one forward
//! function, writing checkpoints and step summaries under the output
//! directory; [`run_pipeline`] wires it to the tabular inputs and the
//! submission export.

pub mod checkpoint;
pub mod config;
pub mod estimator;
pub mod input;
pub mod optimizer;
pub mod output_dir;
pub mod pipeline;
pub mod summary;

pub use checkpoint::{CHECKPOINT_INDEX, Checkpoint, CheckpointIndex, CheckpointStore};
pub use config::{RUN_CONFIG_FILE, RunConfig};
pub use estimator::{EVAL_RESULTS_FILE, EvalReport, Estimator, Job, JobOutput, TrainReport, model_fn};
pub use input::{TrainingStream, sequential_batches};
pub use optimizer::{BertAdamW, clip_by_global_norm, excluded_from_decay};
pub use output_dir::{DirReset, prepare_output_dir};
pub use pipeline::{
    Datasets, PipelineReport, Session, build_classifier, load_datasets, run_evaluate, run_pipeline,
    run_pipeline_with, run_predict, select_device,
};
pub use summary::{SUMMARY_FILE, SummaryWriter, TrainingSummary, read_summaries};
