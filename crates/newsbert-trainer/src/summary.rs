//! Training summaries as JSON lines.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SUMMARY_FILE: &str = "summaries.jsonl";

/// One summary record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub step: usize,
    pub loss: f32,
    pub learning_rate: f64,
    pub steps_per_sec: f64,
}

/// Appends [`TrainingSummary`] records to `<dir>/summaries.jsonl`.
pub struct SummaryWriter {
    path: PathBuf,
    file: File,
}

impl SummaryWriter {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(SUMMARY_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, summary: &TrainingSummary) -> Result<()> {
        let mut line = serde_json::to_string(summary)?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        info!(
            "global_step = {}, loss = {:.4}, learning_rate = {:.3e}, global_step/sec: {:.3}",
            summary.step, summary.loss, summary.learning_rate, summary.steps_per_sec
        );
        Ok(())
    }
}

/// Read back every summary in `dir`.
pub fn read_summaries(dir: &Path) -> Result<Vec<TrainingSummary>> {
    let path = dir.join(SUMMARY_FILE);
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("malformed summary line"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::open(dir.path()).unwrap();
        for step in [100, 200] {
            writer
                .write(&TrainingSummary {
                    step,
                    loss: 1.25,
                    learning_rate: 2e-5,
                    steps_per_sec: 3.5,
                })
                .unwrap();
        }

        let summaries = read_summaries(dir.path()).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].step, 200);
        assert_eq!(summaries[0].learning_rate, 2e-5);
    }

    #[test]
    fn reopening_keeps_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let record = TrainingSummary {
            step: 1,
            loss: 0.5,
            learning_rate: 0.0,
            steps_per_sec: 1.0,
        };
        SummaryWriter::open(dir.path()).unwrap().write(&record).unwrap();
        SummaryWriter::open(dir.path()).unwrap().write(&record).unwrap();
        assert_eq!(read_summaries(dir.path()).unwrap().len(), 2);
    }
}
