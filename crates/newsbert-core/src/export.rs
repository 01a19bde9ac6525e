//! # Prediction Export
//!
//! Writes one predicted category per test sentence to a single-column
//! CSV file or workbook, in input order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_xlsxwriter::{Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::is_workbook;
use crate::error::{NewsbertError, Result};
use crate::labels::NewsCategory;
use crate::model::argmax;

/// Header of the exported column.
pub const SUBMISSION_COLUMN: &str = "SECTION";

/// Inference output for one sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub sentence: String,
    /// Per-class log-probabilities in label order.
    pub log_probs: Vec<f32>,
    pub label_index: usize,
    pub label_name: String,
}

impl PredictionResult {
    /// Pair a sentence with its log-probabilities, deriving the label.
    pub fn from_log_probs(sentence: impl Into<String>, log_probs: Vec<f32>) -> Result<Self> {
        let label_index = argmax(&log_probs);
        let category = NewsCategory::from_index(label_index).ok_or(NewsbertError::LabelOutOfRange {
            label: label_index as i64,
        })?;

        Ok(Self {
            sentence: sentence.into(),
            log_probs,
            label_index,
            label_name: category.name().to_string(),
        })
    }

    /// Probability of the predicted class.
    pub fn confidence(&self) -> f32 {
        self.log_probs
            .get(self.label_index)
            .map(|lp| lp.exp())
            .unwrap_or(0.0)
    }
}

/// How a predicted category is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Integer label id, as the training file labels it.
    #[default]
    Index,
    /// Display name such as `Technology`.
    Name,
}

impl ExportFormat {
    fn cell(&self, prediction: &PredictionResult) -> String {
        match self {
            ExportFormat::Index => prediction.label_index.to_string(),
            ExportFormat::Name => prediction.label_name.clone(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Index => write!(f, "index"),
            ExportFormat::Name => write!(f, "name"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = NewsbertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "index" => Ok(ExportFormat::Index),
            "name" => Ok(ExportFormat::Name),
            other => Err(NewsbertError::InvalidConfig(format!(
                "unknown export format {other:?} (expected \"index\" or \"name\")"
            ))),
        }
    }
}

/// Write `predictions` to `path`, replacing any previous file.
///
/// A workbook extension (`.xlsx`) produces a spreadsheet, anything else a
/// CSV file. The rows go to a sibling temporary file that is renamed into
/// place once complete, so a failed export never leaves a truncated
/// submission.
pub fn export_predictions<P: AsRef<Path>>(
    path: P,
    predictions: &[PredictionResult],
    format: ExportFormat,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| NewsbertError::io(parent, e))?;
    }

    let tmp = temporary_sibling(path);
    let written = if is_workbook(path) {
        write_workbook(&tmp, predictions, format)
    } else {
        write_csv(&tmp, predictions, format)
    }
    .and_then(|()| std::fs::rename(&tmp, path).map_err(|e| NewsbertError::io(path, e)));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    info!(
        "Exported {} predictions ({}) to {}",
        predictions.len(),
        format,
        path.display()
    );
    Ok(())
}

fn write_csv(tmp: &Path, predictions: &[PredictionResult], format: ExportFormat) -> Result<()> {
    let mut writer = csv::Writer::from_path(tmp)?;
    writer.write_record([SUBMISSION_COLUMN])?;
    for prediction in predictions {
        writer.write_record([format.cell(prediction)])?;
    }
    writer.flush().map_err(|e| NewsbertError::io(tmp, e))
}

/// Indices are written as numbers, names as strings.
fn write_workbook(tmp: &Path, predictions: &[PredictionResult], format: ExportFormat) -> Result<()> {
    let xlsx = |e: XlsxError| NewsbertError::WorkbookWrite(e.to_string());

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, SUBMISSION_COLUMN).map_err(xlsx)?;
    for (i, prediction) in predictions.iter().enumerate() {
        let row = u32::try_from(i + 1)
            .map_err(|_| NewsbertError::WorkbookWrite(format!("row {} exceeds the sheet", i + 1)))?;
        match format {
            ExportFormat::Index => sheet.write_number(row, 0, prediction.label_index as f64),
            ExportFormat::Name => sheet.write_string(row, 0, prediction.label_name.as_str()),
        }
        .map_err(xlsx)?;
    }

    let bytes = workbook.save_to_buffer().map_err(xlsx)?;
    std::fs::write(tmp, bytes).map_err(|e| NewsbertError::io(tmp, e))
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
