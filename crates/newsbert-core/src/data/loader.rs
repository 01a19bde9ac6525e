//! Loading story tables, either spreadsheet workbooks or CSV exports.

use std::io::Cursor;
use std::path::Path;

use calamine::Reader;
use csv::ReaderBuilder;
use tracing::info;

use crate::error::{NewsbertError, Result};
use crate::labels::NewsCategory;

/// Extensions read as workbooks; anything else is parsed as CSV.
const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// One record of an input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Free-text story.
    pub story: String,
    /// Category label id; `None` for unlabeled tables.
    pub section: Option<usize>,
}

/// Load a labeled table with a text and an integer label column.
pub fn load_labeled<P: AsRef<Path>>(
    path: P,
    text_column: &str,
    label_column: &str,
) -> Result<Vec<RawRow>> {
    let path = path.as_ref();
    let table = Table::read(path)?;
    let text_idx = table.column_index(text_column, path)?;
    let label_idx = table.column_index(label_column, path)?;

    let mut rows = Vec::with_capacity(table.rows.len());
    for (i, record) in table.rows.iter().enumerate() {
        let section = parse_label(cell(record, label_idx), i + 1)?;
        rows.push(RawRow {
            story: cell(record, text_idx).to_string(),
            section: Some(section),
        });
    }

    info!("Loaded {} labeled rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Load an unlabeled table; only the text column is read.
pub fn load_unlabeled<P: AsRef<Path>>(path: P, text_column: &str) -> Result<Vec<RawRow>> {
    let path = path.as_ref();
    let table = Table::read(path)?;
    let text_idx = table.column_index(text_column, path)?;

    let rows: Vec<RawRow> = table
        .rows
        .iter()
        .map(|record| RawRow {
            story: cell(record, text_idx).to_string(),
            section: None,
        })
        .collect();

    info!("Loaded {} unlabeled rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Whether `path` names a spreadsheet workbook rather than a CSV file.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WORKBOOK_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)))
}

/// Header row plus data rows, every cell rendered as text.
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| NewsbertError::io(path, e))?;
        if is_workbook(path) {
            Self::from_workbook(bytes, path)
        } else {
            Self::from_csv(&bytes)
        }
    }

    fn from_csv(bytes: &[u8]) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// First worksheet only; integer-valued cells render without a fraction.
    fn from_workbook(bytes: Vec<u8>, path: &Path) -> Result<Self> {
        let unreadable = |message: String| NewsbertError::Workbook {
            path: path.to_path_buf(),
            message,
        };
        let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| unreadable(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| unreadable("workbook has no worksheets".to_string()))?
            .map_err(|e| unreadable(e.to_string()))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(|c| c.to_string()).collect::<Vec<String>>());
        let headers = rows.next().unwrap_or_default();
        Ok(Self {
            headers,
            rows: rows.collect(),
        })
    }

    fn column_index(&self, column: &str, path: &Path) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
            .ok_or_else(|| NewsbertError::MissingColumn {
                column: column.to_string(),
                path: path.to_path_buf(),
            })
    }
}

fn cell(record: &[String], idx: usize) -> &str {
    record.get(idx).map(String::as_str).unwrap_or("")
}

/// Parse a label cell. Spreadsheet exports may render integers as `2.0`.
fn parse_label(value: &str, row: usize) -> Result<usize> {
    let trimmed = value.trim();
    let label = match trimmed.parse::<i64>() {
        Ok(v) => v,
        Err(_) => match trimmed.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && v.is_finite() => v as i64,
            _ => {
                return Err(NewsbertError::InvalidLabel {
                    row,
                    value: value.to_string(),
                });
            }
        },
    };

    usize::try_from(label)
        .ok()
        .filter(|&l| NewsCategory::from_index(l).is_some())
        .ok_or(NewsbertError::LabelOutOfRange { label })
}
