//! Dilution / CPE assay records.

use crate::error::{Result, TiterError};
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Header names recognised for the four required columns (case-insensitive).
pub const COL_ID: &str = "ID";
pub const COL_DILUTION: &str = "Dilution";
pub const COL_CPE: &str = "CPE";
pub const COL_REPLICATES: &str = "Replicates";

/// Decimal separator used for numeric fields in delimited text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DecimalSeparator {
    /// `1.5`
    #[default]
    #[serde(rename = ".")]
    Dot,
    /// `1,5`
    #[serde(rename = ",")]
    Comma,
}

impl DecimalSeparator {
    /// Parse a separator from its character form.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "." => Some(Self::Dot),
            "," => Some(Self::Comma),
            _ => None,
        }
    }

    /// The separator character.
    pub fn symbol(&self) -> char {
        match self {
            Self::Dot => '.',
            Self::Comma => ',',
        }
    }

    /// Field delimiter for CSV files written with this decimal separator.
    ///
    /// Comma-decimal locales use `;` between fields.
    pub fn csv_delimiter(&self) -> u8 {
        match self {
            Self::Dot => b',',
            Self::Comma => b';',
        }
    }

    /// Parse a floating-point number honouring the separator.
    pub fn parse_number(&self, raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            Self::Dot => trimmed.parse::<f64>().ok(),
            Self::Comma => trimmed.replace(',', ".").parse::<f64>().ok(),
        }
    }
}

/// One row of the assay: a single dilution of a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssayRecord {
    /// Sample identifier.
    pub sample_id: String,
    /// Dilution factor (e.g. 1000 for a 1:1000 dilution).
    pub dilution: f64,
    /// Number of wells showing cytopathic effect.
    pub cpe: u32,
    /// Number of wells inoculated at this dilution.
    pub replicates: u32,
}

impl AssayRecord {
    /// Create a validated record.
    pub fn new(sample_id: &str, dilution: f64, cpe: u32, replicates: u32) -> Result<Self> {
        if !(dilution.is_finite() && dilution > 0.0) {
            return Err(TiterError::InvalidParameter(format!(
                "Dilution must be positive for sample '{}', got {}",
                sample_id, dilution
            )));
        }
        if replicates == 0 {
            return Err(TiterError::InvalidParameter(format!(
                "Replicates must be at least 1 for sample '{}'",
                sample_id
            )));
        }
        if cpe > replicates {
            return Err(TiterError::InvalidParameter(format!(
                "CPE count {} exceeds replicates {} for sample '{}'",
                cpe, replicates, sample_id
            )));
        }
        Ok(Self {
            sample_id: sample_id.to_string(),
            dilution,
            cpe,
            replicates,
        })
    }

    /// Observed fraction of wells with CPE.
    pub fn fraction(&self) -> f64 {
        self.cpe as f64 / self.replicates as f64
    }
}

/// All assay records of one run, with samples in first-appearance order.
#[derive(Debug, Clone)]
pub struct AssayTable {
    records: Vec<AssayRecord>,
    sample_ids: Vec<String>,
}

impl AssayTable {
    /// Build a table from records.
    pub fn new(records: Vec<AssayRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(TiterError::EmptyData("No assay records".to_string()));
        }
        let mut sample_ids: Vec<String> = Vec::new();
        for r in &records {
            if !sample_ids.iter().any(|s| s == &r.sample_id) {
                sample_ids.push(r.sample_id.clone());
            }
        }
        Ok(Self {
            records,
            sample_ids,
        })
    }

    /// Load a comma-separated file.
    ///
    /// With [`DecimalSeparator::Comma`] the field delimiter is `;`.
    pub fn from_csv<P: AsRef<Path>>(path: P, decimal: DecimalSeparator) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_delimited_reader(file, decimal.csv_delimiter(), decimal)
    }

    /// Load a tab-separated file.
    pub fn from_tsv<P: AsRef<Path>>(path: P, decimal: DecimalSeparator) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_delimited_reader(file, b'\t', decimal)
    }

    /// Parse tab-separated text, e.g. pasted from a spreadsheet.
    pub fn from_tsv_str(text: &str, decimal: DecimalSeparator) -> Result<Self> {
        Self::from_delimited_reader(text.as_bytes(), b'\t', decimal)
    }

    /// Parse delimited text with a header row.
    pub fn from_delimited_reader<R: Read>(
        reader: R,
        delimiter: u8,
        decimal: DecimalSeparator,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }
        Self::from_string_rows(&header, rows, decimal)
    }

    /// Load the first worksheet of an `.xlsx` workbook.
    pub fn from_xlsx<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| TiterError::EmptyData("Workbook has no worksheets".to_string()))??;

        let mut rows = range.rows();
        let header: Vec<String> = rows
            .next()
            .ok_or_else(|| TiterError::EmptyData("Empty worksheet".to_string()))?
            .iter()
            .map(cell_to_string)
            .collect();
        let body: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        // Spreadsheet cells carry native numbers, so the separator is always '.'.
        Self::from_string_rows(&header, body, DecimalSeparator::Dot)
    }

    fn from_string_rows(
        header: &[String],
        rows: Vec<Vec<String>>,
        decimal: DecimalSeparator,
    ) -> Result<Self> {
        let find = |name: &str| -> Result<usize> {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| TiterError::MissingColumn(name.to_string()))
        };
        let id_col = find(COL_ID)?;
        let dil_col = find(COL_DILUTION)?;
        let cpe_col = find(COL_CPE)?;
        let rep_col = find(COL_REPLICATES)?;

        let mut records = Vec::with_capacity(rows.len());
        for (row_idx, fields) in rows.iter().enumerate() {
            if fields.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let row = row_idx + 1;
            let field = |col: usize| fields.get(col).map(|s| s.trim()).unwrap_or("");

            let sample_id = field(id_col);
            if sample_id.is_empty() {
                return Err(TiterError::InvalidValue {
                    value: String::new(),
                    row,
                    column: COL_ID.to_string(),
                });
            }
            let dilution = decimal.parse_number(field(dil_col)).ok_or_else(|| {
                TiterError::InvalidValue {
                    value: field(dil_col).to_string(),
                    row,
                    column: COL_DILUTION.to_string(),
                }
            })?;
            let cpe = parse_count(field(cpe_col), decimal, row, COL_CPE)?;
            let replicates = parse_count(field(rep_col), decimal, row, COL_REPLICATES)?;

            let record = AssayRecord::new(sample_id, dilution, cpe, replicates).map_err(|_| {
                TiterError::InvalidValue {
                    value: format!(
                        "Dilution={}, CPE={}, Replicates={}",
                        field(dil_col),
                        field(cpe_col),
                        field(rep_col)
                    ),
                    row,
                    column: format!("{}/{}/{}", COL_DILUTION, COL_CPE, COL_REPLICATES),
                }
            })?;
            records.push(record);
        }

        Self::new(records)
    }

    /// All records in input order.
    pub fn records(&self) -> &[AssayRecord] {
        &self.records
    }

    /// Sample IDs in first-appearance order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of distinct samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of records.
    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    /// Records belonging to one sample.
    pub fn records_for(&self, sample_id: &str) -> Vec<&AssayRecord> {
        self.records
            .iter()
            .filter(|r| r.sample_id == sample_id)
            .collect()
    }
}

/// Parse a well count. Spreadsheets often store counts as `8.0`.
fn parse_count(raw: &str, decimal: DecimalSeparator, row: usize, column: &str) -> Result<u32> {
    let invalid = || TiterError::InvalidValue {
        value: raw.to_string(),
        row,
        column: column.to_string(),
    };
    let value = decimal.parse_number(raw).ok_or_else(invalid)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(invalid());
    }
    Ok(value as u32)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Integral floats become plain integers so numeric sample IDs read as "1", not "1.0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}
