//! Optional sample sheet describing each sample (group, virus, passage...).

use crate::data::assay::COL_ID;
use crate::data::source::InputFormat;
use crate::error::{Result, TiterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A sample sheet value, either categorical or continuous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Label used in charts and result files.
    pub fn label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }
}

/// Type of a sample sheet column, inferred on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

/// Per-sample annotations keyed by sample ID.
#[derive(Debug, Clone, Default)]
pub struct SampleSheet {
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    data: HashMap<String, HashMap<String, Variable>>,
    column_types: HashMap<String, VariableType>,
}

impl SampleSheet {
    /// Load a sample sheet from a `.csv` or `.tsv` file.
    ///
    /// The key column is `ID` (case-insensitive) or, failing that, the first
    /// column. Columns are continuous if every non-missing value parses as a
    /// number, otherwise categorical.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match InputFormat::from_path(path)? {
            InputFormat::Csv => b',',
            InputFormat::Tsv => b'\t',
            InputFormat::Xlsx => {
                return Err(TiterError::InvalidParameter(format!(
                    "Sample sheets must be .csv or .tsv: {}",
                    path.display()
                )))
            }
        };
        Self::from_reader(File::open(path)?, delimiter)
    }

    /// Parse a delimited sample sheet.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        if header.len() < 2 {
            return Err(TiterError::EmptyData(
                "Sample sheet must have at least one column besides the ID".to_string(),
            ));
        }
        let key_idx = header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(COL_ID))
            .unwrap_or(0);
        let column_names: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != key_idx)
            .map(|(_, h)| h.clone())
            .collect();

        // First pass: collect raw values to infer types
        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let sample_id = record.get(key_idx).unwrap_or("").to_string();
            if sample_id.is_empty() {
                continue;
            }
            let values: Vec<String> = (0..header.len())
                .filter(|i| *i != key_idx)
                .map(|i| record.get(i).unwrap_or("").to_string())
                .collect();
            raw_data.push((sample_id, values));
        }

        if raw_data.is_empty() {
            return Err(TiterError::EmptyData("No samples in sample sheet".to_string()));
        }

        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = raw_data.iter().all(|(_, values)| {
                let v = values[col_idx].trim();
                is_missing(v) || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        let mut sample_ids = Vec::new();
        let mut data = HashMap::new();
        for (sample_id, values) in raw_data {
            let mut sample_data = HashMap::new();
            for (col_idx, col_name) in column_names.iter().enumerate() {
                let raw = values[col_idx].trim();
                let var = if is_missing(raw) {
                    Variable::Missing
                } else {
                    match column_types.get(col_name) {
                        Some(VariableType::Continuous) => raw
                            .parse::<f64>()
                            .map(Variable::Continuous)
                            .unwrap_or(Variable::Missing),
                        Some(VariableType::Categorical) | None => {
                            Variable::Categorical(raw.to_string())
                        }
                    }
                };
                sample_data.insert(col_name.clone(), var);
            }
            if data.insert(sample_id.clone(), sample_data).is_none() {
                sample_ids.push(sample_id);
            }
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
            column_types,
        })
    }

    /// Sample IDs in file order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Annotation column names (excluding the ID column).
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Get a value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }

    /// Get the inferred type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Group label of every sample for one column.
    pub fn labels(&self, column: &str) -> Result<HashMap<String, String>> {
        if !self.has_column(column) {
            return Err(TiterError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .filter_map(|sid| {
                self.get(sid, column)
                    .and_then(Variable::label)
                    .map(|l| (sid.clone(), l))
            })
            .collect())
    }

    /// IDs of assay samples that have no sample sheet entry.
    pub fn missing_samples<'a>(&self, sample_ids: &'a [String]) -> Vec<&'a str> {
        sample_ids
            .iter()
            .filter(|sid| !self.data.contains_key(sid.as_str()))
            .map(|s| s.as_str())
            .collect()
    }
}

fn is_missing(v: &str) -> bool {
    v.is_empty() || v == "NA" || v == "na"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn create_test_tsv() -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "ID\tgroup\tpassage").unwrap();
        writeln!(file, "1\twildtype\t3").unwrap();
        writeln!(file, "2\tmutant\t4").unwrap();
        writeln!(file, "3\twildtype\tNA").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_sample_sheet() {
        let file = create_test_tsv();
        let sheet = SampleSheet::from_path(file.path()).unwrap();

        assert_eq!(sheet.n_samples(), 3);
        assert_eq!(sheet.column_names(), &["group", "passage"]);
        assert_eq!(
            sheet.get("2", "group"),
            Some(&Variable::Categorical("mutant".to_string()))
        );
        assert_eq!(sheet.get("1", "passage"), Some(&Variable::Continuous(3.0)));
        assert_eq!(sheet.get("3", "passage"), Some(&Variable::Missing));
    }

    #[test]
    fn test_column_type_inference() {
        let file = create_test_tsv();
        let sheet = SampleSheet::from_path(file.path()).unwrap();

        assert_eq!(sheet.column_type("group"), Some(VariableType::Categorical));
        assert_eq!(sheet.column_type("passage"), Some(VariableType::Continuous));
    }

    #[test]
    fn test_labels() {
        let file = create_test_tsv();
        let sheet = SampleSheet::from_path(file.path()).unwrap();

        let labels = sheet.labels("group").unwrap();
        assert_eq!(labels.get("3").map(String::as_str), Some("wildtype"));
        assert!(sheet.labels("virus").is_err());
    }

    #[test]
    fn test_key_column_not_first() {
        let text = "group,ID\nA,s1\nB,s2\n";
        let sheet = SampleSheet::from_reader(text.as_bytes(), b',').unwrap();
        assert_eq!(sheet.sample_ids(), &["s1", "s2"]);
        assert_eq!(sheet.get("s2", "group"), Some(&Variable::Categorical("B".to_string())));
    }

    #[test]
    fn test_missing_samples() {
        let text = "ID,group\ns1,A\n";
        let sheet = SampleSheet::from_reader(text.as_bytes(), b',').unwrap();
        let ids = vec!["s1".to_string(), "s2".to_string()];
        assert_eq!(sheet.missing_samples(&ids), vec!["s2"]);
    }
}
