//! Result types for titer estimation.

use crate::endpoint::DetectionStatus;
use crate::error::{Result, TiterError};
use crate::model::FitMethod;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Titer estimate for a single sample.
///
/// Coefficients are `None` for samples that were not fitted (constant CPE or
/// a single dilution). Titers are `None` whenever no finite endpoint exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiterResult {
    /// Sample identifier.
    pub sample_id: String,
    /// Model used for the fit.
    pub method: FitMethod,
    /// Number of rows (dilutions) for the sample.
    pub n_dilutions: usize,
    pub intercept: Option<f64>,
    pub slope: Option<f64>,
    pub intercept_stderr: Option<f64>,
    pub slope_stderr: Option<f64>,
    /// OLS only.
    pub r_squared: Option<f64>,
    /// GLM only.
    pub deviance: Option<f64>,
    /// Two-sided Wald p-value for a zero slope.
    pub slope_p_value: Option<f64>,
    /// Lowest tested dose per mL.
    pub lower_limit: f64,
    /// Highest tested dose per mL.
    pub upper_limit: f64,
    pub tcid50_per_ml: Option<f64>,
    pub log10_tcid50: Option<f64>,
    /// Lower bound of the 95% interval on log10 TCID50/mL.
    pub ci_low: Option<f64>,
    /// Upper bound of the 95% interval on log10 TCID50/mL.
    pub ci_high: Option<f64>,
    pub status: DetectionStatus,
    pub outside_detection: bool,
    /// Chart position: the titer, or the margin-policy placement.
    pub plot_titer_per_ml: Option<f64>,
    pub message: Option<String>,
    /// Sample-sheet group label.
    pub group: Option<String>,
    /// Whether the fit converged (always true for OLS).
    pub converged: bool,
}

impl TiterResult {
    /// Whether a numeric titer was estimated.
    pub fn has_titer(&self) -> bool {
        self.tcid50_per_ml.is_some()
    }

    /// Whether the sample was fitted.
    pub fn is_fitted(&self) -> bool {
        self.slope.is_some()
    }
}

/// Collection of titer results from one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiterResultSet {
    /// Method used to generate these results.
    pub method: FitMethod,
    /// Individual results, in input order.
    pub results: Vec<TiterResult>,
}

impl TiterResultSet {
    /// Create a new result set.
    pub fn new(method: FitMethod, results: Vec<TiterResult>) -> Self {
        Self { method, results }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Look up one sample.
    pub fn get(&self, sample_id: &str) -> Option<&TiterResult> {
        self.results.iter().find(|r| r.sample_id == sample_id)
    }

    /// Iterate over results.
    pub fn iter(&self) -> impl Iterator<Item = &TiterResult> {
        self.results.iter()
    }

    /// Results outside the detection limits.
    pub fn outside_detection(&self) -> Vec<&TiterResult> {
        self.results.iter().filter(|r| r.outside_detection).collect()
    }

    /// Count results per detection status.
    pub fn summary(&self) -> ResultSummary {
        let count = |s: DetectionStatus| self.results.iter().filter(|r| r.status == s).count();
        ResultSummary {
            total: self.len(),
            within_range: count(DetectionStatus::WithinRange),
            below_detection_limit: count(DetectionStatus::BelowDetectionLimit),
            above_detection_limit: count(DetectionStatus::AboveDetectionLimit),
            undetermined: count(DetectionStatus::Undetermined),
            not_converged: self.results.iter().filter(|r| !r.converged).count(),
        }
    }

    /// Write results as CSV. Missing values are left empty.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }

    /// Write results as CSV to any writer.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for r in &self.results {
            wtr.serialize(r)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reload a CSV written by [`TiterResultSet::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_csv(file)
    }

    /// Read results from any CSV reader.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let results = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<TiterResult>, csv::Error>>()?;

        let method = match results.first() {
            Some(r) => r.method,
            None => return Err(TiterError::EmptyData("Result file has no rows".to_string())),
        };
        if results.iter().any(|r| r.method != method) {
            return Err(TiterError::InvalidParameter(
                "Result file mixes fit methods".to_string(),
            ));
        }

        Ok(Self { method, results })
    }

    /// Write results as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Status counts for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub within_range: usize,
    pub below_detection_limit: usize,
    pub above_detection_limit: usize,
    pub undetermined: usize,
    pub not_converged: usize,
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Samples analysed:        {}", self.total)?;
        writeln!(f, "Within range:            {}", self.within_range)?;
        writeln!(f, "Below detection limit:   {}", self.below_detection_limit)?;
        writeln!(f, "Above detection limit:   {}", self.above_detection_limit)?;
        writeln!(f, "Undetermined:            {}", self.undetermined)?;
        if self.not_converged > 0 {
            writeln!(f, "Fits not converged:      {}", self.not_converged)?;
        }
        Ok(())
    }
}
