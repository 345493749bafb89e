//! Per-sample dose-response curves ready for fitting.

use crate::data::{AssayRecord, AssayTable};
use crate::error::{Result, TiterError};
use crate::transform::continuity::{corrected_logit, dose_per_ml};
use serde::{Deserialize, Serialize};

/// Whether a sample shows any variation in CPE across its dilutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpeVariation {
    /// No well shows CPE at any dilution.
    AllNegative,
    /// Every well shows CPE at every dilution.
    AllPositive,
    /// At least one dilution is partially or differently positive.
    Varied,
}

/// Transformed observations of one sample, sorted by ascending dose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCurve {
    /// Sample identifier.
    pub sample_id: String,
    /// log10 of the dose per mL.
    pub log_dose: Vec<f64>,
    /// Logit of the continuity-corrected CPE fraction.
    pub logit: Vec<f64>,
    /// Observed CPE fraction.
    pub fraction: Vec<f64>,
    /// Wells with CPE.
    pub cpe: Vec<f64>,
    /// Wells inoculated.
    pub replicates: Vec<f64>,
    /// Lowest tested dose per mL (lower detection limit).
    pub lower_limit: f64,
    /// Highest tested dose per mL (upper detection limit).
    pub upper_limit: f64,
}

impl ResponseCurve {
    /// Transform the records of one sample.
    pub fn from_records(sample_id: &str, records: &[&AssayRecord], volume_ml: f64) -> Result<Self> {
        if records.is_empty() {
            return Err(TiterError::EmptyData(format!(
                "No records for sample '{}'",
                sample_id
            )));
        }
        if !(volume_ml.is_finite() && volume_ml > 0.0) {
            return Err(TiterError::InvalidParameter(format!(
                "Volume must be positive, got {} mL",
                volume_ml
            )));
        }

        let mut points: Vec<(f64, &AssayRecord)> = records
            .iter()
            .map(|r| (dose_per_ml(r.dilution, volume_ml), *r))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let lower_limit = points[0].0;
        let upper_limit = points[points.len() - 1].0;

        Ok(Self {
            sample_id: sample_id.to_string(),
            log_dose: points.iter().map(|(d, _)| d.log10()).collect(),
            logit: points
                .iter()
                .map(|(_, r)| corrected_logit(r.cpe, r.replicates))
                .collect(),
            fraction: points.iter().map(|(_, r)| r.fraction()).collect(),
            cpe: points.iter().map(|(_, r)| r.cpe as f64).collect(),
            replicates: points.iter().map(|(_, r)| r.replicates as f64).collect(),
            lower_limit,
            upper_limit,
        })
    }

    /// Number of observations.
    pub fn n_points(&self) -> usize {
        self.log_dose.len()
    }

    /// Number of distinct tested doses.
    pub fn n_distinct_doses(&self) -> usize {
        let mut n = 0;
        let mut last: Option<f64> = None;
        for &d in &self.log_dose {
            if last.map_or(true, |l| (d - l).abs() > 1e-12) {
                n += 1;
            }
            last = Some(d);
        }
        n
    }

    /// Classify whether the CPE readout varies across dilutions.
    pub fn variation(&self) -> CpeVariation {
        if self.cpe.iter().all(|&c| c == 0.0) {
            CpeVariation::AllNegative
        } else if self
            .cpe
            .iter()
            .zip(self.replicates.iter())
            .all(|(c, n)| c == n)
        {
            CpeVariation::AllPositive
        } else {
            CpeVariation::Varied
        }
    }

    /// Range of log10 doses covered by the sample.
    pub fn log_dose_range(&self) -> (f64, f64) {
        (self.lower_limit.log10(), self.upper_limit.log10())
    }
}

/// Build one curve per sample, in table order.
pub fn build_curves(table: &AssayTable, volume_ml: f64) -> Result<Vec<ResponseCurve>> {
    table
        .sample_ids()
        .iter()
        .map(|sid| ResponseCurve::from_records(sid, &table.records_for(sid), volume_ml))
        .collect()
}
