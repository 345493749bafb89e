//! Analysis runner: transform, fit, and classify every sample of an assay.

use crate::data::{
    AssayTable, DecimalSeparator, InputSource, SampleSheet, TiterResult, TiterResultSet,
};
use crate::endpoint::{endpoint_for_outcome, infer_endpoint, MarginPolicy};
use crate::error::{Result, TiterError};
use crate::model::{fit_curve, FitMethod, FitOutcome, GlmConfig};
use crate::transform::{build_curves, volume_ml, ResponseCurve};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Default inoculum volume per well in microlitres.
pub const DEFAULT_VOLUME_UL: f64 = 10.0;

/// Default confidence level for endpoint intervals.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Analysis configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Name of the analysis.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Inoculum volume per well (µL).
    pub volume_ul: f64,
    /// Regression model.
    pub method: FitMethod,
    /// Decimal separator of the input data.
    pub decimal: DecimalSeparator,
    /// IRLS settings for the binomial GLM.
    pub glm: GlmConfig,
    /// Chart placement of out-of-range samples.
    pub margin: MarginPolicy,
    /// Confidence level of the endpoint interval.
    pub confidence_level: f64,
    /// Sample-sheet column attached to each result.
    pub group_column: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "tcid50".to_string(),
            description: None,
            volume_ul: DEFAULT_VOLUME_UL,
            method: FitMethod::default(),
            decimal: DecimalSeparator::default(),
            glm: GlmConfig::default(),
            margin: MarginPolicy::default(),
            confidence_level: DEFAULT_CONFIDENCE,
            group_column: None,
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(TiterError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(TiterError::from)
    }
}

/// Everything produced by one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// One result per sample, in input order.
    pub results: TiterResultSet,
    /// Transformed observations, aligned with `results`.
    pub curves: Vec<ResponseCurve>,
    /// Fit outcomes, aligned with `results`.
    pub outcomes: Vec<FitOutcome>,
}

impl AnalysisOutput {
    /// Curve and outcome of one sample.
    pub fn sample(&self, sample_id: &str) -> Option<(&TiterResult, &ResponseCurve, &FitOutcome)> {
        let i = self.results.iter().position(|r| r.sample_id == sample_id)?;
        Some((&self.results.results[i], &self.curves[i], &self.outcomes[i]))
    }
}

/// Builder for configuring and running a titer analysis.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    config: AnalysisConfig,
}

impl Analysis {
    /// Create an analysis with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a config.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Set the analysis name.
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    /// Set the inoculum volume per well in µL.
    pub fn volume_ul(mut self, volume_ul: f64) -> Self {
        self.config.volume_ul = volume_ul;
        self
    }

    /// Select the regression model.
    pub fn method(mut self, method: FitMethod) -> Self {
        self.config.method = method;
        self
    }

    /// Set the decimal separator used when loading input.
    pub fn decimal(mut self, decimal: DecimalSeparator) -> Self {
        self.config.decimal = decimal;
        self
    }

    /// Set IRLS settings for the binomial GLM.
    pub fn glm(mut self, glm: GlmConfig) -> Self {
        self.config.glm = glm;
        self
    }

    /// Set the margin policy for out-of-range samples.
    pub fn margin(mut self, margin: MarginPolicy) -> Self {
        self.config.margin = margin;
        self
    }

    /// Set the confidence level of endpoint intervals.
    pub fn confidence_level(mut self, level: f64) -> Self {
        self.config.confidence_level = level;
        self
    }

    /// Attach a sample-sheet column to each result.
    pub fn group_column(mut self, column: &str) -> Self {
        self.config.group_column = Some(column.to_string());
        self
    }

    /// Current settings.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> AnalysisConfig {
        AnalysisConfig {
            description: description.map(String::from),
            ..self.config.clone()
        }
    }

    /// Load an input source with the configured decimal separator and run.
    pub fn run_source(
        &self,
        source: &InputSource,
        sheet: Option<&SampleSheet>,
    ) -> Result<AnalysisOutput> {
        let table = source.load(self.config.decimal)?;
        self.run(&table, sheet)
    }

    /// Run the analysis on an assay table.
    pub fn run(&self, table: &AssayTable, sheet: Option<&SampleSheet>) -> Result<AnalysisOutput> {
        let cfg = &self.config;
        let volume = volume_ml(cfg.volume_ul)?;
        let groups = self.group_labels(table, sheet)?;

        info!(
            "Running '{}' on {} samples ({} rows), method={}, volume={} µL",
            cfg.name,
            table.n_samples(),
            table.n_records(),
            cfg.method,
            cfg.volume_ul
        );

        let curves = build_curves(table, volume)?;
        let mut results = Vec::with_capacity(curves.len());
        let mut outcomes = Vec::with_capacity(curves.len());

        for curve in &curves {
            let outcome = fit_curve(cfg.method, curve, &cfg.glm)?;
            let group = groups.as_ref().and_then(|g| g.get(&curve.sample_id).cloned());
            let result = self.summarise(curve, &outcome, group)?;

            if let Some(msg) = &result.message {
                warn!("Sample '{}': {}", result.sample_id, msg);
            } else if result.outside_detection {
                warn!(
                    "Sample '{}': endpoint {} ({:.3e} TCID50/mL extrapolated)",
                    result.sample_id,
                    result.status,
                    result.tcid50_per_ml.unwrap_or(f64::NAN)
                );
            }
            if !result.converged {
                warn!("Sample '{}': binomial fit did not converge", result.sample_id);
            }

            results.push(result);
            outcomes.push(outcome);
        }

        let results = TiterResultSet::new(cfg.method, results);
        info!("Finished: {} within range of {}", results.summary().within_range, results.len());

        Ok(AnalysisOutput {
            results,
            curves,
            outcomes,
        })
    }

    fn group_labels(
        &self,
        table: &AssayTable,
        sheet: Option<&SampleSheet>,
    ) -> Result<Option<HashMap<String, String>>> {
        let (column, sheet) = match (&self.config.group_column, sheet) {
            (Some(c), Some(s)) => (c, s),
            (Some(c), None) => {
                return Err(TiterError::InvalidParameter(format!(
                    "Group column '{}' requested without a sample sheet",
                    c
                )))
            }
            (None, _) => return Ok(None),
        };

        let missing = sheet.missing_samples(table.sample_ids());
        if !missing.is_empty() {
            warn!("{} samples missing from sample sheet: {:?}", missing.len(), missing);
        }
        sheet.labels(column).map(Some)
    }

    fn summarise(
        &self,
        curve: &ResponseCurve,
        outcome: &FitOutcome,
        group: Option<String>,
    ) -> Result<TiterResult> {
        let cfg = &self.config;
        let endpoint =
            endpoint_for_outcome(outcome, curve.lower_limit, curve.upper_limit, &cfg.margin);

        let fit = outcome.fit();
        let inference = match fit {
            Some(f) => Some(infer_endpoint(f, cfg.confidence_level)?),
            None => None,
        };
        let finite = |x: f64| if x.is_finite() { Some(x) } else { None };

        if let Some(f) = fit {
            debug!(
                "Sample '{}': log10 TCID50/mL = {:?}, status = {}",
                f.sample_id, endpoint.log10_titer, endpoint.status
            );
        }

        Ok(TiterResult {
            sample_id: curve.sample_id.clone(),
            method: cfg.method,
            n_dilutions: curve.n_points(),
            intercept: fit.map(|f| f.intercept),
            slope: fit.map(|f| f.slope),
            intercept_stderr: fit.and_then(|f| finite(f.intercept_se)),
            slope_stderr: fit.and_then(|f| finite(f.slope_se)),
            r_squared: fit.and_then(|f| f.r_squared),
            deviance: fit.and_then(|f| f.deviance),
            slope_p_value: inference.as_ref().and_then(|i| finite(i.slope_p_value)),
            lower_limit: curve.lower_limit,
            upper_limit: curve.upper_limit,
            tcid50_per_ml: endpoint.titer_per_ml,
            log10_tcid50: endpoint.log10_titer,
            ci_low: inference.as_ref().and_then(|i| finite(i.ci_low)),
            ci_high: inference.as_ref().and_then(|i| finite(i.ci_high)),
            status: endpoint.status,
            outside_detection: endpoint.status.is_outside(),
            plot_titer_per_ml: endpoint.plot_titer_per_ml,
            message: endpoint.message,
            group,
            converged: fit.map_or(true, |f| f.converged),
        })
    }
}

/// Convenience function to run the default logit analysis.
pub fn estimate_titers(table: &AssayTable, volume_ul: f64) -> Result<TiterResultSet> {
    Analysis::new()
        .volume_ul(volume_ul)
        .run(table, None)
        .map(|out| out.results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{DetectionStatus, MSG_ALL_NEGATIVE, MSG_ALL_POSITIVE};
    use approx::assert_relative_eq;

    const ASSAY: &str = "ID\tDilution\tCPE\tReplicates
A\t10\t8\t8
A\t100\t8\t8
A\t1000\t5\t8
A\t10000\t1\t8
A\t100000\t0\t8
B\t10\t0\t8
B\t100\t0\t8
B\t1000\t0\t8
C\t10\t8\t8
C\t100\t8\t8
C\t1000\t8\t8
";

    fn table() -> AssayTable {
        AssayTable::from_tsv_str(ASSAY, DecimalSeparator::Dot).unwrap()
    }

    #[test]
    fn test_default_config() {
        let cfg = AnalysisConfig::default();
        assert_relative_eq!(cfg.volume_ul, 10.0);
        assert_eq!(cfg.method, FitMethod::Logit);
        assert_relative_eq!(cfg.margin.below_factor, 0.8);
        assert_relative_eq!(cfg.margin.above_factor, 1.2);
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let analysis = Analysis::new()
            .name("plate 3")
            .volume_ul(50.0)
            .method(FitMethod::BinomialGlm)
            .decimal(DecimalSeparator::Comma)
            .group_column("virus");

        let yaml = analysis.to_config(Some("Test analysis")).to_yaml().unwrap();
        let parsed = AnalysisConfig::from_yaml(&yaml).unwrap();

        assert_eq!(parsed.name, "plate 3");
        assert_eq!(parsed.description.as_deref(), Some("Test analysis"));
        assert_relative_eq!(parsed.volume_ul, 50.0);
        assert_eq!(parsed.method, FitMethod::BinomialGlm);
        assert_eq!(parsed.decimal, DecimalSeparator::Comma);
        assert_eq!(parsed.group_column.as_deref(), Some("virus"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let cfg = AnalysisConfig::from_yaml("method: binomial_glm\nvolume_ul: 100\n").unwrap();
        assert_eq!(cfg.method, FitMethod::BinomialGlm);
        assert_relative_eq!(cfg.volume_ul, 100.0);
        assert_relative_eq!(cfg.confidence_level, 0.95);
        assert_eq!(cfg.name, "tcid50");
    }

    #[test]
    fn test_run_classifies_samples() {
        let out = Analysis::new().run(&table(), None).unwrap();
        assert_eq!(out.results.len(), 3);
        assert_eq!(out.curves.len(), 3);

        let a = out.results.get("A").unwrap();
        assert_eq!(a.status, DetectionStatus::WithinRange);
        assert!(a.slope.unwrap() < 0.0);
        assert!(a.tcid50_per_ml.is_some());
        assert!(a.ci_low.unwrap() < a.log10_tcid50.unwrap());
        assert!(a.ci_high.unwrap() > a.log10_tcid50.unwrap());

        let b = out.results.get("B").unwrap();
        assert_eq!(b.status, DetectionStatus::BelowDetectionLimit);
        assert!(b.tcid50_per_ml.is_none());
        assert!(b.slope.is_none());
        assert_eq!(b.message.as_deref(), Some(MSG_ALL_NEGATIVE));
        // 10 / 0.01 mL = 1000 per mL, placed at 0.8x
        assert_relative_eq!(b.lower_limit, 1000.0, epsilon = 1e-9);
        assert_relative_eq!(b.plot_titer_per_ml.unwrap(), 800.0, epsilon = 1e-9);

        let c = out.results.get("C").unwrap();
        assert_eq!(c.status, DetectionStatus::AboveDetectionLimit);
        assert_eq!(c.message.as_deref(), Some(MSG_ALL_POSITIVE));
        assert_relative_eq!(c.plot_titer_per_ml.unwrap(), 1.2e5, max_relative = 1e-12);
    }

    #[test]
    fn test_volume_scales_titer() {
        let t = table();
        let small = Analysis::new().volume_ul(10.0).run(&t, None).unwrap();
        let large = Analysis::new().volume_ul(100.0).run(&t, None).unwrap();

        let s = small.results.get("A").unwrap().log10_tcid50.unwrap();
        let l = large.results.get("A").unwrap().log10_tcid50.unwrap();
        assert_relative_eq!(s - l, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_volume() {
        assert!(Analysis::new().volume_ul(0.0).run(&table(), None).is_err());
    }

    #[test]
    fn test_group_column_requires_sheet() {
        let err = Analysis::new().group_column("virus").run(&table(), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_group_labels_attached() {
        let csv = "ID,virus\nA,HSV\nB,HSV\nC,VZV\n";
        let sheet = SampleSheet::from_reader(csv.as_bytes(), b',').unwrap();
        let out = Analysis::new()
            .group_column("virus")
            .run(&table(), Some(&sheet))
            .unwrap();
        assert_eq!(out.results.get("A").unwrap().group.as_deref(), Some("HSV"));
        assert_eq!(out.results.get("C").unwrap().group.as_deref(), Some("VZV"));
    }

    #[test]
    fn test_sample_lookup() {
        let out = Analysis::new().method(FitMethod::BinomialGlm).run(&table(), None).unwrap();
        let (res, curve, outcome) = out.sample("A").unwrap();
        assert_eq!(res.method, FitMethod::BinomialGlm);
        assert_eq!(curve.n_points(), 5);
        assert!(outcome.fit().is_some());
        assert!(res.deviance.is_some());
        assert!(out.sample("missing").is_none());
    }

    #[test]
    fn test_estimate_titers() {
        let set = estimate_titers(&table(), 10.0).unwrap();
        assert_eq!(set.method, FitMethod::Logit);
        assert_eq!(set.summary().within_range, 1);
    }
}
