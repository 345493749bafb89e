//! Dose-response models fitted per sample.

pub mod binomial;
pub mod lm;

pub use binomial::{fit_binomial, fit_binomial_with_config, GlmConfig, GlmFit};
pub use lm::{fit_logit_ols, LogitFit};

use crate::error::Result;
use crate::transform::{expit, CpeVariation, ResponseCurve};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Which model turns a response curve into a fitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// OLS on continuity-corrected logits.
    #[default]
    Logit,
    /// Binomial GLM on raw counts weighted by replicates.
    BinomialGlm,
}

impl FitMethod {
    /// Name used in result files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Logit => "logit",
            Self::BinomialGlm => "binomial_glm",
        }
    }

    /// Parse a name written by [`FitMethod::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "logit" => Some(Self::Logit),
            "binomial_glm" => Some(Self::BinomialGlm),
            _ => None,
        }
    }

    /// Fit a curve with this method.
    pub fn fit(&self, curve: &ResponseCurve, glm: &GlmConfig) -> Result<CurveFit> {
        match self {
            Self::Logit => fit_logit_ols(curve).map(|f| f.to_curve_fit()),
            Self::BinomialGlm => fit_binomial_with_config(curve, glm).map(|f| f.to_curve_fit()),
        }
    }
}

/// Outcome of attempting to fit one sample.
#[derive(Debug, Clone)]
pub enum FitOutcome {
    /// A line was fitted.
    Fitted(CurveFit),
    /// CPE does not vary; no fit is attempted.
    Constant(CpeVariation),
    /// Fewer than two distinct dilutions.
    Insufficient,
}

impl FitOutcome {
    /// The fitted line, if any.
    pub fn fit(&self) -> Option<&CurveFit> {
        match self {
            Self::Fitted(f) => Some(f),
            _ => None,
        }
    }
}

/// Fit a curve unless its readout is degenerate.
///
/// Constant readouts and single-dilution samples are data conditions, not errors.
pub fn fit_curve(method: FitMethod, curve: &ResponseCurve, glm: &GlmConfig) -> Result<FitOutcome> {
    match curve.variation() {
        CpeVariation::Varied => {}
        constant => {
            debug!("Sample '{}' not fitted: {:?}", curve.sample_id, constant);
            return Ok(FitOutcome::Constant(constant));
        }
    }
    if curve.n_distinct_doses() < 2 {
        debug!("Sample '{}' has a single dilution", curve.sample_id);
        return Ok(FitOutcome::Insufficient);
    }
    let fit = method.fit(curve, glm)?;
    debug!(
        "Sample '{}' fitted with {}: intercept={:.4}, slope={:.4}",
        curve.sample_id, method, fit.intercept, fit.slope
    );
    Ok(FitOutcome::Fitted(fit))
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Method-independent summary of a fitted line `logit(p) = intercept + slope * log10(dose)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFit {
    pub sample_id: String,
    pub method: FitMethod,
    pub intercept: f64,
    pub slope: f64,
    pub intercept_se: f64,
    pub slope_se: f64,
    /// Covariance between intercept and slope.
    pub covariance: f64,
    pub df_residual: usize,
    /// OLS only.
    pub r_squared: Option<f64>,
    /// GLM only.
    pub deviance: Option<f64>,
    pub converged: bool,
}

impl CurveFit {
    /// Fitted logit at a log10 dose.
    pub fn predict_logit(&self, log_dose: f64) -> f64 {
        self.intercept + self.slope * log_dose
    }

    /// Fitted CPE probability at a log10 dose.
    pub fn predict_response(&self, log_dose: f64) -> f64 {
        expit(self.predict_logit(log_dose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AssayRecord;

    #[test]
    fn test_method_names_roundtrip() {
        for m in [FitMethod::Logit, FitMethod::BinomialGlm] {
            assert_eq!(FitMethod::from_name(m.name()), Some(m));
        }
        assert_eq!(FitMethod::from_name("probit"), None);
    }

    #[test]
    fn test_both_methods_agree_on_direction() {
        let recs: Vec<AssayRecord> = [(10.0, 8), (100.0, 6), (1000.0, 2), (10000.0, 0)]
            .iter()
            .map(|&(d, c)| AssayRecord::new("S", d, c, 8).unwrap())
            .collect();
        let refs: Vec<&AssayRecord> = recs.iter().collect();
        let curve = ResponseCurve::from_records("S", &refs, 1.0).unwrap();

        let ols = FitMethod::Logit.fit(&curve, &GlmConfig::default()).unwrap();
        let glm = FitMethod::BinomialGlm.fit(&curve, &GlmConfig::default()).unwrap();

        assert!(ols.slope < 0.0 && glm.slope < 0.0);
        assert!(ols.predict_response(1.0) > 0.5);
        assert!(glm.predict_response(4.0) < 0.5);
    }

    #[test]
    fn test_fit_curve_outcomes() {
        let build = |rows: &[(f64, u32)]| {
            let recs: Vec<AssayRecord> = rows
                .iter()
                .map(|&(d, c)| AssayRecord::new("S", d, c, 4).unwrap())
                .collect();
            let refs: Vec<&AssayRecord> = recs.iter().collect();
            ResponseCurve::from_records("S", &refs, 1.0).unwrap()
        };
        let glm = GlmConfig::default();

        let neg = fit_curve(FitMethod::Logit, &build(&[(10.0, 0), (100.0, 0)]), &glm).unwrap();
        assert!(matches!(neg, FitOutcome::Constant(CpeVariation::AllNegative)));

        let pos = fit_curve(FitMethod::Logit, &build(&[(10.0, 4), (100.0, 4)]), &glm).unwrap();
        assert!(matches!(pos, FitOutcome::Constant(CpeVariation::AllPositive)));

        let single = fit_curve(FitMethod::Logit, &build(&[(10.0, 1), (10.0, 3)]), &glm).unwrap();
        assert!(matches!(single, FitOutcome::Insufficient));
        assert!(single.fit().is_none());

        let varied = build(&[(10.0, 4), (100.0, 2), (1000.0, 0)]);
        let ok = fit_curve(FitMethod::BinomialGlm, &varied, &glm).unwrap();
        assert!(ok.fit().is_some());
    }
}
