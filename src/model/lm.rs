//! Ordinary least squares on the logit-transformed response.

use crate::error::{Result, TiterError};
use crate::model::{CurveFit, FitMethod};
use crate::transform::ResponseCurve;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Result of regressing `logit ~ log10(dose)` for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogitFit {
    /// Sample identifier.
    pub sample_id: String,
    /// `[intercept, slope]`.
    pub coefficients: Vec<f64>,
    /// Standard errors of the coefficients.
    pub std_errors: Vec<f64>,
    /// Covariance between intercept and slope estimates.
    pub covariance: f64,
    /// Residuals.
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// Residual standard error (sigma).
    pub sigma: f64,
    /// R-squared.
    pub r_squared: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
}

impl LogitFit {
    /// Intercept on the logit scale.
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Change in logit per log10 unit of dose.
    pub fn slope(&self) -> f64 {
        self.coefficients[1]
    }

    /// Summarise as a method-independent curve fit.
    pub fn to_curve_fit(&self) -> CurveFit {
        CurveFit {
            sample_id: self.sample_id.clone(),
            method: FitMethod::Logit,
            intercept: self.intercept(),
            slope: self.slope(),
            intercept_se: self.std_errors[0],
            slope_se: self.std_errors[1],
            covariance: self.covariance,
            df_residual: self.df_residual,
            r_squared: Some(self.r_squared),
            deviance: None,
            converged: true,
        }
    }
}

/// Design matrix `[1, log10(dose)]` for a curve.
pub(crate) fn design_matrix(log_dose: &[f64]) -> DMatrix<f64> {
    let n = log_dose.len();
    DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { log_dose[i] })
}

/// Fit the continuity-corrected logit against log10 dose by OLS.
///
/// Needs at least two distinct doses. With exactly two observations the fit
/// is saturated and standard errors are NaN.
pub fn fit_logit_ols(curve: &ResponseCurve) -> Result<LogitFit> {
    let n_obs = curve.n_points();
    if curve.n_distinct_doses() < 2 {
        return Err(TiterError::Numerical(format!(
            "Sample '{}' needs at least two distinct dilutions for a fit",
            curve.sample_id
        )));
    }

    let x = design_matrix(&curve.log_dose);
    let y = DVector::from_column_slice(&curve.logit);

    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.try_inverse().ok_or_else(|| {
        TiterError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })?;

    // Coefficients: beta = (X'X)^-1 X'y
    let beta = &xtx_inv * (x.transpose() * &y);
    let coefficients: Vec<f64> = beta.iter().cloned().collect();

    let y_hat = &x * &beta;
    let residuals: Vec<f64> = (&y - &y_hat).iter().cloned().collect();
    let rss: f64 = residuals.iter().map(|e| e * e).sum();

    let df_residual = n_obs.saturating_sub(2);
    let sigma = if df_residual > 0 {
        (rss / df_residual as f64).sqrt()
    } else {
        f64::NAN
    };

    // SE = sigma * sqrt(diag((X'X)^-1))
    let std_errors: Vec<f64> = (0..2).map(|j| sigma * xtx_inv[(j, j)].sqrt()).collect();
    let covariance = sigma * sigma * xtx_inv[(0, 1)];

    let y_mean = curve.logit.iter().sum::<f64>() / n_obs as f64;
    let tss: f64 = curve.logit.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    Ok(LogitFit {
        sample_id: curve.sample_id.clone(),
        coefficients,
        std_errors,
        covariance,
        residuals,
        sigma,
        r_squared,
        df_residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AssayRecord;
    use approx::assert_relative_eq;

    fn curve(rows: &[(f64, u32, u32)]) -> ResponseCurve {
        let recs: Vec<AssayRecord> = rows
            .iter()
            .map(|&(d, c, n)| AssayRecord::new("S1", d, c, n).unwrap())
            .collect();
        let refs: Vec<&AssayRecord> = recs.iter().collect();
        ResponseCurve::from_records("S1", &refs, 1.0).unwrap()
    }

    #[test]
    fn test_fit_matches_closed_form() {
        let c = curve(&[(10.0, 8, 8), (100.0, 6, 8), (1000.0, 3, 8), (10000.0, 0, 8)]);
        let fit = fit_logit_ols(&c).unwrap();

        // Closed-form simple regression
        let n = c.n_points() as f64;
        let mx = c.log_dose.iter().sum::<f64>() / n;
        let my = c.logit.iter().sum::<f64>() / n;
        let sxy: f64 = c
            .log_dose
            .iter()
            .zip(&c.logit)
            .map(|(x, y)| (x - mx) * (y - my))
            .sum();
        let sxx: f64 = c.log_dose.iter().map(|x| (x - mx).powi(2)).sum();
        let slope = sxy / sxx;

        assert_relative_eq!(fit.slope(), slope, epsilon = 1e-10);
        assert_relative_eq!(fit.intercept(), my - slope * mx, epsilon = 1e-10);
        assert!(fit.slope() < 0.0);
        assert_eq!(fit.df_residual, 2);
    }

    #[test]
    fn test_fit_std_errors() {
        let c = curve(&[
            (10.0, 8, 8),
            (100.0, 7, 8),
            (1000.0, 2, 8),
            (10000.0, 1, 8),
            (100000.0, 0, 8),
        ]);
        let fit = fit_logit_ols(&c).unwrap();

        assert!(fit.std_errors.iter().all(|se| se.is_finite() && *se > 0.0));
        assert!(fit.r_squared > 0.8 && fit.r_squared <= 1.0);
        assert!(fit.slope() / fit.std_errors[1] < -1.0);
        assert_eq!(fit.residuals.len(), 5);
    }

    #[test]
    fn test_saturated_fit() {
        let c = curve(&[(10.0, 6, 8), (100.0, 2, 8)]);
        let fit = fit_logit_ols(&c).unwrap();
        assert_eq!(fit.df_residual, 0);
        assert!(fit.std_errors[1].is_nan());
    }

    #[test]
    fn test_single_dilution_rejected() {
        let c = curve(&[(10.0, 6, 8), (10.0, 5, 8)]);
        assert!(fit_logit_ols(&c).is_err());
    }

    #[test]
    fn test_to_curve_fit() {
        let c = curve(&[(10.0, 8, 8), (100.0, 4, 8), (1000.0, 0, 8)]);
        let fit = fit_logit_ols(&c).unwrap().to_curve_fit();
        assert_eq!(fit.method, FitMethod::Logit);
        assert!(fit.r_squared.is_some());
        assert!(fit.deviance.is_none());
        assert!(fit.converged);
    }
}
