//! Wald inference on the slope and a delta-method interval on the endpoint.

use crate::endpoint::log10_dose_50;
use crate::error::{Result, TiterError};
use crate::model::{CurveFit, FitMethod};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Uncertainty of a fitted endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInference {
    /// Wald statistic of the slope (t for OLS, z for the GLM).
    pub slope_statistic: f64,
    /// Two-sided p-value for slope = 0.
    pub slope_p_value: f64,
    /// Standard error of log10 TCID50/mL.
    pub log10_titer_se: f64,
    /// Lower confidence bound of log10 TCID50/mL.
    pub ci_low: f64,
    /// Upper confidence bound of log10 TCID50/mL.
    pub ci_high: f64,
    /// Confidence level of the interval.
    pub level: f64,
}

/// Reference distribution for Wald statistics of a fit.
enum Reference {
    StudentsT(StudentsT),
    Normal(Normal),
}

impl Reference {
    fn for_fit(fit: &CurveFit) -> Result<Option<Self>> {
        match fit.method {
            FitMethod::Logit => {
                if fit.df_residual == 0 {
                    return Ok(None);
                }
                let t = StudentsT::new(0.0, 1.0, fit.df_residual as f64)
                    .map_err(|e| TiterError::Numerical(format!("t distribution: {}", e)))?;
                Ok(Some(Self::StudentsT(t)))
            }
            FitMethod::BinomialGlm => {
                let normal = Normal::new(0.0, 1.0)
                    .map_err(|e| TiterError::Numerical(format!("normal distribution: {}", e)))?;
                Ok(Some(Self::Normal(normal)))
            }
        }
    }

    fn cdf(&self, x: f64) -> f64 {
        match self {
            Self::StudentsT(d) => d.cdf(x),
            Self::Normal(d) => d.cdf(x),
        }
    }

    fn quantile(&self, p: f64) -> f64 {
        match self {
            Self::StudentsT(d) => d.inverse_cdf(p),
            Self::Normal(d) => d.inverse_cdf(p),
        }
    }
}

/// Slope test and endpoint interval for a fitted curve.
///
/// The endpoint variance uses the delta method on `x50 = -intercept / slope`:
/// `Var(x50) = [Var(a) + 2 x50 Cov(a, b) + x50² Var(b)] / b²`.
///
/// Saturated OLS fits and flat lines give NaN statistics rather than errors.
pub fn infer_endpoint(fit: &CurveFit, level: f64) -> Result<EndpointInference> {
    if !(level > 0.0 && level < 1.0) {
        return Err(TiterError::InvalidParameter(format!(
            "Confidence level must be in (0, 1), got {}",
            level
        )));
    }

    let nan = EndpointInference {
        slope_statistic: f64::NAN,
        slope_p_value: f64::NAN,
        log10_titer_se: f64::NAN,
        ci_low: f64::NAN,
        ci_high: f64::NAN,
        level,
    };

    let reference = match Reference::for_fit(fit)? {
        Some(r) => r,
        None => return Ok(nan),
    };

    let slope_statistic = if fit.slope_se > 0.0 && fit.slope_se.is_finite() {
        fit.slope / fit.slope_se
    } else {
        f64::NAN
    };
    let slope_p_value = if slope_statistic.is_finite() {
        2.0 * (1.0 - reference.cdf(slope_statistic.abs()))
    } else {
        f64::NAN
    };

    let x50 = match log10_dose_50(fit) {
        Some(x) => x,
        None => {
            return Ok(EndpointInference {
                slope_statistic,
                slope_p_value,
                ..nan
            })
        }
    };

    let var_a = fit.intercept_se * fit.intercept_se;
    let var_b = fit.slope_se * fit.slope_se;
    let variance =
        (var_a + 2.0 * x50 * fit.covariance + x50 * x50 * var_b) / (fit.slope * fit.slope);
    let log10_titer_se = variance.max(0.0).sqrt();

    let q = reference.quantile(1.0 - (1.0 - level) / 2.0);

    Ok(EndpointInference {
        slope_statistic,
        slope_p_value,
        log10_titer_se,
        ci_low: x50 - q * log10_titer_se,
        ci_high: x50 + q * log10_titer_se,
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fit(method: FitMethod, df: usize) -> CurveFit {
        CurveFit {
            sample_id: "S".to_string(),
            method,
            intercept: 8.0,
            slope: -2.0,
            intercept_se: 0.4,
            slope_se: 0.1,
            covariance: -0.03,
            df_residual: df,
            r_squared: None,
            deviance: None,
            converged: true,
        }
    }

    #[test]
    fn test_delta_method_variance() {
        let inf = infer_endpoint(&fit(FitMethod::BinomialGlm, 4), 0.95).unwrap();
        // x50 = 4; var = (0.16 + 2*4*(-0.03) + 16*0.01) / 4 = 0.02
        assert_relative_eq!(inf.log10_titer_se, 0.02f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(inf.ci_high - 4.0, 4.0 - inf.ci_low, epsilon = 1e-12);
        assert_relative_eq!(inf.ci_high - 4.0, 1.959964 * 0.02f64.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_slope_p_value() {
        let inf = infer_endpoint(&fit(FitMethod::Logit, 3), 0.95).unwrap();
        assert_relative_eq!(inf.slope_statistic, -20.0, epsilon = 1e-12);
        assert!(inf.slope_p_value < 0.001);
        // t interval is wider than the normal one
        let glm = infer_endpoint(&fit(FitMethod::BinomialGlm, 3), 0.95).unwrap();
        assert!(inf.ci_high - inf.ci_low > glm.ci_high - glm.ci_low);
    }

    #[test]
    fn test_saturated_gives_nan() {
        let inf = infer_endpoint(&fit(FitMethod::Logit, 0), 0.95).unwrap();
        assert!(inf.slope_p_value.is_nan());
        assert!(inf.ci_low.is_nan());
    }

    #[test]
    fn test_invalid_level() {
        assert!(infer_endpoint(&fit(FitMethod::Logit, 3), 1.5).is_err());
    }
}
