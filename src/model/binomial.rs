//! Binomial GLM with logit link for CPE counts.
//!
//! Models the number of CPE-positive wells out of the inoculated replicates
//! directly, instead of linearising continuity-corrected fractions.
//!
//! # Mathematical Formulation
//!
//! **Distribution**: y_i ~ Binomial(n_i, μ_i)
//!
//! **Link**: logit(μ_i) = β0 + β1 · log10(dose_i)
//!
//! **IRLS**:
//! - Working weight: W_i = n_i μ_i (1-μ_i)
//! - Working response: z_i = η_i + (y_i/n_i - μ_i) / [μ_i(1-μ_i)]

use crate::error::{Result, TiterError};
use crate::model::lm::design_matrix;
use crate::model::{CurveFit, FitMethod};
use crate::transform::{continuity_corrected, expit, logit, ResponseCurve};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use tracing::warn;

/// Maximum iterations for IRLS convergence.
const MAX_ITER: usize = 25;

/// Convergence tolerance for coefficient changes.
const TOL: f64 = 1e-8;

/// Minimum value for fitted probabilities to avoid log(0) or division by zero.
const MIN_MU: f64 = 1e-10;

/// Maximum value for fitted probabilities.
const MAX_MU: f64 = 1.0 - 1e-10;

/// Configuration for binomial GLM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmConfig {
    /// Maximum number of IRLS iterations.
    pub max_iter: usize,
    /// Convergence tolerance (relative L1 change of coefficients).
    pub tol: f64,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            max_iter: MAX_ITER,
            tol: TOL,
        }
    }
}

/// Results from fitting the binomial GLM to one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmFit {
    /// Sample identifier.
    pub sample_id: String,
    /// `[intercept, slope]` on the logit scale.
    pub coefficients: Vec<f64>,
    /// Standard errors from the inverse Fisher information.
    pub std_errors: Vec<f64>,
    /// Covariance between intercept and slope estimates.
    pub covariance: f64,
    /// Log-likelihood at convergence.
    pub log_likelihood: f64,
    /// Residual deviance.
    pub deviance: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the fit converged.
    pub converged: bool,
    /// Fitted probabilities.
    #[serde(skip)]
    pub fitted_values: Vec<f64>,
}

impl GlmFit {
    /// Intercept on the logit scale.
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Change in log-odds per log10 unit of dose.
    pub fn slope(&self) -> f64 {
        self.coefficients[1]
    }

    /// Summarise as a method-independent curve fit.
    pub fn to_curve_fit(&self) -> CurveFit {
        CurveFit {
            sample_id: self.sample_id.clone(),
            method: FitMethod::BinomialGlm,
            intercept: self.intercept(),
            slope: self.slope(),
            intercept_se: self.std_errors[0],
            slope_se: self.std_errors[1],
            covariance: self.covariance,
            df_residual: self.df_residual,
            r_squared: None,
            deviance: Some(self.deviance),
            converged: self.converged,
        }
    }
}

/// Fit the binomial GLM with default configuration.
pub fn fit_binomial(curve: &ResponseCurve) -> Result<GlmFit> {
    fit_binomial_with_config(curve, &GlmConfig::default())
}

/// Fit the binomial GLM by IRLS, weighting each dilution by its replicates.
///
/// Separated data (all wells positive on one side of some dose and negative
/// on the other, with at most the boundary dose mixed) has no finite
/// maximum. IRLS still settles on a steep curve that locates the endpoint,
/// but the fit is reported with `converged = false`.
pub fn fit_binomial_with_config(curve: &ResponseCurve, config: &GlmConfig) -> Result<GlmFit> {
    let n_obs = curve.n_points();
    if curve.n_distinct_doses() < 2 {
        return Err(TiterError::Numerical(format!(
            "Sample '{}' needs at least two distinct dilutions for a fit",
            curve.sample_id
        )));
    }

    let x = design_matrix(&curve.log_dose);
    let y = DVector::from_column_slice(&curve.cpe);
    let n = DVector::from_column_slice(&curve.replicates);

    // Start from the pooled, continuity-corrected response with a flat slope
    let total_cpe: f64 = y.iter().sum();
    let total_n: f64 = n.iter().sum();
    let p0 = continuity_corrected(total_cpe as u32, total_n as u32);
    let mut beta = DVector::from_vec(vec![logit(p0), 0.0]);
    let mut mu = compute_mu(&x, &beta);

    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iter {
        iterations = iter + 1;

        let (w, z) = compute_working_data(&y, &n, &mu);

        // Weighted least squares: beta = (X'WX)^-1 X'Wz
        let mut xw = x.clone();
        let mut zw = z.clone();
        for i in 0..n_obs {
            let w_sqrt = w[i].sqrt();
            for j in 0..2 {
                xw[(i, j)] *= w_sqrt;
            }
            zw[i] *= w_sqrt;
        }
        let xtwx = xw.transpose() * &xw;
        let xtwz = xw.transpose() * &zw;

        let beta_new = match xtwx.try_inverse() {
            Some(inv) => inv * xtwz,
            None => {
                warn!(sample = %curve.sample_id, iteration = iterations, "singular IRLS system");
                break;
            }
        };

        let delta: f64 = (&beta_new - &beta).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta.iter().map(|b| b.abs()).sum::<f64>().max(1.0);

        beta = beta_new;
        mu = compute_mu(&x, &beta);

        if delta / scale < config.tol {
            converged = true;
            break;
        }
    }

    if is_separated(curve) {
        warn!(
            sample = %curve.sample_id,
            iterations,
            "binomial GLM has no finite maximum (separated data)"
        );
        converged = false;
    } else if !converged {
        warn!(sample = %curve.sample_id, iterations, "binomial GLM did not converge");
    }

    let (std_errors, covariance) = compute_std_errors(&x, &mu, &n);

    Ok(GlmFit {
        sample_id: curve.sample_id.clone(),
        coefficients: beta.iter().cloned().collect(),
        std_errors,
        covariance,
        log_likelihood: binomial_log_likelihood(&y, &n, &mu),
        deviance: binomial_deviance(&y, &n, &mu),
        df_residual: n_obs.saturating_sub(2),
        iterations,
        converged,
        fitted_values: mu.iter().cloned().collect(),
    })
}

/// Whether some direction `s * (x - t)` splits positive from negative wells.
///
/// The maximum likelihood estimate exists only when no such split exists.
/// Wells at `x == t` may be mixed (quasi-complete separation). Thresholds
/// outside the dose range cover the all-positive and all-negative cases.
fn is_separated(curve: &ResponseCurve) -> bool {
    let mut doses: Vec<f64> = curve.log_dose.clone();
    doses.sort_by(|a, b| a.total_cmp(b));
    doses.dedup();
    let (first, last) = match (doses.first(), doses.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return false,
    };

    let mut thresholds = vec![first - 1.0, last + 1.0];
    thresholds.extend(doses.iter().copied());
    thresholds.extend(doses.windows(2).map(|w| 0.5 * (w[0] + w[1])));

    let splits = |t: f64, sign: f64| {
        curve
            .log_dose
            .iter()
            .zip(curve.cpe.iter().zip(&curve.replicates))
            .all(|(&x, (&y, &n))| {
                let eta = sign * (x - t);
                (y >= n || eta <= 0.0) && (y <= 0.0 || eta >= 0.0)
            })
    };
    thresholds
        .iter()
        .any(|&t| splits(t, 1.0) || splits(t, -1.0))
}

/// Compute mu = expit(X * beta), clamped away from 0 and 1.
fn compute_mu(x: &DMatrix<f64>, beta: &DVector<f64>) -> DVector<f64> {
    let eta = x * beta;
    DVector::from_iterator(eta.len(), eta.iter().map(|&e| expit(e).clamp(MIN_MU, MAX_MU)))
}

/// Working weights and working response for one IRLS step.
fn compute_working_data(
    y: &DVector<f64>,
    n: &DVector<f64>,
    mu: &DVector<f64>,
) -> (DVector<f64>, DVector<f64>) {
    let n_obs = y.len();

    let w = DVector::from_iterator(
        n_obs,
        (0..n_obs).map(|i| (n[i] * mu[i] * (1.0 - mu[i])).max(1e-10)),
    );

    let z = DVector::from_iterator(
        n_obs,
        (0..n_obs).map(|i| {
            let mi = mu[i];
            let eta = logit(mi);
            let pi = y[i] / n[i];
            eta + (pi - mi) / (mi * (1.0 - mi)).max(1e-10)
        }),
    );

    (w, z)
}

/// Standard errors and intercept/slope covariance from Fisher information X'WX.
fn compute_std_errors(x: &DMatrix<f64>, mu: &DVector<f64>, n: &DVector<f64>) -> (Vec<f64>, f64) {
    let mut xw = x.clone();
    for i in 0..x.nrows() {
        let w_sqrt = (n[i] * mu[i] * (1.0 - mu[i])).sqrt();
        for j in 0..2 {
            xw[(i, j)] *= w_sqrt;
        }
    }

    let fisher = xw.transpose() * &xw;
    match fisher.try_inverse() {
        Some(inv) => (
            (0..2).map(|j| inv[(j, j)].max(0.0).sqrt()).collect(),
            inv[(0, 1)],
        ),
        None => (vec![f64::NAN; 2], f64::NAN),
    }
}

/// Binomial log-likelihood including the binomial coefficient.
fn binomial_log_likelihood(y: &DVector<f64>, n: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    y.iter()
        .zip(n.iter())
        .zip(mu.iter())
        .map(|((&yi, &ni), &mi)| {
            ln_gamma(ni + 1.0) - ln_gamma(yi + 1.0) - ln_gamma(ni - yi + 1.0)
                + yi * mi.ln()
                + (ni - yi) * (1.0 - mi).ln()
        })
        .sum()
}

/// Residual deviance against the saturated model, with 0·ln(0) = 0.
fn binomial_deviance(y: &DVector<f64>, n: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    let term = |obs: f64, expected: f64| {
        if obs > 0.0 {
            obs * (obs / expected).ln()
        } else {
            0.0
        }
    };
    2.0 * y
        .iter()
        .zip(n.iter())
        .zip(mu.iter())
        .map(|((&yi, &ni), &mi)| term(yi, ni * mi) + term(ni - yi, ni * (1.0 - mi)))
        .sum::<f64>()
}
