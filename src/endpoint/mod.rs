//! Endpoint extraction: invert the fitted line at 50% response and classify
//! the result against the tested dose range.

pub mod inference;

pub use inference::{infer_endpoint, EndpointInference};

use crate::model::{CurveFit, FitOutcome};
use crate::transform::CpeVariation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slopes smaller than this in magnitude are treated as flat.
pub const FLAT_SLOPE: f64 = 1e-12;

/// Message reported for samples without CPE at any dilution.
pub const MSG_ALL_NEGATIVE: &str = "no CPE at any dilution (below detection limit)";
/// Message reported for samples with CPE in every well.
pub const MSG_ALL_POSITIVE: &str =
    "CPE in all replicates at every dilution (above detection limit)";
/// Message reported when the fitted line has no dose dependence.
pub const MSG_FLAT_SLOPE: &str = "no dose dependence in fitted curve";
/// Message reported when a sample has fewer than two distinct dilutions.
pub const MSG_INSUFFICIENT: &str = "fewer than two distinct dilutions";

/// Where the endpoint falls relative to the assay's dynamic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// Endpoint between the lowest and highest tested dose.
    WithinRange,
    /// Endpoint below the lowest tested dose.
    BelowDetectionLimit,
    /// Endpoint above the highest tested dose.
    AboveDetectionLimit,
    /// No endpoint can be placed.
    Undetermined,
}

impl DetectionStatus {
    /// Machine-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WithinRange => "within_range",
            Self::BelowDetectionLimit => "below_detection_limit",
            Self::AboveDetectionLimit => "above_detection_limit",
            Self::Undetermined => "undetermined",
        }
    }

    /// Parse a name written by [`DetectionStatus::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "within_range" => Some(Self::WithinRange),
            "below_detection_limit" => Some(Self::BelowDetectionLimit),
            "above_detection_limit" => Some(Self::AboveDetectionLimit),
            "undetermined" => Some(Self::Undetermined),
            _ => None,
        }
    }

    /// Whether the result lies outside the limits of detection.
    pub fn is_outside(&self) -> bool {
        !matches!(self, Self::WithinRange)
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WithinRange => "within range",
            Self::BelowDetectionLimit => "below detection limit",
            Self::AboveDetectionLimit => "above detection limit",
            Self::Undetermined => "undetermined",
        };
        f.write_str(label)
    }
}

/// Fixed factors placing out-of-range samples just outside the tested range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginPolicy {
    /// Multiplier applied to the lower limit for samples below detection.
    pub below_factor: f64,
    /// Multiplier applied to the upper limit for samples above detection.
    pub above_factor: f64,
}

impl Default for MarginPolicy {
    fn default() -> Self {
        Self {
            below_factor: 0.8,
            above_factor: 1.2,
        }
    }
}

impl MarginPolicy {
    /// Chart position for a status, given the detection limits (per mL).
    pub fn clamp(&self, status: DetectionStatus, lower: f64, upper: f64) -> Option<f64> {
        match status {
            DetectionStatus::BelowDetectionLimit => Some(lower * self.below_factor),
            DetectionStatus::AboveDetectionLimit => Some(upper * self.above_factor),
            DetectionStatus::WithinRange | DetectionStatus::Undetermined => None,
        }
    }
}

/// Titer estimate of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub status: DetectionStatus,
    /// log10 of the dose per mL at 50% response, if a finite endpoint exists.
    pub log10_titer: Option<f64>,
    /// TCID50 per mL, if a finite endpoint exists.
    pub titer_per_ml: Option<f64>,
    /// Position used in charts: the titer, or the margin-policy value when out of range.
    pub plot_titer_per_ml: Option<f64>,
    /// Lowest tested dose per mL.
    pub lower_limit: f64,
    /// Highest tested dose per mL.
    pub upper_limit: f64,
    /// Explanation for special-cased samples.
    pub message: Option<String>,
}

/// Classify a log10 dose against the tested range.
pub fn classify_log_dose(log10_dose: f64, lower: f64, upper: f64) -> DetectionStatus {
    if !log10_dose.is_finite() {
        DetectionStatus::Undetermined
    } else if log10_dose < lower.log10() {
        DetectionStatus::BelowDetectionLimit
    } else if log10_dose > upper.log10() {
        DetectionStatus::AboveDetectionLimit
    } else {
        DetectionStatus::WithinRange
    }
}

/// log10 dose at which the fitted response crosses 0.5, if the line is not flat.
pub fn log10_dose_50(fit: &CurveFit) -> Option<f64> {
    if !fit.slope.is_finite() || !fit.intercept.is_finite() || fit.slope.abs() < FLAT_SLOPE {
        return None;
    }
    Some(-fit.intercept / fit.slope)
}

/// Endpoint of a fitted sample.
///
/// Extrapolated endpoints keep their numeric titer but are flagged out of
/// range. A flat line is classified by the sign of its intercept and carries
/// no numeric titer.
pub fn endpoint_from_fit(
    fit: &CurveFit,
    lower_limit: f64,
    upper_limit: f64,
    margin: &MarginPolicy,
) -> Endpoint {
    match log10_dose_50(fit) {
        Some(x50) => {
            let status = classify_log_dose(x50, lower_limit, upper_limit);
            let titer = 10f64.powf(x50);
            let plot = match status {
                DetectionStatus::WithinRange => Some(titer),
                other => margin.clamp(other, lower_limit, upper_limit),
            };
            Endpoint {
                status,
                log10_titer: Some(x50),
                titer_per_ml: Some(titer),
                plot_titer_per_ml: plot,
                lower_limit,
                upper_limit,
                message: None,
            }
        }
        None => {
            let status = if fit.intercept < 0.0 {
                DetectionStatus::BelowDetectionLimit
            } else if fit.intercept > 0.0 {
                DetectionStatus::AboveDetectionLimit
            } else {
                DetectionStatus::Undetermined
            };
            Endpoint {
                status,
                log10_titer: None,
                titer_per_ml: None,
                plot_titer_per_ml: margin.clamp(status, lower_limit, upper_limit),
                lower_limit,
                upper_limit,
                message: Some(MSG_FLAT_SLOPE.to_string()),
            }
        }
    }
}

/// Endpoint of a sample whose CPE readout does not vary, so no fit is attempted.
pub fn endpoint_without_variation(
    variation: CpeVariation,
    lower_limit: f64,
    upper_limit: f64,
    margin: &MarginPolicy,
) -> Endpoint {
    let (status, message) = match variation {
        CpeVariation::AllNegative => (DetectionStatus::BelowDetectionLimit, MSG_ALL_NEGATIVE),
        CpeVariation::AllPositive => (DetectionStatus::AboveDetectionLimit, MSG_ALL_POSITIVE),
        // varied but unfittable
        CpeVariation::Varied => (DetectionStatus::Undetermined, MSG_INSUFFICIENT),
    };
    Endpoint {
        status,
        log10_titer: None,
        titer_per_ml: None,
        plot_titer_per_ml: margin.clamp(status, lower_limit, upper_limit),
        lower_limit,
        upper_limit,
        message: Some(message.to_string()),
    }
}

/// Endpoint for any fit outcome.
pub fn endpoint_for_outcome(
    outcome: &FitOutcome,
    lower_limit: f64,
    upper_limit: f64,
    margin: &MarginPolicy,
) -> Endpoint {
    match outcome {
        FitOutcome::Fitted(fit) => endpoint_from_fit(fit, lower_limit, upper_limit, margin),
        FitOutcome::Constant(variation) => {
            endpoint_without_variation(*variation, lower_limit, upper_limit, margin)
        }
        FitOutcome::Insufficient => {
            endpoint_without_variation(CpeVariation::Varied, lower_limit, upper_limit, margin)
        }
    }
}
