//! Response transforms: counts to fittable dose-response curves.

pub mod continuity;
pub mod curve;

pub use continuity::{
    continuity_corrected, corrected_logit, dose_per_ml, expit, logit, volume_ml,
};
pub use curve::{build_curves, CpeVariation, ResponseCurve};
