//! Continuity correction and logit linearisation of CPE fractions.

use crate::error::{Result, TiterError};

/// Count added to the CPE wells before taking the logit.
pub const CONTINUITY_CPE: f64 = 0.5;

/// Count added to the replicate total before taking the logit.
pub const CONTINUITY_REPLICATES: f64 = 1.0;

/// Continuity-corrected CPE fraction: `(cpe + 0.5) / (replicates + 1)`.
///
/// Always strictly inside (0, 1), so 0/n and n/n wells keep a finite logit.
pub fn continuity_corrected(cpe: u32, replicates: u32) -> f64 {
    (cpe as f64 + CONTINUITY_CPE) / (replicates as f64 + CONTINUITY_REPLICATES)
}

/// Log-odds of a probability.
pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Inverse of [`logit`].
pub fn expit(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

/// Logit of the continuity-corrected CPE fraction.
pub fn corrected_logit(cpe: u32, replicates: u32) -> f64 {
    logit(continuity_corrected(cpe, replicates))
}

/// Convert a per-well inoculum volume in microlitres to millilitres.
pub fn volume_ml(volume_ul: f64) -> Result<f64> {
    if !(volume_ul.is_finite() && volume_ul > 0.0) {
        return Err(TiterError::InvalidParameter(format!(
            "Volume per well must be positive, got {} µL",
            volume_ul
        )));
    }
    Ok(volume_ul / 1000.0)
}

/// Dose in infectious units per mL for a dilution factor and well volume.
pub fn dose_per_ml(dilution: f64, volume_ml: f64) -> f64 {
    dilution / volume_ml
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_continuity_corrected_bounds() {
        assert_relative_eq!(continuity_corrected(0, 8), 0.5 / 9.0);
        assert_relative_eq!(continuity_corrected(8, 8), 8.5 / 9.0);
        assert_relative_eq!(continuity_corrected(4, 8), 0.5);
    }

    #[test]
    fn test_corrected_logit_symmetry() {
        assert_relative_eq!(corrected_logit(4, 8), 0.0, epsilon = 1e-12);
        assert_relative_eq!(corrected_logit(0, 8), -corrected_logit(8, 8), epsilon = 1e-12);
        assert_relative_eq!(corrected_logit(0, 8), (1.0f64 / 17.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_expit_inverts_logit() {
        for p in [0.01, 0.2, 0.5, 0.77, 0.99] {
            assert_relative_eq!(expit(logit(p)), p, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_volume_and_dose() {
        let v = volume_ml(50.0).unwrap();
        assert_relative_eq!(v, 0.05);
        assert_relative_eq!(dose_per_ml(1000.0, v), 20000.0, epsilon = 1e-9);
        assert!(volume_ml(0.0).is_err());
        assert!(volume_ml(-5.0).is_err());
    }
}
