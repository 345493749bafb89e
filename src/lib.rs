//! TCID50 Endpoint Titer Estimation Library
//!
//! This library estimates 50% tissue-culture infectious dose (TCID50) titers
//! from dilution series scored for cytopathic effect (CPE), and draws
//! dose-response charts.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Assay records, input sources (CSV, TSV, XLSX, pasted text),
//!   sample sheets, and result sets
//! - **transform**: Continuity-corrected logit and dose per mL
//! - **model**: Per-sample OLS on the logit, or a binomial GLM
//! - **endpoint**: 50% endpoint, detection-limit classification, inference
//! - **plot**: Dose-response and titer chart specifications, SVG output
//! - **analysis**: Configuration and execution of a complete analysis
//!
//! # Example
//!
//! ```no_run
//! use tcid50::prelude::*;
//!
//! let source = InputSource::File("plate1.csv".into());
//! let output = Analysis::new()
//!     .volume_ul(10.0)
//!     .method(FitMethod::Logit)
//!     .run_source(&source, None)
//!     .unwrap();
//!
//! output.results.to_csv(source.default_output()).unwrap();
//! dose_response_chart(&output.results, &output.curves)
//!     .render_svg("plate1_dose_response.svg")
//!     .unwrap();
//! ```

pub mod analysis;
pub mod data;
pub mod endpoint;
pub mod error;
pub mod model;
pub mod plot;
pub mod transform;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::analysis::{estimate_titers, Analysis, AnalysisConfig, AnalysisOutput};
    pub use crate::data::{
        AssayRecord, AssayTable, DecimalSeparator, InputFormat, InputSource, ResultSummary,
        SampleSheet, TiterResult, TiterResultSet, Variable, VariableType,
    };
    pub use crate::endpoint::{
        endpoint_for_outcome, endpoint_from_fit, infer_endpoint, DetectionStatus, Endpoint,
        EndpointInference, MarginPolicy,
    };
    pub use crate::error::{Result, TiterError};
    pub use crate::model::{
        fit_binomial, fit_curve, fit_logit_ols, CurveFit, FitMethod, FitOutcome, GlmConfig,
        GlmFit, LogitFit,
    };
    pub use crate::plot::{dose_response_chart, titer_chart, ChartSpec, Layer, Panel};
    pub use crate::transform::{
        build_curves, continuity_corrected, corrected_logit, volume_ml, CpeVariation,
        ResponseCurve,
    };
}
