//! Configuration and execution of a complete titer analysis.

mod runner;

pub use runner::{
    estimate_titers, Analysis, AnalysisConfig, AnalysisOutput, DEFAULT_CONFIDENCE,
    DEFAULT_VOLUME_UL,
};
