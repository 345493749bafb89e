//! Data structures for dilution assays and titer results.

mod assay;
mod result;
mod sample_sheet;
mod source;

pub use assay::{
    AssayRecord, AssayTable, DecimalSeparator, COL_CPE, COL_DILUTION, COL_ID, COL_REPLICATES,
};
pub use result::{ResultSummary, TiterResult, TiterResultSet};
pub use sample_sheet::{SampleSheet, Variable, VariableType};
pub use source::{InputFormat, InputSource};
