//! Input source resolution: pasted tab-separated text or an uploaded file.

use crate::data::assay::{AssayTable, DecimalSeparator};
use crate::error::{Result, TiterError};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Supported input file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl InputFormat {
    /// Determine the format from a file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("tsv") => Ok(Self::Tsv),
            Some("xlsx") => Ok(Self::Xlsx),
            _ => {
                warn!(path = %path.display(), "unsupported input file extension");
                Err(TiterError::UnsupportedExtension(path.display().to_string()))
            }
        }
    }
}

/// Where the assay data comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Tab-separated text with a header row.
    Text(String),
    /// A `.csv`, `.tsv` or `.xlsx` file.
    File(PathBuf),
}

impl InputSource {
    /// Pick exactly one source. Empty text counts as absent.
    pub fn resolve(text: Option<String>, file: Option<PathBuf>) -> Result<Self> {
        let text = text.filter(|t| !t.trim().is_empty());
        match (text, file) {
            (Some(_), Some(_)) => Err(TiterError::InputSource(
                "Both input file and tab separated text provided.".to_string(),
            )),
            (None, None) => Err(TiterError::InputSource(
                "Neither input file nor tab separated text provided.".to_string(),
            )),
            (Some(t), None) => Ok(Self::Text(t)),
            (None, Some(f)) => {
                InputFormat::from_path(&f)?;
                Ok(Self::File(f))
            }
        }
    }

    /// Parse the source into an assay table.
    pub fn load(&self, decimal: DecimalSeparator) -> Result<AssayTable> {
        match self {
            Self::Text(text) => AssayTable::from_tsv_str(text, decimal),
            Self::File(path) => match InputFormat::from_path(path)? {
                InputFormat::Csv => AssayTable::from_csv(path, decimal),
                InputFormat::Tsv => AssayTable::from_tsv(path, decimal),
                InputFormat::Xlsx => AssayTable::from_xlsx(path),
            },
        }
    }

    /// Base name for derived output files.
    pub fn output_stem(&self) -> String {
        match self {
            Self::Text(_) => "pasted".to_string(),
            Self::File(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("tcid50")
                .to_string(),
        }
    }

    /// Default results path: `<stem>_out.csv` next to the input file.
    pub fn default_output(&self) -> PathBuf {
        let name = format!("{}_out.csv", self.output_stem());
        match self {
            Self::File(path) => path.with_file_name(name),
            Self::Text(_) => PathBuf::from(name),
        }
    }
}
