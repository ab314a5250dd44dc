//! # Driver Configuration
//!
//! The TOML file the driver reads at startup:
//!
//! ```toml
//! [roots]
//! output = "/data/reduced"
//!
//! [pipeline]
//! name = "reduce"
//! kind = "multi"
//!
//! [[pipeline.stages]]
//! name = "defaults"
//! kind = "set"
//! config = { filter = "r" }
//! ```
//!
//! `roots.output` is optional; without it results are only printed.

use pipette_core::{PipelineError, StageSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default CCD list for a full Suprime-Cam frame.
pub const DEFAULT_CCDS: &str = "0:1:2:3:4:5:6:7:8:9";

/// Separator for `--ccd` lists.
pub const CCD_SEPARATOR: char = ':';

/// Filesystem roots.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Roots {
    /// Directory that receives one JSON file per unit of work.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Complete driver configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    #[serde(default)]
    pub roots: Roots,
    pub pipeline: StageSpec,
}

impl DriverConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Result file for one unit of work: `<output>/<rerun>-<frame><ccd>.json`.
    #[must_use]
    pub fn output_path(&self, rerun: &str, frame: u32, ccd: u32) -> Option<PathBuf> {
        self.roots
            .output
            .as_ref()
            .map(|root| root.join(format!("{rerun}-{frame}{ccd}.json")))
    }
}

/// Parse a colon-separated CCD list such as `0:1:2`.
pub fn parse_ccd_list(text: &str) -> Result<Vec<u32>, PipelineError> {
    text.split(CCD_SEPARATOR)
        .map(|item| {
            item.trim()
                .parse::<u32>()
                .map_err(|e| PipelineError::Config(format!("Invalid CCD '{item}': {e}")))
        })
        .collect()
}
