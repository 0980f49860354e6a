//! Report output
//!
//! - [`text`]: the canonical human-readable report
//! - [`json`]: the same data as a JSON document

pub mod json;
pub mod text;

use serde::{Deserialize, Serialize};

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}
