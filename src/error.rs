//! Error types for RFM segmentation

use crate::types::Metric;
use thiserror::Error;

/// Errors that can occur while computing segments
#[derive(Debug, Error)]
pub enum RfmError {
    #[error("Required column missing from input schema: {column}")]
    Schema { column: String },

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Insufficient data to score {metric}: {distinct} distinct values, need {required}")]
    InsufficientData {
        metric: Metric,
        distinct: usize,
        required: usize,
    },

    #[error("Cannot cut {metric} into quantiles: cut point {cut_point} repeats")]
    CollidingCutPoints {
        metric: Metric,
        cut_point: f64,
        distinct: usize,
    },

    #[error("No segment rule matches rf_code {0}")]
    UnmappedSegment(String),

    #[error("Invalid score: {0}")]
    InvalidScore(String),

    #[error("Invalid segment rules: {0}")]
    InvalidRules(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
