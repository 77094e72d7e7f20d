use std::io;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::model::PeriodLabel;

/// Error type for loading, partitioning, and configuration failures.
///
/// A zero baseline is not an error: it is reported through
/// [`ChangeOutcome::NoBaseline`](crate::analyzers::types::ChangeOutcome).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },
    #[error("duplicate record at row {row}: {key} already seen at row {first_row}")]
    DuplicateRecord {
        row: usize,
        first_row: usize,
        key: String,
    },
    #[error("{period} period is empty for cutover {cutover}; nothing to compare")]
    EmptyPeriod {
        period: PeriodLabel,
        cutover: NaiveDateTime,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl AnalysisError {
    /// Returns `true` for errors that concern a single input row.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            AnalysisError::MalformedRecord { .. } | AnalysisError::DuplicateRecord { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
