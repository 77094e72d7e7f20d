//! Record loader for ridership exports.
//!
//! Reads CSV or JSON (optionally gzip-compressed) into a [`Dataset`],
//! validating every row and applying the configured row and duplicate
//! policies.

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{DuplicatePolicy, LoadOptions, RowPolicy};
use crate::error::{AnalysisError, Result};
use crate::model::{Dataset, Observation, ObservationKey};
use crate::timestamps::parse_timestamp;

/// Supported input encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
}

impl InputFormat {
    /// Picks the format from the file name; a trailing `.gz` is looked through.
    pub fn from_path(path: &Path) -> Option<(InputFormat, bool)> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let (name, gzipped) = match name.strip_suffix(".gz") {
            Some(inner) => (inner.to_string(), true),
            None => (name, false),
        };
        if name.ends_with(".csv") {
            Some((InputFormat::Csv, gzipped))
        } else if name.ends_with(".json") {
            Some((InputFormat::Json, gzipped))
        } else {
            None
        }
    }
}

/// A row as it appears in the export, before validation.
///
/// Column names follow either the canonical schema or the fare-collection
/// export headers.
#[derive(Debug, Default, Deserialize)]
pub struct RawRecord {
    #[serde(alias = "line_id", alias = "Route Or Line")]
    pub line: Option<String>,
    #[serde(alias = "stop_id", alias = "Stop Name")]
    pub stop: Option<String>,
    #[serde(alias = "Service Date")]
    pub timestamp: Option<String>,
    #[serde(alias = "Total Entries")]
    pub rider_count: Option<String>,
    #[serde(alias = "day")]
    pub day_type: Option<String>,
}

/// JSON variant of [`RawRecord`]; counts may arrive as numbers or strings.
#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(alias = "line_id", alias = "Route Or Line")]
    line: Option<String>,
    #[serde(alias = "stop_id", alias = "Stop Name")]
    stop: Option<String>,
    #[serde(alias = "Service Date")]
    timestamp: Option<String>,
    #[serde(alias = "Total Entries")]
    rider_count: Option<serde_json::Value>,
    #[serde(alias = "day")]
    day_type: Option<String>,
}

impl From<JsonRecord> for RawRecord {
    fn from(r: JsonRecord) -> Self {
        let rider_count = r.rider_count.and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });
        RawRecord {
            line: r.line,
            stop: r.stop,
            timestamp: r.timestamp,
            rider_count,
            day_type: r.day_type,
        }
    }
}

/// Result of a load: the dataset plus every row-level issue that was skipped.
#[derive(Debug)]
pub struct LoadOutcome {
    pub dataset: Dataset,
    pub rows_read: usize,
    pub issues: Vec<AnalysisError>,
}

/// Loads a dataset from `path`, choosing the decoder from the extension.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_path(path: impl AsRef<Path>, options: &LoadOptions) -> Result<LoadOutcome> {
    let path = path.as_ref();
    let (format, gzipped) = InputFormat::from_path(path).ok_or_else(|| {
        AnalysisError::InvalidConfig(format!(
            "cannot infer input format of '{}' (expected .csv, .json, optionally .gz)",
            path.display()
        ))
    })?;

    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let outcome = match format {
        InputFormat::Csv => load_csv(reader, options)?,
        InputFormat::Json => load_json(reader, options)?,
    };

    info!(
        rows = outcome.rows_read,
        observations = outcome.dataset.len(),
        issues = outcome.issues.len(),
        "Dataset loaded"
    );
    Ok(outcome)
}

/// Loads CSV with a header row.
///
/// Read failures (including a corrupt gzip stream) abort the load regardless
/// of [`RowPolicy`]; only records that fail to deserialize are row-level.
pub fn load_csv<R: Read>(reader: R, options: &LoadOptions) -> Result<LoadOutcome> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut rows = Vec::new();
    for (idx, result) in rdr.deserialize::<RawRecord>().enumerate() {
        let row = idx + 1;
        match result {
            Ok(raw) => rows.push((row, Ok(raw))),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => rows.push((row, Err(e.to_string()))),
        }
    }

    build_dataset(rows, options)
}

/// Loads a JSON array of record objects.
pub fn load_json<R: Read>(reader: R, options: &LoadOptions) -> Result<LoadOutcome> {
    let values: Vec<serde_json::Value> = serde_json::from_reader(reader)?;

    let rows = values.into_iter().enumerate().map(|(idx, value)| {
        let row = idx + 1;
        match serde_json::from_value::<JsonRecord>(value) {
            Ok(rec) => (row, Ok(RawRecord::from(rec))),
            Err(e) => (row, Err(e.to_string())),
        }
    });

    build_dataset(rows, options)
}

/// Validates rows in order and applies the duplicate policy.
///
/// Row numbers are 1-based positions among data records (headers excluded).
pub fn build_dataset<I>(rows: I, options: &LoadOptions) -> Result<LoadOutcome>
where
    I: IntoIterator<Item = (usize, std::result::Result<RawRecord, String>)>,
{
    let mut observations: Vec<Observation> = Vec::new();
    // key -> (index into observations, source row)
    let mut seen: HashMap<ObservationKey, (usize, usize)> = HashMap::new();
    let mut issues = Vec::new();
    let mut rows_read = 0;

    for (row, raw) in rows {
        rows_read += 1;

        let parsed = raw
            .map_err(|reason| AnalysisError::MalformedRecord { row, reason })
            .and_then(|raw| validate_record(row, raw));

        let obs = match parsed {
            Ok(obs) => obs,
            Err(e) => {
                reject(e, options.row_policy, &mut issues)?;
                continue;
            }
        };

        let key = obs.key();
        match seen.get(&key) {
            None => {
                seen.insert(key, (observations.len(), row));
                observations.push(obs);
            }
            Some(&(idx, first_row)) => match options.duplicate_policy {
                DuplicatePolicy::Reject => {
                    let e = AnalysisError::DuplicateRecord {
                        row,
                        first_row,
                        key: key.to_string(),
                    };
                    reject(e, options.row_policy, &mut issues)?;
                }
                DuplicatePolicy::KeepFirst => {
                    debug!(row, first_row, key = %key, "Dropping duplicate record");
                }
                DuplicatePolicy::Sum => {
                    let merged = &mut observations[idx];
                    merged.rider_count = merged.rider_count.saturating_add(obs.rider_count);
                    if merged.day_type.is_none() {
                        merged.day_type = obs.day_type;
                    }
                }
            },
        }
    }

    if !issues.is_empty() {
        warn!(count = issues.len(), "Rows skipped while loading");
    }

    Ok(LoadOutcome {
        dataset: Dataset::new(observations)?,
        rows_read,
        issues,
    })
}

fn reject(e: AnalysisError, policy: RowPolicy, issues: &mut Vec<AnalysisError>) -> Result<()> {
    match policy {
        RowPolicy::Abort => Err(e),
        RowPolicy::Skip => {
            warn!(error = %e, "Skipping record");
            issues.push(e);
            Ok(())
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Turns a raw row into an [`Observation`] or a `MalformedRecord` error.
pub fn validate_record(row: usize, raw: RawRecord) -> Result<Observation> {
    let malformed = |reason: String| AnalysisError::MalformedRecord { row, reason };

    let line_id = non_blank(raw.line).ok_or_else(|| malformed("missing line".to_string()))?;
    let timestamp_raw =
        non_blank(raw.timestamp).ok_or_else(|| malformed("missing timestamp".to_string()))?;
    let timestamp = parse_timestamp(&timestamp_raw)
        .ok_or_else(|| malformed(format!("unrecognized timestamp '{timestamp_raw}'")))?;
    let count_raw =
        non_blank(raw.rider_count).ok_or_else(|| malformed("missing rider_count".to_string()))?;
    let rider_count = parse_rider_count(&count_raw).map_err(malformed)?;

    Ok(Observation {
        line_id,
        stop_id: non_blank(raw.stop),
        timestamp,
        rider_count,
        day_type: non_blank(raw.day_type),
    })
}

/// Accepts non-negative integers, including whole-number decimals like `120.0`.
fn parse_rider_count(raw: &str) -> std::result::Result<u64, String> {
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(n);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v < 0.0 => Err(format!("negative rider_count '{raw}'")),
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v <= u64::MAX as f64 => Ok(v as u64),
        Ok(_) => Err(format!("rider_count '{raw}' is not a whole number")),
        Err(_) => Err(format!("non-numeric rider_count '{raw}'")),
    }
}
