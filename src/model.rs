//! Core ridership data model: observations, datasets, periods and scopes.

use chrono::{Datelike, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{AnalysisError, Result};

/// A single ridership count for a line (and optionally one of its stops)
/// at one timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub line_id: String,
    /// Absent for line-level records.
    pub stop_id: Option<String>,
    pub timestamp: NaiveDateTime,
    pub rider_count: u64,
    /// Service-day label from the export, e.g. `Weekday` or `Sunday`.
    #[serde(default)]
    pub day_type: Option<String>,
}

impl Observation {
    pub fn new(line_id: &str, stop_id: Option<&str>, timestamp: NaiveDateTime, rider_count: u64) -> Self {
        Observation {
            line_id: line_id.to_string(),
            stop_id: stop_id.map(str::to_string),
            timestamp,
            rider_count,
            day_type: None,
        }
    }

    pub fn with_day_type(mut self, day_type: &str) -> Self {
        self.day_type = Some(day_type.to_string());
        self
    }

    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            line_id: self.line_id.clone(),
            stop_id: self.stop_id.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Weekday service, taken from `day_type` when the export carries one and
    /// from the calendar otherwise.
    pub fn is_weekday(&self) -> bool {
        match &self.day_type {
            Some(day) => day.trim().eq_ignore_ascii_case("weekday"),
            None => !matches!(self.timestamp.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }
}

/// Uniqueness key of an [`Observation`] within a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
    pub line_id: String,
    pub stop_id: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stop_id {
            Some(stop) => write!(f, "({}, {}, {})", self.line_id, stop, self.timestamp),
            None => write!(f, "({}, -, {})", self.line_id, self.timestamp),
        }
    }
}

/// An ordered, duplicate-free sequence of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    /// Builds a dataset, rejecting the first repeated
    /// `(line_id, stop_id, timestamp)` key.
    pub fn new(observations: Vec<Observation>) -> Result<Self> {
        let mut seen: HashMap<ObservationKey, usize> = HashMap::with_capacity(observations.len());
        for (idx, obs) in observations.iter().enumerate() {
            if let Some(first) = seen.insert(obs.key(), idx + 1) {
                return Err(AnalysisError::DuplicateRecord {
                    row: idx + 1,
                    first_row: first,
                    key: obs.key().to_string(),
                });
            }
        }
        Ok(Dataset { observations })
    }

    /// Keeps the observations matching `keep`. Order is preserved and a subset
    /// of a duplicate-free dataset stays duplicate-free.
    pub fn filter<F>(&self, mut keep: F) -> Dataset
    where
        F: FnMut(&Observation) -> bool,
    {
        Dataset {
            observations: self.observations.iter().filter(|&o| keep(o)).cloned().collect(),
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Distinct line ids in lexical order.
    pub fn line_ids(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.observations.iter().map(|o| o.line_id.clone()).collect();
        lines.sort();
        lines.dedup();
        lines
    }

    pub fn time_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.observations.iter().map(|o| o.timestamp).min()?;
        let last = self.observations.iter().map(|o| o.timestamp).max()?;
        Some((first, last))
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// Which side of the cutover a period covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodLabel {
    Before,
    After,
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodLabel::Before => f.write_str("before"),
            PeriodLabel::After => f.write_str("after"),
        }
    }
}

/// A half-open time range `[start, end)`; `None` bounds are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub label: PeriodLabel,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Period {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts < end)
    }
}

/// Aggregation key: a whole line or one stop of a line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum Scope {
    Line { line_id: String },
    Stop { line_id: String, stop_id: String },
}

impl Scope {
    pub fn line(line_id: &str) -> Self {
        Scope::Line {
            line_id: line_id.to_string(),
        }
    }

    pub fn stop(line_id: &str, stop_id: &str) -> Self {
        Scope::Stop {
            line_id: line_id.to_string(),
            stop_id: stop_id.to_string(),
        }
    }

    pub fn line_id(&self) -> &str {
        match self {
            Scope::Line { line_id } | Scope::Stop { line_id, .. } => line_id,
        }
    }

    pub fn stop_id(&self) -> Option<&str> {
        match self {
            Scope::Line { .. } => None,
            Scope::Stop { stop_id, .. } => Some(stop_id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Line { line_id } => f.write_str(line_id),
            Scope::Stop { line_id, stop_id } => write!(f, "{line_id} / {stop_id}"),
        }
    }
}
