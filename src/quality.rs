//! Data quality scanning.
//!
//! Two read-only checks over a whole dataset, independent of partitioning:
//! - [`scan_gaps`] walks each (line, stop) series and reports spans where
//!   consecutive samples are further apart than the expected interval allows.
//! - [`scan_roster_coverage`] lists, per service date, the rostered stations
//!   that did not report.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{GapScanConfig, Roster};
use crate::model::Dataset;
use crate::timestamps::format_interval;

/// A stretch with no samples: `[start, end)`, where `start` is the first
/// expected-but-missing sample and `end` is the next observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissingRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl MissingRange {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// What was actually observed for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub observations: usize,
    /// Samples expected between `first` and `last` at the expected interval.
    pub expected_observations: usize,
}

impl Coverage {
    pub fn ratio(&self) -> f64 {
        if self.expected_observations == 0 {
            0.0
        } else {
            self.observations as f64 / self.expected_observations as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapRecord {
    pub line_id: String,
    pub stop_id: Option<String>,
    #[serde(serialize_with = "serialize_interval")]
    pub expected_interval: Duration,
    pub observed_coverage: Coverage,
    pub missing_ranges: Vec<MissingRange>,
}

impl GapRecord {
    pub fn total_missing(&self) -> Duration {
        self.missing_ranges
            .iter()
            .fold(Duration::zero(), |acc, r| acc + r.duration())
    }
}

fn serialize_interval<S: Serializer>(interval: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_interval(*interval))
}

/// Rostered stations absent on a date the line otherwise reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingStations {
    pub line_id: String,
    pub date: NaiveDate,
    pub missing_stops: Vec<String>,
}

/// Reports every (line, stop) series with a gap exceeding
/// `expected_interval + tolerance`. Line-level records form their own series.
#[tracing::instrument(skip_all, fields(observations = dataset.len()))]
pub fn scan_gaps(dataset: &Dataset, config: &GapScanConfig) -> Vec<GapRecord> {
    let mut series: BTreeMap<(&str, Option<&str>), Vec<NaiveDateTime>> = BTreeMap::new();
    for obs in dataset {
        series
            .entry((obs.line_id.as_str(), obs.stop_id.as_deref()))
            .or_default()
            .push(obs.timestamp);
    }

    let threshold = config.threshold();
    let mut gaps = Vec::new();

    for ((line_id, stop_id), mut stamps) in series {
        stamps.sort_unstable();

        let missing_ranges: Vec<MissingRange> = stamps
            .windows(2)
            .filter(|pair| pair[1] - pair[0] > threshold)
            .map(|pair| MissingRange {
                start: pair[0] + config.expected_interval,
                end: pair[1],
            })
            .collect();

        if missing_ranges.is_empty() {
            continue;
        }

        let first = stamps[0];
        let last = stamps[stamps.len() - 1];
        let expected_observations = expected_samples(first, last, config.expected_interval);

        debug!(
            line_id,
            stop_id = stop_id.unwrap_or("-"),
            ranges = missing_ranges.len(),
            "Coverage gap"
        );

        gaps.push(GapRecord {
            line_id: line_id.to_string(),
            stop_id: stop_id.map(str::to_string),
            expected_interval: config.expected_interval,
            observed_coverage: Coverage {
                first,
                last,
                observations: stamps.len(),
                expected_observations,
            },
            missing_ranges,
        });
    }

    info!(series_with_gaps = gaps.len(), "Gap scan complete");
    gaps
}

fn expected_samples(first: NaiveDateTime, last: NaiveDateTime, interval: Duration) -> usize {
    let span_ms = (last - first).num_milliseconds();
    let step_ms = interval.num_milliseconds().max(1);
    (span_ms / step_ms) as usize + 1
}

/// For each rostered line, the dates on which some but not all rostered
/// stations reported, with the absent stations in roster order.
pub fn scan_roster_coverage(dataset: &Dataset, roster: &Roster) -> Vec<MissingStations> {
    let mut reported: BTreeMap<(&str, NaiveDate), BTreeSet<&str>> = BTreeMap::new();
    for obs in dataset {
        if let Some(stop) = obs.stop_id.as_deref() {
            reported
                .entry((obs.line_id.as_str(), obs.timestamp.date()))
                .or_default()
                .insert(stop);
        }
    }

    let mut missing = Vec::new();
    for ((line_id, date), stops) in reported {
        let Some(stations) = roster.stations(line_id) else {
            continue;
        };
        let missing_stops: Vec<String> = stations
            .iter()
            .filter(|s| !stops.contains(s.as_str()))
            .cloned()
            .collect();
        if !missing_stops.is_empty() {
            missing.push(MissingStations {
                line_id: line_id.to_string(),
                date,
                missing_stops,
            });
        }
    }
    missing
}
