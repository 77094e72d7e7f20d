//! Data types used by the aggregation pipeline.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::ChangeBasis;
use crate::model::{PeriodLabel, Scope};

/// Aggregation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// One bucket per line, summed across all of its stops.
    Line,
    /// One bucket per (line, stop) pair.
    Stop,
}

/// Ridership rolled up for one scope within one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateBucket {
    pub scope: Scope,
    pub period: PeriodLabel,
    pub total_riders: u64,
    /// Observations that contributed to `total_riders`.
    pub observation_count: usize,
    /// Distinct timestamps among those observations.
    pub sample_count: usize,
}

impl AggregateBucket {
    pub fn mean_per_sample(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.total_riders as f64 / self.sample_count as f64
        }
    }

    /// The value compared across the cutover under `basis`.
    pub fn value(&self, basis: ChangeBasis) -> f64 {
        match basis {
            ChangeBasis::Total => self.total_riders as f64,
            ChangeBasis::DailyMean => self.mean_per_sample(),
        }
    }

    pub fn is_confident(&self, min_observations: usize) -> bool {
        self.observation_count >= min_observations
    }
}

pub type BucketMap = BTreeMap<Scope, AggregateBucket>;

/// Percent change, or the marker used when no percentage is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Percent(f64),
    /// The before value is zero.
    NoBaseline,
    /// The scope only appears after the cutover.
    New,
    /// The scope stopped reporting at the cutover.
    Discontinued,
}

impl ChangeOutcome {
    pub fn percent(&self) -> Option<f64> {
        match self {
            ChangeOutcome::Percent(p) => Some(*p),
            _ => None,
        }
    }

    /// Renders with a fixed number of decimals, e.g. `+50.00%`.
    pub fn render(&self, precision: u32) -> String {
        match self {
            ChangeOutcome::Percent(p) => format!("{:+.*}%", precision as usize, p),
            ChangeOutcome::NoBaseline => "no baseline".to_string(),
            ChangeOutcome::New => "new".to_string(),
            ChangeOutcome::Discontinued => "discontinued".to_string(),
        }
    }
}

impl fmt::Display for ChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(2))
    }
}

/// Which periods a scope reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Both,
    BeforeOnly,
    AfterOnly,
}

/// Before/after comparison for one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    pub scope: Scope,
    pub basis: ChangeBasis,
    pub before_total: u64,
    pub after_total: u64,
    pub before_observations: usize,
    pub after_observations: usize,
    pub before_mean: f64,
    pub after_mean: f64,
    /// `after - before` on the chosen basis.
    pub differential: f64,
    pub percent_change: ChangeOutcome,
    /// Either side has fewer observations than the configured minimum.
    pub low_confidence: bool,
    pub presence: Presence,
}

/// The most recent day's line total against the before-period daily mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestDaySnapshot {
    pub line_id: String,
    pub latest: NaiveDateTime,
    pub latest_total: u64,
    pub before_daily_mean: f64,
    pub percent_change: ChangeOutcome,
}
