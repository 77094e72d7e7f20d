//! Analysis configuration.
//!
//! Every component receives the slice of configuration it needs as an explicit
//! argument. [`RawConfig`] is the loosely-typed layer read from a TOML file
//! (and from CLI flags), which [`RawConfig::resolve`] validates into an
//! [`AnalysisConfig`].
//!
//! ```toml
//! cutover = "2023-07-05"
//! expected_interval = "1d"
//! basis = "daily-mean"
//!
//! [[lines]]
//! id = "Blue Line"
//! stations = ["Wonderland", "Revere Beach"]
//! ```

use chrono::{Duration, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::timestamps::{parse_interval, parse_timestamp};

const MAX_ROUNDING_PRECISION: u32 = 9;

/// What to do with a row that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RowPolicy {
    /// Drop the row, record the issue, keep loading.
    #[default]
    Skip,
    /// Fail the whole run on the first bad row.
    Abort,
}

/// How repeated `(line, stop, timestamp)` keys are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Treat the repeat as a row error (subject to [`RowPolicy`]).
    #[default]
    Reject,
    /// Keep the first occurrence and silently drop the rest.
    KeepFirst,
    /// Merge repeats into one observation by adding their counts.
    Sum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub row_policy: RowPolicy,
    pub duplicate_policy: DuplicatePolicy,
}

/// Expected sampling cadence for the gap scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapScanConfig {
    pub expected_interval: Duration,
    pub tolerance: Duration,
    threshold: Duration,
}

impl GapScanConfig {
    /// `tolerance` defaults to half the expected interval.
    pub fn new(expected_interval: Duration, tolerance: Option<Duration>) -> Result<Self> {
        if expected_interval <= Duration::zero() {
            return Err(AnalysisError::InvalidConfig(
                "expected_interval must be positive".to_string(),
            ));
        }
        let tolerance = tolerance.unwrap_or(expected_interval / 2);
        if tolerance < Duration::zero() {
            return Err(AnalysisError::InvalidConfig(
                "gap_tolerance must not be negative".to_string(),
            ));
        }
        let threshold = expected_interval.checked_add(&tolerance).ok_or_else(|| {
            AnalysisError::InvalidConfig(
                "expected_interval plus gap_tolerance is out of range".to_string(),
            )
        })?;
        Ok(GapScanConfig {
            expected_interval,
            tolerance,
            threshold,
        })
    }

    /// Largest spacing between consecutive samples that is not a gap.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// Which value the before/after comparison is made on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeBasis {
    /// Period totals.
    #[default]
    Total,
    /// Total divided by the number of distinct timestamps (service days).
    DailyMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeConfig {
    pub rounding_precision: u32,
    pub min_observations: usize,
    pub basis: ChangeBasis,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            rounding_precision: 2,
            min_observations: 1,
            basis: ChangeBasis::Total,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DayFilter {
    #[default]
    All,
    Weekdays,
}

/// Optional outer bounds `[start, end)` of the analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl AnalysisWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts < e)
    }

    /// The cutover must fall strictly inside the window, otherwise one side
    /// is empty by construction.
    pub fn validate(&self, cutover: NaiveDateTime) -> Result<()> {
        if let Some(start) = self.start {
            if start >= cutover {
                return Err(AnalysisError::InvalidConfig(format!(
                    "window_start {start} is not before cutover {cutover}"
                )));
            }
        }
        if let Some(end) = self.end {
            if end <= cutover {
                return Err(AnalysisError::InvalidConfig(format!(
                    "window_end {end} is not after cutover {cutover}"
                )));
            }
        }
        Ok(())
    }
}

/// The stations analysed on one line, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LineRoster {
    pub id: String,
    pub stations: Vec<String>,
}

/// Station lists per line. Empty means "analyse everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    lines: Vec<LineRoster>,
}

impl Roster {
    pub fn new(lines: Vec<LineRoster>) -> Self {
        Roster { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stations(&self, line_id: &str) -> Option<&[String]> {
        self.lines
            .iter()
            .find(|l| l.id == line_id)
            .map(|l| l.stations.as_slice())
    }

    pub fn station_position(&self, line_id: &str, stop_id: &str) -> Option<usize> {
        self.stations(line_id)?.iter().position(|s| s == stop_id)
    }
}

/// Fully validated configuration for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub cutover: NaiveDateTime,
    pub window: AnalysisWindow,
    pub load: LoadOptions,
    /// `None` skips the gap scan.
    pub gap_scan: Option<GapScanConfig>,
    pub change: ChangeConfig,
    pub day_filter: DayFilter,
    pub roster: Roster,
}

impl AnalysisConfig {
    pub fn new(cutover: NaiveDateTime) -> Self {
        AnalysisConfig {
            cutover,
            window: AnalysisWindow::unbounded(),
            load: LoadOptions::default(),
            gap_scan: None,
            change: ChangeConfig::default(),
            day_filter: DayFilter::All,
            roster: Roster::default(),
        }
    }
}

/// Unvalidated configuration as written in a TOML file or passed on the
/// command line. Timestamps and intervals stay strings until
/// [`resolve`](Self::resolve).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub cutover: Option<String>,
    pub expected_interval: Option<String>,
    pub gap_tolerance: Option<String>,
    pub min_observations: Option<usize>,
    pub rounding_precision: Option<u32>,
    pub basis: Option<ChangeBasis>,
    pub row_policy: Option<RowPolicy>,
    pub duplicate_policy: Option<DuplicatePolicy>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub day_filter: Option<DayFilter>,
    #[serde(default)]
    pub lines: Vec<LineRoster>,
}

impl RawConfig {
    /// Loads the config from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), lines = raw.lines.len(), "Loaded config file");
        Ok(raw)
    }

    /// Layers `overrides` on top of `self`; set fields in `overrides` win.
    /// A non-empty roster in `overrides` replaces the whole roster.
    pub fn merge(self, overrides: RawConfig) -> RawConfig {
        RawConfig {
            cutover: overrides.cutover.or(self.cutover),
            expected_interval: overrides.expected_interval.or(self.expected_interval),
            gap_tolerance: overrides.gap_tolerance.or(self.gap_tolerance),
            min_observations: overrides.min_observations.or(self.min_observations),
            rounding_precision: overrides.rounding_precision.or(self.rounding_precision),
            basis: overrides.basis.or(self.basis),
            row_policy: overrides.row_policy.or(self.row_policy),
            duplicate_policy: overrides.duplicate_policy.or(self.duplicate_policy),
            window_start: overrides.window_start.or(self.window_start),
            window_end: overrides.window_end.or(self.window_end),
            day_filter: overrides.day_filter.or(self.day_filter),
            lines: if overrides.lines.is_empty() {
                self.lines
            } else {
                overrides.lines
            },
        }
    }

    /// Load options only; used by commands that never partition.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            row_policy: self.row_policy.unwrap_or_default(),
            duplicate_policy: self.duplicate_policy.unwrap_or_default(),
        }
    }

    /// Gap-scan settings, or `None` when no interval is configured.
    pub fn gap_scan(&self) -> Result<Option<GapScanConfig>> {
        let Some(interval) = self.expected_interval.as_deref() else {
            return Ok(None);
        };
        let interval = interval_field("expected_interval", interval)?;
        let tolerance = self
            .gap_tolerance
            .as_deref()
            .map(|t| interval_field("gap_tolerance", t))
            .transpose()?;
        GapScanConfig::new(interval, tolerance).map(Some)
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.lines.clone())
    }

    pub fn resolve(&self) -> Result<AnalysisConfig> {
        let cutover = self
            .cutover
            .as_deref()
            .ok_or_else(|| AnalysisError::InvalidConfig("cutover is required".to_string()))
            .and_then(|raw| timestamp_field("cutover", raw))?;

        let window = AnalysisWindow {
            start: self
                .window_start
                .as_deref()
                .map(|raw| timestamp_field("window_start", raw))
                .transpose()?,
            end: self
                .window_end
                .as_deref()
                .map(|raw| timestamp_field("window_end", raw))
                .transpose()?,
        };
        window.validate(cutover)?;

        let defaults = ChangeConfig::default();
        let change = ChangeConfig {
            rounding_precision: self.rounding_precision.unwrap_or(defaults.rounding_precision),
            min_observations: self.min_observations.unwrap_or(defaults.min_observations),
            basis: self.basis.unwrap_or(defaults.basis),
        };
        if change.rounding_precision > MAX_ROUNDING_PRECISION {
            return Err(AnalysisError::InvalidConfig(format!(
                "rounding_precision must be at most {MAX_ROUNDING_PRECISION}"
            )));
        }

        Ok(AnalysisConfig {
            cutover,
            window,
            load: self.load_options(),
            gap_scan: self.gap_scan()?,
            change,
            day_filter: self.day_filter.unwrap_or_default(),
            roster: self.roster(),
        })
    }
}

fn timestamp_field(name: &str, raw: &str) -> Result<NaiveDateTime> {
    parse_timestamp(raw)
        .ok_or_else(|| AnalysisError::InvalidConfig(format!("{name}: unrecognized timestamp '{raw}'")))
}

fn interval_field(name: &str, raw: &str) -> Result<Duration> {
    parse_interval(raw)
        .ok_or_else(|| AnalysisError::InvalidConfig(format!("{name}: unrecognized interval '{raw}'")))
}
