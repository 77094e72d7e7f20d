//! End-to-end analysis run: scope, scan, partition, aggregate, compare.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::analyzers::aggregate::aggregate;
use crate::analyzers::change::compute_changes;
use crate::analyzers::snapshot::latest_day_snapshots;
use crate::analyzers::types::{ChangeResult, Granularity, LatestDaySnapshot};
use crate::cleaning::{apply_day_filter, restrict_to_roster};
use crate::config::{AnalysisConfig, Roster};
use crate::error::Result;
use crate::model::{Dataset, Period};
use crate::partition::partition_within;
use crate::quality::{GapRecord, MissingStations, scan_gaps, scan_roster_coverage};

/// Everything one run produces. Gap findings and change results are
/// independent: a gap never suppresses or alters a change result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub cutover: NaiveDateTime,
    pub before: Period,
    pub after: Period,
    pub before_span: Option<(NaiveDateTime, NaiveDateTime)>,
    pub after_span: Option<(NaiveDateTime, NaiveDateTime)>,
    /// Observations outside the analysis window.
    pub excluded: usize,
    pub line_changes: Vec<ChangeResult>,
    pub stop_changes: Vec<ChangeResult>,
    pub snapshots: Vec<LatestDaySnapshot>,
    /// `None` when no expected interval was configured and the scan did not
    /// run; `Some(vec![])` means it ran and found nothing.
    pub gaps: Option<Vec<GapRecord>>,
    pub missing_stations: Vec<MissingStations>,
}

impl AnalysisReport {
    pub fn low_confidence_count(&self) -> usize {
        self.line_changes
            .iter()
            .chain(&self.stop_changes)
            .filter(|c| c.low_confidence)
            .count()
    }
}

/// Runs the whole analysis over an already loaded dataset.
///
/// Gap and roster-coverage scans see the roster-scoped dataset before the day
/// filter; the comparison sees it after. Fails only on structural problems
/// (an empty period or an invalid window), never on data gaps.
#[tracing::instrument(skip_all, fields(cutover = %config.cutover, observations = dataset.len()))]
pub fn run_analysis(dataset: &Dataset, config: &AnalysisConfig) -> Result<AnalysisReport> {
    let scoped = restrict_to_roster(dataset, &config.roster);

    let gaps = match &config.gap_scan {
        Some(gap_config) => Some(scan_gaps(&scoped, gap_config)),
        None => {
            warn!("No expected interval configured, gap scan skipped");
            None
        }
    };
    let missing_stations = scan_roster_coverage(&scoped, &config.roster);

    let analysed = apply_day_filter(&scoped, config.day_filter);
    let partition = partition_within(&analysed, config.cutover, &config.window)?;

    let line_changes = compute_changes(
        &aggregate(&partition.before, Granularity::Line),
        &aggregate(&partition.after, Granularity::Line),
        &config.change,
    );
    let mut stop_changes = compute_changes(
        &aggregate(&partition.before, Granularity::Stop),
        &aggregate(&partition.after, Granularity::Stop),
        &config.change,
    );
    order_by_roster(&mut stop_changes, &config.roster);

    let snapshots = latest_day_snapshots(&partition, config.change.rounding_precision);

    let report = AnalysisReport {
        cutover: config.cutover,
        before: partition.before.period,
        after: partition.after.period,
        before_span: partition.before.observed_span(),
        after_span: partition.after.observed_span(),
        excluded: partition.excluded,
        line_changes,
        stop_changes,
        snapshots,
        gaps,
        missing_stations,
    };

    let low_confidence = report.low_confidence_count();
    if low_confidence > 0 {
        warn!(
            low_confidence,
            min_observations = config.change.min_observations,
            "Some results rest on too few observations"
        );
    }
    info!(
        lines = report.line_changes.len(),
        stops = report.stop_changes.len(),
        gaps = ?report.gaps.as_ref().map(Vec::len),
        missing_station_days = report.missing_stations.len(),
        "Analysis complete"
    );

    Ok(report)
}

/// Lines in lexical order; within a line, rostered stations in roster order,
/// then the rest by name.
fn order_by_roster(changes: &mut [ChangeResult], roster: &Roster) {
    changes.sort_by(|a, b| {
        let key = |c: &ChangeResult| {
            let line = c.scope.line_id().to_string();
            let stop = c.scope.stop_id().unwrap_or_default().to_string();
            let pos = roster.station_position(&line, &stop).unwrap_or(usize::MAX);
            (line, pos, stop)
        };
        key(a).cmp(&key(b))
    });
}
