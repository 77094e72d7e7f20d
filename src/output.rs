//! Output formatting and persistence for analysis results.
//!
//! Supports a logged summary, JSON export of the full report, and CSV tables.
//! Files are written to a temporary sibling and renamed into place so a
//! failed run never leaves a half-written table behind.

use chrono::NaiveDateTime;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::analyzers::types::{ChangeResult, LatestDaySnapshot};
use crate::error::Result;
use crate::pipeline::AnalysisReport;
use crate::quality::{GapRecord, MissingStations};
use crate::timestamps::format_interval;

/// Flat CSV row for a [`ChangeResult`].
#[derive(Debug, Serialize)]
pub struct ChangeRow<'a> {
    pub line: &'a str,
    pub stop: Option<&'a str>,
    pub before_total: u64,
    pub after_total: u64,
    pub before_mean: f64,
    pub after_mean: f64,
    pub differential: f64,
    pub percent_change: String,
    pub before_observations: usize,
    pub after_observations: usize,
    pub low_confidence: bool,
}

impl<'a> ChangeRow<'a> {
    pub fn from_result(result: &'a ChangeResult, precision: u32) -> Self {
        ChangeRow {
            line: result.scope.line_id(),
            stop: result.scope.stop_id(),
            before_total: result.before_total,
            after_total: result.after_total,
            before_mean: result.before_mean,
            after_mean: result.after_mean,
            differential: result.differential,
            percent_change: result.percent_change.render(precision),
            before_observations: result.before_observations,
            after_observations: result.after_observations,
            low_confidence: result.low_confidence,
        }
    }
}

/// One CSV row per missing range of a [`GapRecord`].
#[derive(Debug, Serialize)]
pub struct GapRow<'a> {
    pub line: &'a str,
    pub stop: Option<&'a str>,
    pub expected_interval: String,
    pub missing_start: NaiveDateTime,
    pub missing_end: NaiveDateTime,
    pub missing: String,
    pub coverage_ratio: f64,
}

pub fn gap_rows(gaps: &[GapRecord]) -> Vec<GapRow<'_>> {
    gaps.iter()
        .flat_map(|gap| {
            gap.missing_ranges.iter().map(move |range| GapRow {
                line: &gap.line_id,
                stop: gap.stop_id.as_deref(),
                expected_interval: format_interval(gap.expected_interval),
                missing_start: range.start,
                missing_end: range.end,
                missing: format_interval(range.duration()),
                coverage_ratio: gap.observed_coverage.ratio(),
            })
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct MissingStationsRow<'a> {
    pub line: &'a str,
    pub date: String,
    pub missing_stops: String,
}

fn missing_station_rows(missing: &[MissingStations]) -> Vec<MissingStationsRow<'_>> {
    missing
        .iter()
        .map(|m| MissingStationsRow {
            line: &m.line_id,
            date: m.date.format("%Y-%m-%d").to_string(),
            missing_stops: m.missing_stops.join("; "),
        })
        .collect()
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `rows` as a CSV table with a header row, replacing any existing file.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let tmp = tmp_sibling(path);
    write_table(&tmp, rows)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote CSV table");
    Ok(())
}

fn change_rows(changes: &[ChangeResult], precision: u32) -> Vec<ChangeRow<'_>> {
    changes
        .iter()
        .map(|c| ChangeRow::from_result(c, precision))
        .collect()
}

pub fn write_changes_csv(path: &Path, changes: &[ChangeResult], precision: u32) -> Result<()> {
    write_rows(path, &change_rows(changes, precision))
}

pub fn write_gaps_csv(path: &Path, gaps: &[GapRecord]) -> Result<()> {
    write_rows(path, &gap_rows(gaps))
}

/// Writes every table of `report` into `dir`; returns the paths written.
///
/// All files are first written to temporary siblings and only renamed into
/// place once every one of them succeeded, so a failed run leaves the tables
/// of the previous run untouched. `gaps.csv` is only written when the gap
/// scan ran; a stale one from an earlier run is removed otherwise.
pub fn write_report(
    dir: &Path,
    report: &AnalysisReport,
    precision: u32,
    with_json: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut staged = Vec::new();
    if let Err(e) = stage_report(dir, report, precision, with_json, &mut staged) {
        for (tmp, _) in &staged {
            let _ = fs::remove_file(tmp);
        }
        return Err(e);
    }

    let gaps_path = dir.join(GAPS_FILE);
    if report.gaps.is_none() && gaps_path.exists() {
        fs::remove_file(&gaps_path)?;
        warn!(path = %gaps_path.display(), "Removed gap table of an earlier run");
    }

    let mut written = Vec::with_capacity(staged.len());
    for (tmp, path) in staged {
        fs::rename(&tmp, &path)?;
        written.push(path);
    }

    info!(dir = %dir.display(), files = written.len(), "Report written");
    Ok(written)
}

const GAPS_FILE: &str = "gaps.csv";

/// Writes each table to its temporary sibling, recording `(tmp, final)`
/// pairs in `staged` as it goes.
fn stage_report(
    dir: &Path,
    report: &AnalysisReport,
    precision: u32,
    with_json: bool,
    staged: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<()> {
    stage(staged, dir.join("line_changes.csv"), |tmp| {
        write_table(tmp, &change_rows(&report.line_changes, precision))
    })?;
    stage(staged, dir.join("stop_changes.csv"), |tmp| {
        write_table(tmp, &change_rows(&report.stop_changes, precision))
    })?;
    if let Some(gaps) = &report.gaps {
        stage(staged, dir.join(GAPS_FILE), |tmp| write_table(tmp, &gap_rows(gaps)))?;
    }
    stage(staged, dir.join("missing_stations.csv"), |tmp| {
        write_table(tmp, &missing_station_rows(&report.missing_stations))
    })?;
    if with_json {
        stage(staged, dir.join("report.json"), |tmp| {
            fs::write(tmp, serde_json::to_vec_pretty(report)?)?;
            Ok(())
        })?;
    }
    Ok(())
}

fn stage<F>(staged: &mut Vec<(PathBuf, PathBuf)>, path: PathBuf, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = tmp_sibling(&path);
    staged.push((tmp.clone(), path));
    write(&tmp)
}

/// Logs the headline numbers of a report.
pub fn log_summary(report: &AnalysisReport, precision: u32) {
    if let (Some((b0, b1)), Some((a0, a1))) = (report.before_span, report.after_span) {
        info!(
            before = %format!("{} - {}", b0.date(), b1.date()),
            after = %format!("{} - {}", a0.date(), a1.date()),
            "Dates included"
        );
    }

    for change in &report.line_changes {
        info!(
            line = change.scope.line_id(),
            before = change.before_total,
            after = change.after_total,
            change = %change.percent_change.render(precision),
            low_confidence = change.low_confidence,
            "Line ridership"
        );
    }
    for change in &report.stop_changes {
        debug!(
            scope = %change.scope,
            before_mean = change.before_mean,
            after_mean = change.after_mean,
            change = %change.percent_change.render(precision),
            "Stop ridership"
        );
    }
    for snap in &report.snapshots {
        log_snapshot(snap, precision);
    }
    for missing in &report.missing_stations {
        info!(
            line = %missing.line_id,
            date = %missing.date,
            stops = %missing.missing_stops.join(", "),
            "Missing station data"
        );
    }
}

fn log_snapshot(snap: &LatestDaySnapshot, precision: u32) {
    info!(
        line = %snap.line_id,
        latest = %snap.latest.date(),
        total = snap.latest_total,
        before_daily_mean = snap.before_daily_mean,
        change = %snap.percent_change.render(precision),
        "Most recent day"
    );
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::types::{ChangeOutcome, Presence};
    use crate::config::ChangeBasis;
    use crate::model::{Period, PeriodLabel, Scope};
    use crate::quality::{Coverage, MissingRange};
    use chrono::{Duration, NaiveDate};
    use std::env;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir); // clean up any prior run
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn change(scope: Scope, outcome: ChangeOutcome) -> ChangeResult {
        ChangeResult {
            scope,
            basis: ChangeBasis::Total,
            before_total: 100,
            after_total: 150,
            before_observations: 1,
            after_observations: 1,
            before_mean: 100.0,
            after_mean: 150.0,
            differential: 50.0,
            percent_change: outcome,
            low_confidence: false,
            presence: Presence::Both,
        }
    }

    fn report(gaps: Option<Vec<GapRecord>>) -> AnalysisReport {
        AnalysisReport {
            cutover: ts(5),
            before: Period {
                label: PeriodLabel::Before,
                start: None,
                end: Some(ts(5)),
            },
            after: Period {
                label: PeriodLabel::After,
                start: Some(ts(5)),
                end: None,
            },
            before_span: Some((ts(1), ts(4))),
            after_span: Some((ts(5), ts(9))),
            excluded: 0,
            line_changes: vec![change(Scope::line("Blue Line"), ChangeOutcome::Percent(50.0))],
            stop_changes: vec![change(
                Scope::stop("Blue Line", "Airport"),
                ChangeOutcome::Discontinued,
            )],
            snapshots: Vec::new(),
            gaps,
            missing_stations: Vec::new(),
        }
    }

    #[test]
    fn test_write_changes_csv() {
        let dir = temp_dir("ridership_delta_test_changes");
        let path = dir.join("changes.csv");

        let changes = vec![
            change(Scope::line("Blue Line"), ChangeOutcome::Percent(50.0)),
            change(Scope::stop("Blue Line", "Airport"), ChangeOutcome::New),
        ];
        write_changes_csv(&path, &changes, 2).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("line,stop,before_total"));
        assert!(lines[1].starts_with("Blue Line,,100,150"));
        assert!(lines[1].contains("+50.00%"));
        assert!(lines[2].contains(",new,"));
        assert!(!dir.join("changes.csv.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_gap_rows_one_per_range() {
        let gap = GapRecord {
            line_id: "Blue Line".to_string(),
            stop_id: Some("Airport".to_string()),
            expected_interval: Duration::days(1),
            observed_coverage: Coverage {
                first: ts(1),
                last: ts(10),
                observations: 5,
                expected_observations: 10,
            },
            missing_ranges: vec![
                MissingRange {
                    start: ts(2),
                    end: ts(4),
                },
                MissingRange {
                    start: ts(6),
                    end: ts(9),
                },
            ],
        };
        let gaps = [gap];
        let rows = gap_rows(&gaps);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].missing, "2d");
        assert_eq!(rows[1].missing, "3d");
        assert_eq!(rows[1].expected_interval, "1d");
        assert_eq!(rows[0].coverage_ratio, 0.5);
    }

    #[test]
    fn test_write_rows_replaces_existing_file() {
        let dir = temp_dir("ridership_delta_test_replace");
        let path = dir.join("missing.csv");
        fs::write(&path, "stale contents\nmore\nand more\n").unwrap();

        let missing = vec![MissingStations {
            line_id: "Orange Line".to_string(),
            date: ts(3).date(),
            missing_stops: vec!["Haymarket".to_string(), "State Street".to_string()],
        }];
        write_rows(&path, &missing_station_rows(&missing)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("Haymarket; State Street"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_write_keeps_previous_tables() {
        let dir = temp_dir("ridership_delta_test_staged");
        fs::write(dir.join("line_changes.csv"), "stale\n").unwrap();
        // a directory where the gap table's temp file should go
        fs::create_dir(dir.join("gaps.csv.tmp")).unwrap();

        assert!(write_report(&dir, &report(Some(Vec::new())), 2, true).is_err());

        assert_eq!(fs::read_to_string(dir.join("line_changes.csv")).unwrap(), "stale\n");
        assert!(!dir.join("stop_changes.csv").exists());
        assert!(!dir.join("line_changes.csv.tmp").exists());
        assert!(!dir.join("stop_changes.csv.tmp").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_skipped_gap_scan_writes_no_gap_table() {
        let dir = temp_dir("ridership_delta_test_no_gap_scan");
        fs::write(dir.join("gaps.csv"), "line,stop\nold,row\n").unwrap();

        let written = write_report(&dir, &report(None), 2, false).unwrap();

        assert_eq!(written.len(), 3);
        assert!(!dir.join("gaps.csv").exists());
        let stops = fs::read_to_string(dir.join("stop_changes.csv")).unwrap();
        assert!(stops.contains(",discontinued,"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report_with_gap_scan_writes_all_tables() {
        let dir = temp_dir("ridership_delta_test_all_tables");

        let written = write_report(&dir, &report(Some(Vec::new())), 2, true).unwrap();

        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|p| p.exists()));
        assert!(dir.join("gaps.csv").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
