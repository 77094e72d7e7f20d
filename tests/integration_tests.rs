use ridership_delta::analyzers::types::{ChangeOutcome, Presence};
use ridership_delta::config::{AnalysisConfig, DayFilter, RawConfig, RowPolicy};
use ridership_delta::loader::load_path;
use ridership_delta::model::Scope;
use ridership_delta::output::write_report;
use ridership_delta::pipeline::run_analysis;
use ridership_delta::timestamps::parse_timestamp;
use ridership_delta::AnalysisError;
use std::fs;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn sumner_config() -> RawConfig {
    RawConfig::load(fixture("sumner.toml")).expect("Failed to load fixture config")
}

#[test]
fn test_full_pipeline() {
    let raw = sumner_config();
    let config = raw.resolve().unwrap();
    let outcome = load_path(fixture("blue_line_sample.csv"), &config.load).unwrap();

    assert_eq!(outcome.rows_read, 21);
    assert_eq!(outcome.issues.len(), 1);

    let report = run_analysis(&outcome.dataset, &config).unwrap();

    // roster drops Orange Line and Bowdoin
    assert_eq!(report.line_changes.len(), 1);
    let blue = &report.line_changes[0];
    assert_eq!(blue.scope, Scope::line("Blue Line"));
    assert_eq!(blue.before_total, 4500);
    assert_eq!(blue.after_total, 9520);
    assert_eq!(blue.before_mean, 2250.0);
    assert_eq!(blue.after_mean, 2380.0);
    assert_eq!(blue.percent_change, ChangeOutcome::Percent(5.78));
    assert_eq!(blue.after_observations, 11);

    let stops: Vec<(&str, Option<f64>)> = report
        .stop_changes
        .iter()
        .map(|c| (c.scope.stop_id().unwrap(), c.percent_change.percent()))
        .collect();
    assert_eq!(
        stops,
        vec![
            ("Wonderland", Some(28.95)),
            ("Airport", Some(-1.0)),
            ("Maverick", Some(0.0)),
        ]
    );

    let stop_sum: u64 = report.stop_changes.iter().map(|c| c.after_total).sum();
    assert_eq!(stop_sum, blue.after_total);

    let gaps = report.gaps.as_ref().expect("gap scan configured");
    assert_eq!(gaps.len(), 1);
    let gap = &gaps[0];
    assert_eq!(gap.stop_id.as_deref(), Some("Maverick"));
    assert_eq!(gap.missing_ranges.len(), 1);
    assert_eq!(Some(gap.missing_ranges[0].start), parse_timestamp("2023-07-06"));
    assert_eq!(Some(gap.missing_ranges[0].end), parse_timestamp("2023-07-07"));

    assert_eq!(report.missing_stations.len(), 1);
    assert_eq!(report.missing_stations[0].missing_stops, vec!["Maverick"]);

    let snap = &report.snapshots[0];
    assert_eq!(snap.latest_total, 1400);
    assert_eq!(snap.percent_change, ChangeOutcome::Percent(-37.78));
}

#[test]
fn test_weekdays_only() {
    let mut config = sumner_config().resolve().unwrap();
    config.day_filter = DayFilter::Weekdays;
    let outcome = load_path(fixture("blue_line_sample.csv"), &config.load).unwrap();

    let report = run_analysis(&outcome.dataset, &config).unwrap();
    let blue = &report.line_changes[0];
    assert_eq!(blue.after_total, 8120);
    assert_eq!(blue.percent_change, ChangeOutcome::Percent(20.3));
    // the weekend is not a coverage gap
    assert_eq!(report.gaps.map(|g| g.len()), Some(1));
}

#[test]
fn test_abort_policy_rejects_fixture() {
    let mut raw = sumner_config();
    raw.row_policy = Some(RowPolicy::Abort);

    let err = load_path(fixture("blue_line_sample.csv"), &raw.load_options()).unwrap_err();
    assert!(matches!(err, AnalysisError::MalformedRecord { row: 21, .. }));
}

#[test]
fn test_duplicates_rejected_without_sum_policy() {
    let mut raw = sumner_config();
    raw.duplicate_policy = None;

    let outcome = load_path(fixture("blue_line_sample.csv"), &raw.load_options()).unwrap();
    assert_eq!(outcome.issues.len(), 2);
    assert!(
        outcome
            .issues
            .iter()
            .any(|e| matches!(e, AnalysisError::DuplicateRecord { row: 9, first_row: 8, .. }))
    );
}

#[test]
fn test_json_input_new_scope() {
    let cutover = parse_timestamp("2023-01-15").unwrap();
    let config = AnalysisConfig::new(cutover);
    let outcome = load_path(fixture("two_stops.json"), &config.load).unwrap();

    let report = run_analysis(&outcome.dataset, &config).unwrap();

    let blue = report
        .stop_changes
        .iter()
        .find(|c| c.scope == Scope::stop("Blue", "Stop1"))
        .unwrap();
    assert_eq!(blue.before_total, 100);
    assert_eq!(blue.after_total, 150);
    assert_eq!(blue.percent_change.render(2), "+50.00%");

    let orange = report
        .stop_changes
        .iter()
        .find(|c| c.scope == Scope::stop("Orange", "Stop9"))
        .unwrap();
    assert_eq!(orange.percent_change, ChangeOutcome::New);
    assert_eq!(orange.presence, Presence::AfterOnly);
    // no expected interval: the scan is reported as not run
    assert_eq!(report.gaps, None);
}

#[test]
fn test_write_report_creates_tables() {
    let dir = std::env::temp_dir().join("ridership_delta_integration_report");
    let _ = fs::remove_dir_all(&dir);

    let config = sumner_config().resolve().unwrap();
    let outcome = load_path(fixture("blue_line_sample.csv"), &config.load).unwrap();
    let report = run_analysis(&outcome.dataset, &config).unwrap();

    let written = write_report(&dir, &report, 2, true).unwrap();
    assert_eq!(written.len(), 5);
    for path in &written {
        assert!(path.exists(), "{} missing", path.display());
    }

    let lines = fs::read_to_string(dir.join("line_changes.csv")).unwrap();
    assert_eq!(lines.lines().count(), 2);
    assert!(lines.contains("+5.78%"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("report.json")).unwrap()).unwrap();
    assert_eq!(json["line_changes"][0]["percent_change"]["kind"], "percent");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_cutover_after_all_data_is_an_empty_period() {
    let raw = RawConfig {
        cutover: Some("2024-01-01".to_string()),
        ..Default::default()
    };
    let config = raw.resolve().unwrap();
    let outcome = load_path(fixture("blue_line_sample.csv"), &config.load).unwrap();

    let err = run_analysis(&outcome.dataset, &config).unwrap_err();
    assert!(matches!(err, AnalysisError::EmptyPeriod { .. }));
}

#[test]
fn test_analyze_without_interval_omits_gap_table() {
    let dir = std::env::temp_dir().join("ridership_delta_integration_no_interval");
    let _ = fs::remove_dir_all(&dir);

    let mut raw = sumner_config();
    raw.expected_interval = None;
    let config = raw.resolve().unwrap();
    let outcome = load_path(fixture("blue_line_sample.csv"), &config.load).unwrap();
    let report = run_analysis(&outcome.dataset, &config).unwrap();
    assert!(report.gaps.is_none());

    let written = write_report(&dir, &report, 2, false).unwrap();
    assert_eq!(written.len(), 3);
    assert!(!dir.join("gaps.csv").exists());

    fs::remove_dir_all(&dir).unwrap();
}
