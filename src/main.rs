//! CLI entry point for the ridership before/after analysis.
//!
//! Provides subcommands for the full analysis, a standalone coverage-gap
//! scan, and input validation.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ridership_delta::cleaning::restrict_to_roster;
use ridership_delta::config::{ChangeBasis, DayFilter, DuplicatePolicy, RawConfig, RowPolicy};
use ridership_delta::loader::{LoadOutcome, load_path};
use ridership_delta::output::{log_summary, write_gaps_csv, write_report};
use ridership_delta::pipeline::run_analysis;
use ridership_delta::quality::scan_gaps;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Issues beyond this many are summarized instead of logged one by one.
const MAX_LOGGED_ISSUES: usize = 20;

#[derive(Parser)]
#[command(name = "ridership_delta")]
#[command(about = "Compare transit ridership before and after a cutover date", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Ridership export (.csv or .json, optionally .gz)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// TOML config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip bad rows or abort on the first one
    #[arg(long, value_enum)]
    row_policy: Option<RowPolicy>,

    /// How repeated (line, stop, timestamp) rows are handled
    #[arg(long, value_enum)]
    duplicate_policy: Option<DuplicatePolicy>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full before/after analysis and write the report tables
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Cutover timestamp, e.g. 2023-07-05
        #[arg(long)]
        cutover: Option<String>,

        /// Expected sampling interval for the gap scan, e.g. 1d
        #[arg(long)]
        interval: Option<String>,

        /// Extra slack before a gap is reported (default: half the interval)
        #[arg(long)]
        tolerance: Option<String>,

        /// Minimum observations per side before a result counts as confident
        #[arg(long)]
        min_observations: Option<usize>,

        /// Decimal places for percentages and means
        #[arg(long)]
        precision: Option<u32>,

        /// Compare period totals or per-day means
        #[arg(long, value_enum)]
        basis: Option<ChangeBasis>,

        /// Start of the analysis window (inclusive)
        #[arg(long)]
        window_start: Option<String>,

        /// End of the analysis window (exclusive)
        #[arg(long)]
        window_end: Option<String>,

        /// Only compare weekday service
        #[arg(long, default_value_t = false)]
        weekdays_only: bool,

        /// Directory for the CSV tables
        #[arg(short, long, default_value = "reports")]
        out_dir: PathBuf,

        /// Also write the full report as report.json
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report coverage gaps only
    ScanGaps {
        #[command(flatten)]
        input: InputArgs,

        /// Expected sampling interval, e.g. 1d
        #[arg(long)]
        interval: Option<String>,

        /// Extra slack before a gap is reported (default: half the interval)
        #[arg(long)]
        tolerance: Option<String>,

        /// CSV file to write gaps to
        #[arg(short, long, default_value = "gaps.csv")]
        output: PathBuf,
    },
    /// Load the input and report row problems without analysing
    Validate {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/ridership_delta.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ridership_delta.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            cutover,
            interval,
            tolerance,
            min_observations,
            precision,
            basis,
            window_start,
            window_end,
            weekdays_only,
            out_dir,
            json,
        } => {
            let overrides = RawConfig {
                cutover,
                expected_interval: interval,
                gap_tolerance: tolerance,
                min_observations,
                rounding_precision: precision,
                basis,
                window_start,
                window_end,
                day_filter: weekdays_only.then_some(DayFilter::Weekdays),
                ..input.overrides()
            };
            let raw = input.raw_config(overrides)?;
            let config = raw.resolve().context("Invalid configuration")?;

            let outcome = load(&input.input, &raw)?;
            let report = run_analysis(&outcome.dataset, &config).context("Analysis failed")?;

            let precision = config.change.rounding_precision;
            log_summary(&report, precision);
            write_report(&out_dir, &report, precision, json)
                .with_context(|| format!("Failed to write report to {}", out_dir.display()))?;
        }
        Commands::ScanGaps {
            input,
            interval,
            tolerance,
            output,
        } => {
            let overrides = RawConfig {
                expected_interval: interval,
                gap_tolerance: tolerance,
                ..input.overrides()
            };
            let raw = input.raw_config(overrides)?;
            let gap_config = raw
                .gap_scan()
                .context("Invalid gap scan configuration")?
                .context("An expected interval is required (--interval or expected_interval)")?;

            let outcome = load(&input.input, &raw)?;
            let scoped = restrict_to_roster(&outcome.dataset, &raw.roster());
            let gaps = scan_gaps(&scoped, &gap_config);

            for gap in &gaps {
                warn!(
                    line = %gap.line_id,
                    stop = gap.stop_id.as_deref().unwrap_or("-"),
                    ranges = gap.missing_ranges.len(),
                    coverage = gap.observed_coverage.ratio(),
                    "Coverage gap"
                );
            }
            write_gaps_csv(&output, &gaps)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!(output = %output.display(), gaps = gaps.len(), "Gap report written");
        }
        Commands::Validate { input } => {
            let overrides = input.overrides();
            let raw = input.raw_config(overrides)?;
            let outcome = load(&input.input, &raw)?;

            let dataset = &outcome.dataset;
            if let Some((first, last)) = dataset.time_span() {
                info!(
                    observations = dataset.len(),
                    lines = ?dataset.line_ids(),
                    first = %first,
                    last = %last,
                    "Dataset summary"
                );
            }
            if outcome.issues.is_empty() {
                info!("No row issues found");
            }
        }
    }

    Ok(())
}

impl InputArgs {
    fn overrides(&self) -> RawConfig {
        RawConfig {
            row_policy: self.row_policy,
            duplicate_policy: self.duplicate_policy,
            ..Default::default()
        }
    }

    /// The config file (if any) with `overrides` layered on top.
    fn raw_config(&self, overrides: RawConfig) -> Result<RawConfig> {
        let base = match &self.config {
            Some(path) => RawConfig::load(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?,
            None => RawConfig::default(),
        };
        Ok(base.merge(overrides))
    }
}

/// Loads the input and logs any skipped rows.
fn load(input: &Path, raw: &RawConfig) -> Result<LoadOutcome> {
    let outcome = load_path(input, &raw.load_options())
        .with_context(|| format!("Failed to load {}", input.display()))?;

    for issue in outcome.issues.iter().take(MAX_LOGGED_ISSUES) {
        warn!(issue = %issue, "Row issue");
    }
    if outcome.issues.len() > MAX_LOGGED_ISSUES {
        warn!(
            omitted = outcome.issues.len() - MAX_LOGGED_ISSUES,
            "Further row issues not shown"
        );
    }
    Ok(outcome)
}
