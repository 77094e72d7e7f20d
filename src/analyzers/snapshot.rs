use crate::analyzers::aggregate::{broken_down_by_stop, counts_toward_line};
use crate::analyzers::change::change_outcome;
use crate::analyzers::types::{ChangeOutcome, LatestDaySnapshot};
use crate::analyzers::utility::{mean, round_to};
use crate::partition::{Partition, PeriodSubset};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Line totals per timestamp, counted the same way as line buckets.
fn daily_line_totals(subset: &PeriodSubset) -> BTreeMap<&str, BTreeMap<NaiveDateTime, u64>> {
    let broken_down = broken_down_by_stop(&subset.observations);
    let mut totals: BTreeMap<&str, BTreeMap<NaiveDateTime, u64>> = BTreeMap::new();
    for obs in &subset.observations {
        if !counts_toward_line(obs, &broken_down) {
            continue;
        }
        let day = totals
            .entry(obs.line_id.as_str())
            .or_default()
            .entry(obs.timestamp)
            .or_default();
        *day = day.saturating_add(obs.rider_count);
    }
    totals
}

/// For each line reporting after the cutover, compares its most recent
/// day's total against the mean daily total before the cutover.
pub fn latest_day_snapshots(partition: &Partition, precision: u32) -> Vec<LatestDaySnapshot> {
    let before = daily_line_totals(&partition.before);
    let after = daily_line_totals(&partition.after);

    after
        .into_iter()
        .filter_map(|(line_id, days)| {
            let (&latest, &latest_total) = days.iter().next_back()?;

            let (before_daily_mean, percent_change) = match before.get(line_id) {
                Some(before_days) => {
                    let values: Vec<f64> = before_days.values().map(|&v| v as f64).collect();
                    let avg = mean(&values);
                    (avg, change_outcome(avg, latest_total as f64, precision))
                }
                None => (0.0, ChangeOutcome::New),
            };

            Some(LatestDaySnapshot {
                line_id: line_id.to_string(),
                latest,
                latest_total,
                before_daily_mean: round_to(before_daily_mean, precision),
                percent_change,
            })
        })
        .collect()
}
