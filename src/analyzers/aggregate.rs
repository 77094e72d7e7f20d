use crate::analyzers::types::{AggregateBucket, BucketMap, Granularity};
use crate::model::{Observation, Scope};
use crate::partition::PeriodSubset;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Accumulator {
    total: u64,
    observations: usize,
    samples: BTreeSet<NaiveDateTime>,
}

/// The (line, timestamp) pairs that carry at least one stop record.
pub(crate) fn broken_down_by_stop(observations: &[Observation]) -> BTreeSet<(&str, NaiveDateTime)> {
    observations
        .iter()
        .filter(|o| o.stop_id.is_some())
        .map(|o| (o.line_id.as_str(), o.timestamp))
        .collect()
}

/// Stop records always count toward their line. A line-level record counts
/// only when the line has no stop records at that timestamp, otherwise the
/// same riders would be counted twice.
pub(crate) fn counts_toward_line(
    obs: &Observation,
    broken_down: &BTreeSet<(&str, NaiveDateTime)>,
) -> bool {
    obs.stop_id.is_some() || !broken_down.contains(&(obs.line_id.as_str(), obs.timestamp))
}

fn scope_of(
    obs: &Observation,
    granularity: Granularity,
    broken_down: &BTreeSet<(&str, NaiveDateTime)>,
) -> Option<Scope> {
    match granularity {
        Granularity::Line => {
            counts_toward_line(obs, broken_down).then(|| Scope::line(&obs.line_id))
        }
        Granularity::Stop => obs
            .stop_id
            .as_deref()
            .map(|stop| Scope::stop(&obs.line_id, stop)),
    }
}

/// Rolls a period's observations up into one [`AggregateBucket`] per scope.
///
/// Line-level buckets are the sum of the line's stop records. A line-level
/// record (no stop) fills in only for a timestamp where the line has no stop
/// breakdown. Stop-level buckets skip records without a stop.
pub fn aggregate(subset: &PeriodSubset, granularity: Granularity) -> BucketMap {
    let broken_down = broken_down_by_stop(&subset.observations);
    let mut acc: BTreeMap<Scope, Accumulator> = BTreeMap::new();

    for obs in &subset.observations {
        let Some(scope) = scope_of(obs, granularity, &broken_down) else {
            continue;
        };
        let entry = acc.entry(scope).or_default();
        entry.total = entry.total.saturating_add(obs.rider_count);
        entry.observations += 1;
        entry.samples.insert(obs.timestamp);
    }

    acc.into_iter()
        .map(|(scope, a)| {
            let bucket = AggregateBucket {
                scope: scope.clone(),
                period: subset.label(),
                total_riders: a.total,
                observation_count: a.observations,
                sample_count: a.samples.len(),
            };
            (scope, bucket)
        })
        .collect()
}
