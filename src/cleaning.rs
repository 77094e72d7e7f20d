//! Dataset scoping applied between loading and analysis.

use tracing::debug;

use crate::config::{DayFilter, Roster};
use crate::model::{Dataset, Observation};

/// Keeps only rostered lines and, on those lines, only rostered stations.
/// Line-level records of a rostered line are kept. An empty roster keeps
/// everything.
pub fn restrict_to_roster(dataset: &Dataset, roster: &Roster) -> Dataset {
    if roster.is_empty() {
        return dataset.clone();
    }

    let scoped = dataset.filter(|obs| on_roster(obs, roster));
    debug!(
        kept = scoped.len(),
        dropped = dataset.len() - scoped.len(),
        "Restricted dataset to roster"
    );
    scoped
}

fn on_roster(obs: &Observation, roster: &Roster) -> bool {
    match (roster.stations(&obs.line_id), obs.stop_id.as_deref()) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(stations), Some(stop)) => stations.iter().any(|s| s == stop),
    }
}

pub fn apply_day_filter(dataset: &Dataset, filter: DayFilter) -> Dataset {
    match filter {
        DayFilter::All => dataset.clone(),
        DayFilter::Weekdays => {
            let weekdays = dataset.filter(Observation::is_weekday);
            debug!(
                kept = weekdays.len(),
                dropped = dataset.len() - weekdays.len(),
                "Applied weekday filter"
            );
            weekdays
        }
    }
}
