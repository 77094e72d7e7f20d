//! Before/after partitioning around the cutover.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::config::AnalysisWindow;
use crate::error::{AnalysisError, Result};
use crate::model::{Dataset, Observation, Period, PeriodLabel};

/// The observations falling inside one [`Period`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSubset {
    pub period: Period,
    pub observations: Vec<Observation>,
}

impl PeriodSubset {
    pub fn label(&self) -> PeriodLabel {
        self.period.label
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// First and last observed timestamps.
    pub fn observed_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.observations.iter().map(|o| o.timestamp).min()?;
        let last = self.observations.iter().map(|o| o.timestamp).max()?;
        Some((first, last))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub cutover: NaiveDateTime,
    pub before: PeriodSubset,
    pub after: PeriodSubset,
    /// Observations dropped for lying outside the analysis window.
    pub excluded: usize,
}

/// Splits `dataset` at `cutover`: `timestamp < cutover` is before, the rest
/// is after.
pub fn partition(dataset: &Dataset, cutover: NaiveDateTime) -> Result<Partition> {
    partition_within(dataset, cutover, &AnalysisWindow::unbounded())
}

/// Like [`partition`], but the outer edges of the two periods are bounded by
/// `window` and observations outside it are excluded.
///
/// Fails with [`AnalysisError::EmptyPeriod`] when either side ends up empty.
#[tracing::instrument(skip(dataset, window), fields(observations = dataset.len()))]
pub fn partition_within(
    dataset: &Dataset,
    cutover: NaiveDateTime,
    window: &AnalysisWindow,
) -> Result<Partition> {
    window.validate(cutover)?;

    let before_period = Period {
        label: PeriodLabel::Before,
        start: window.start,
        end: Some(cutover),
    };
    let after_period = Period {
        label: PeriodLabel::After,
        start: Some(cutover),
        end: window.end,
    };

    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut excluded = 0;

    for obs in dataset {
        if before_period.contains(obs.timestamp) {
            before.push(obs.clone());
        } else if after_period.contains(obs.timestamp) {
            after.push(obs.clone());
        } else {
            excluded += 1;
        }
    }

    if excluded > 0 {
        debug!(excluded, "Observations outside the analysis window");
    }

    if before.is_empty() {
        return Err(AnalysisError::EmptyPeriod {
            period: PeriodLabel::Before,
            cutover,
        });
    }
    if after.is_empty() {
        return Err(AnalysisError::EmptyPeriod {
            period: PeriodLabel::After,
            cutover,
        });
    }

    info!(
        before = before.len(),
        after = after.len(),
        excluded,
        "Partitioned dataset"
    );

    Ok(Partition {
        cutover,
        before: PeriodSubset {
            period: before_period,
            observations: before,
        },
        after: PeriodSubset {
            period: after_period,
            observations: after,
        },
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample() -> Dataset {
        Dataset::new(vec![
            Observation::new("Blue Line", Some("Airport"), ts(6, 1), 10),
            Observation::new("Blue Line", Some("Airport"), ts(7, 4), 11),
            Observation::new("Blue Line", Some("Airport"), ts(7, 5), 12),
            Observation::new("Orange Line", Some("Haymarket"), ts(7, 5), 13),
            Observation::new("Blue Line", Some("Airport"), ts(8, 1), 14),
        ])
        .unwrap()
    }

    #[test]
    fn test_partition_is_a_partition() {
        let ds = sample();
        let p = partition(&ds, ts(7, 5)).unwrap();

        assert_eq!(p.before.len() + p.after.len(), ds.len());
        assert_eq!(p.excluded, 0);
        for obs in ds.iter() {
            let in_before = p.before.observations.contains(obs);
            let in_after = p.after.observations.contains(obs);
            assert!(in_before ^ in_after, "{obs:?} must be in exactly one period");
        }
    }

    #[test]
    fn test_cutover_timestamp_goes_after() {
        let p = partition(&sample(), ts(7, 5)).unwrap();
        assert!(p.before.observations.iter().all(|o| o.timestamp < ts(7, 5)));
        assert!(p.after.observations.iter().all(|o| o.timestamp >= ts(7, 5)));
        assert_eq!(p.after.len(), 3);
        assert_eq!(p.before.period.end, p.after.period.start);
    }

    #[test]
    fn test_empty_side_is_an_error() {
        let err = partition(&sample(), ts(5, 1)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyPeriod {
                period: PeriodLabel::Before,
                ..
            }
        ));

        let err = partition(&sample(), ts(9, 1)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyPeriod {
                period: PeriodLabel::After,
                ..
            }
        ));
    }

    #[test]
    fn test_window_excludes_outer_observations() {
        let window = AnalysisWindow {
            start: Some(ts(7, 1)),
            end: Some(ts(7, 31)),
        };
        let p = partition_within(&sample(), ts(7, 5), &window).unwrap();
        assert_eq!(p.excluded, 2);
        assert_eq!(p.before.len(), 1);
        assert_eq!(p.after.len(), 2);
        assert_eq!(p.before.observed_span(), Some((ts(7, 4), ts(7, 4))));
    }
}
