use crate::analyzers::types::{BucketMap, ChangeOutcome, ChangeResult, Presence};
use crate::analyzers::utility::round_to;
use crate::config::ChangeConfig;
use std::collections::BTreeSet;

/// Percent change from `before` to `after`, rounded to `precision` places.
/// A zero `before` has no baseline.
pub fn change_outcome(before: f64, after: f64, precision: u32) -> ChangeOutcome {
    if before == 0.0 {
        ChangeOutcome::NoBaseline
    } else {
        ChangeOutcome::Percent(round_to((after - before) / before * 100.0, precision))
    }
}

/// Pairs before and after buckets into one [`ChangeResult`] per scope present
/// in either map, ordered by scope.
///
/// - only after: [`ChangeOutcome::New`]
/// - only before: [`ChangeOutcome::Discontinued`], with an after total of zero
/// - before value of zero: [`ChangeOutcome::NoBaseline`]
pub fn compute_changes(
    before: &BucketMap,
    after: &BucketMap,
    config: &ChangeConfig,
) -> Vec<ChangeResult> {
    let scopes: BTreeSet<_> = before.keys().chain(after.keys()).collect();
    let precision = config.rounding_precision;
    let basis = config.basis;

    scopes
        .into_iter()
        .map(|scope| {
            let b = before.get(scope);
            let a = after.get(scope);

            let presence = match (b, a) {
                (Some(_), Some(_)) => Presence::Both,
                (Some(_), None) => Presence::BeforeOnly,
                _ => Presence::AfterOnly,
            };

            let before_value = b.map_or(0.0, |b| b.value(basis));
            let after_value = a.map_or(0.0, |a| a.value(basis));

            let percent_change = match presence {
                Presence::AfterOnly => ChangeOutcome::New,
                Presence::BeforeOnly => ChangeOutcome::Discontinued,
                Presence::Both => change_outcome(before_value, after_value, precision),
            };

            let before_observations = b.map_or(0, |b| b.observation_count);
            let after_observations = a.map_or(0, |a| a.observation_count);

            ChangeResult {
                scope: scope.clone(),
                basis,
                before_total: b.map_or(0, |b| b.total_riders),
                after_total: a.map_or(0, |a| a.total_riders),
                before_observations,
                after_observations,
                before_mean: round_to(b.map_or(0.0, |b| b.mean_per_sample()), precision),
                after_mean: round_to(a.map_or(0.0, |a| a.mean_per_sample()), precision),
                differential: round_to(after_value - before_value, precision),
                percent_change,
                low_confidence: !b.is_some_and(|b| b.is_confident(config.min_observations))
                    || !a.is_some_and(|a| a.is_confident(config.min_observations)),
                presence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::aggregate::aggregate;
    use crate::analyzers::types::{AggregateBucket, Granularity};
    use crate::config::ChangeBasis;
    use crate::model::{Dataset, Observation, PeriodLabel, Scope};
    use crate::partition::partition;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bucket(scope: Scope, period: PeriodLabel, total: u64, n: usize) -> AggregateBucket {
        AggregateBucket {
            scope,
            period,
            total_riders: total,
            observation_count: n,
            sample_count: n,
        }
    }

    fn single(scope: Scope, period: PeriodLabel, total: u64, n: usize) -> BucketMap {
        let mut map = BucketMap::new();
        map.insert(scope.clone(), bucket(scope, period, total, n));
        map
    }

    #[test]
    fn test_fifty_percent_increase() {
        let ds = Dataset::new(vec![
            Observation::new("Blue", Some("Stop1"), ts(1, 1), 100),
            Observation::new("Blue", Some("Stop1"), ts(2, 1), 150),
        ])
        .unwrap();
        let cutover = ts(1, 15);
        let p = partition(&ds, cutover).unwrap();

        let results = compute_changes(
            &aggregate(&p.before, Granularity::Stop),
            &aggregate(&p.after, Granularity::Stop),
            &ChangeConfig::default(),
        );

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.scope, Scope::stop("Blue", "Stop1"));
        assert_eq!(r.before_total, 100);
        assert_eq!(r.after_total, 150);
        assert_eq!(r.differential, 50.0);
        assert_eq!(r.percent_change, ChangeOutcome::Percent(50.0));
        assert_eq!(r.percent_change.render(2), "+50.00%");
        assert_eq!(r.presence, Presence::Both);
        assert!(!r.low_confidence);
    }

    #[test]
    fn test_scope_only_after_is_new() {
        let scope = Scope::stop("Orange", "Stop9");
        let after = single(scope.clone(), PeriodLabel::After, 80, 4);

        let results = compute_changes(&BucketMap::new(), &after, &ChangeConfig::default());
        let r = &results[0];
        assert_eq!(r.percent_change, ChangeOutcome::New);
        assert_eq!(r.percent_change.percent(), None);
        assert_eq!(r.before_total, 0);
        assert_eq!(r.after_total, 80);
        assert_eq!(r.presence, Presence::AfterOnly);
        assert!(r.low_confidence);
    }

    #[test]
    fn test_scope_only_before_is_discontinued() {
        let scope = Scope::stop("Blue", "Bowdoin");
        let before = single(scope, PeriodLabel::Before, 40, 2);

        let r = &compute_changes(&before, &BucketMap::new(), &ChangeConfig::default())[0];
        assert_eq!(r.percent_change, ChangeOutcome::Discontinued);
        assert_eq!(r.percent_change.percent(), None);
        assert_eq!(r.after_total, 0);
        assert_eq!(r.presence, Presence::BeforeOnly);
        assert!(r.low_confidence);
    }

    #[test]
    fn test_zero_baseline() {
        let scope = Scope::line("Blue");
        let before = single(scope.clone(), PeriodLabel::Before, 0, 3);
        let after = single(scope, PeriodLabel::After, 12, 3);

        let r = &compute_changes(&before, &after, &ChangeConfig::default())[0];
        assert_eq!(r.percent_change, ChangeOutcome::NoBaseline);
        assert_eq!(r.presence, Presence::Both);
    }

    #[test]
    fn test_daily_mean_basis_and_rounding() {
        let scope = Scope::line("Blue");
        let before = single(scope.clone(), PeriodLabel::Before, 300, 3);
        let after = single(scope, PeriodLabel::After, 1000, 9);

        let config = ChangeConfig {
            basis: ChangeBasis::DailyMean,
            rounding_precision: 1,
            min_observations: 5,
        };
        let r = &compute_changes(&before, &after, &config)[0];
        // 100/day before, 111.11/day after
        assert_eq!(r.before_mean, 100.0);
        assert_eq!(r.after_mean, 111.1);
        assert_eq!(r.percent_change, ChangeOutcome::Percent(11.1));
        assert_eq!(r.differential, 11.1);
        assert!(r.low_confidence);

        let totals = &compute_changes(&before, &after, &ChangeConfig::default())[0];
        assert_eq!(totals.percent_change, ChangeOutcome::Percent(233.33));
    }

    #[test]
    fn test_recomputation_is_identical() {
        let ds = Dataset::new(vec![
            Observation::new("Blue", Some("A"), ts(6, 1), 33),
            Observation::new("Blue", Some("B"), ts(6, 1), 7),
            Observation::new("Blue", Some("A"), ts(7, 9), 41),
            Observation::new("Blue", Some("C"), ts(7, 9), 2),
        ])
        .unwrap();
        let p = partition(&ds, ts(7, 5)).unwrap();
        let before = aggregate(&p.before, Granularity::Stop);
        let after = aggregate(&p.after, Granularity::Stop);
        let config = ChangeConfig::default();

        let first = compute_changes(&before, &after, &config);
        let second = compute_changes(&before, &after, &config);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_change_outcome_rounds_half_away_from_zero() {
        // -1/8 = -12.5%
        assert_eq!(change_outcome(8.0, 7.0, 0), ChangeOutcome::Percent(-13.0));
        assert_eq!(change_outcome(0.0, 7.0, 2), ChangeOutcome::NoBaseline);
    }
}
