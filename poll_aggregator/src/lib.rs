mod config;
use log::{debug, info, warn};

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

pub use crate::config::*;

pub mod builder;
pub mod manual;
pub mod simulation;
pub mod stats;

use crate::stats::{quadrature, recency_weights, weighted_mean, weighted_std};

// **** Private structures ****

// The position of a poll in the input slice. Groups only hold positions, the
// polls themselves are never copied or mutated while filtering.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
struct PollId(usize);

#[derive(PartialEq, Debug, Clone, Copy)]
struct GroupStatistics {
    weighted_mean: f64,
    mean_reported_sigma: f64,
    between_sigma: f64,
    aggregated_sigma: f64,
}

// The outcome of the outlier loop for one candidate.
#[derive(PartialEq, Debug, Clone)]
struct FilteredGroup {
    // The polls used for the final aggregate.
    polls: Vec<PollId>,
    // The statistics of exactly these polls.
    stats: GroupStatistics,
    outliers: Vec<OutlierRecord>,
}

/// Aggregates the polls of each candidate into a single estimate.
///
/// Arguments:
/// * `polls` the poll records, in any order
/// * `options` outlier policy and threshold
///
/// The reference date for the recency weights is the most recent date of
/// the whole input, and is shared by all the candidates. The aggregates are
/// returned sorted by candidate name.
pub fn aggregate_polls(
    polls: &[PollRecord],
    options: &AggregationOptions,
) -> Result<AggregationResult, AggregationError> {
    check_options(options)?;
    info!(
        "Aggregating {:?} polls, options: {:?}",
        polls.len(),
        options
    );

    let reference_date: NaiveDate = match polls.iter().map(|p| p.date).max() {
        Some(d) => d,
        None => {
            info!("aggregate_polls: empty input, nothing to aggregate");
            return Ok(AggregationResult {
                aggregates: Vec::new(),
                outliers: Vec::new(),
                reference_date: None,
            });
        }
    };
    debug!("aggregate_polls: reference date: {}", reference_date);

    let groups = group_by_candidate(polls);

    let mut aggregates: Vec<CandidateAggregate> = Vec::new();
    let mut outliers: Vec<OutlierRecord> = Vec::new();
    for (candidate, group) in groups.iter() {
        let filtered = filter_outliers(polls, group, reference_date, options)?;
        debug!(
            "aggregate_polls: candidate {}: kept {} of {} polls, mean {:.3}, reported sigma {:.3}, between sigma {:.3}",
            candidate,
            filtered.polls.len(),
            group.len(),
            filtered.stats.weighted_mean,
            filtered.stats.mean_reported_sigma,
            filtered.stats.between_sigma
        );
        let total_sample: u64 = filtered
            .polls
            .iter()
            .fold(0u64, |acc, pid| acc.saturating_add(polls[pid.0].sample_size));
        aggregates.push(CandidateAggregate {
            candidate: candidate.to_string(),
            intention_pct: filtered.stats.weighted_mean,
            sigma_pct: filtered.stats.aggregated_sigma,
            num_polls: filtered.polls.len(),
            total_sample,
            reference_date,
        });
        outliers.extend(filtered.outliers);
    }

    info!(
        "Aggregated {} candidates, {} outliers detected",
        aggregates.len(),
        outliers.len()
    );
    Ok(AggregationResult {
        aggregates,
        outliers,
        reference_date: Some(reference_date),
    })
}

fn check_options(options: &AggregationOptions) -> Result<(), AggregationError> {
    let z = options.z_threshold;
    if z.is_finite() && z > 0.0 {
        Ok(())
    } else {
        Err(AggregationError::InvalidThreshold(z))
    }
}

// Stable partition: the polls of a candidate keep their input order, and the
// candidates are visited in ascending order.
fn group_by_candidate(polls: &[PollRecord]) -> BTreeMap<&str, Vec<PollId>> {
    let mut groups: BTreeMap<&str, Vec<PollId>> = BTreeMap::new();
    for (idx, p) in polls.iter().enumerate() {
        groups
            .entry(p.candidate.as_str())
            .or_insert_with(Vec::new)
            .push(PollId(idx));
    }
    groups
}

// The group must not be empty.
fn group_statistics(
    polls: &[PollRecord],
    group: &[PollId],
    reference_date: NaiveDate,
) -> Result<GroupStatistics, AggregationError> {
    let dates: Vec<NaiveDate> = group.iter().map(|pid| polls[pid.0].date).collect();
    let intentions: Vec<f64> = group.iter().map(|pid| polls[pid.0].intention_pct).collect();
    let sigmas: Vec<f64> = group
        .iter()
        .map(|pid| polls[pid.0].reported_sigma_pct)
        .collect();

    let weights = recency_weights(&dates, reference_date);
    // exp(-days / 7) underflows to 0 after about 14 years.
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(AggregationError::ZeroWeight {
            candidate: group
                .first()
                .map(|pid| polls[pid.0].candidate.clone())
                .unwrap_or_default(),
        });
    }
    let mean_reported_sigma = weighted_mean(&sigmas, &weights);
    let between_sigma = weighted_std(&intentions, &weights);
    Ok(GroupStatistics {
        weighted_mean: weighted_mean(&intentions, &weights),
        mean_reported_sigma,
        between_sigma,
        aggregated_sigma: quadrature(mean_reported_sigma, between_sigma),
    })
}

/// Returns the polls with a z-score strictly above the threshold, with their z-score.
///
/// A single poll, or polls that all agree, cannot be judged: nothing is flagged.
fn find_outliers(
    polls: &[PollRecord],
    group: &[PollId],
    stats: &GroupStatistics,
    z_threshold: f64,
) -> Vec<(PollId, f64)> {
    if group.len() < 2 || stats.between_sigma <= 0.0 {
        return Vec::new();
    }
    group
        .iter()
        .filter_map(|pid| {
            let z = (polls[pid.0].intention_pct - stats.weighted_mean).abs() / stats.between_sigma;
            if z > z_threshold {
                Some((*pid, z))
            } else {
                None
            }
        })
        .collect()
}

// Runs the detection (and the removal, if enabled) until the group is stable.
//
// If removing the flagged polls would leave nothing, the whole original group
// is used for the aggregate, while the flagged polls are still reported.
fn filter_outliers(
    polls: &[PollRecord],
    original: &[PollId],
    reference_date: NaiveDate,
    options: &AggregationOptions,
) -> Result<FilteredGroup, AggregationError> {
    let mut current: Vec<PollId> = original.to_vec();
    let mut outliers: Vec<OutlierRecord> = Vec::new();

    // Every pass that does not return removes at least one poll and keeps at
    // least one, so this runs at most original.len() times.
    while !current.is_empty() {
        let stats = group_statistics(polls, &current, reference_date)?;
        let flagged = find_outliers(polls, &current, &stats, options.z_threshold);
        if flagged.is_empty() {
            return Ok(FilteredGroup {
                polls: current,
                stats,
                outliers,
            });
        }

        for (pid, z_score) in flagged.iter() {
            let poll = &polls[pid.0];
            warn!(
                "Outlier: {} reports {} at {:.2}% (mean: {:.2}% +- {:.2}pp, z={:.2})",
                poll.institute,
                poll.candidate,
                poll.intention_pct,
                stats.weighted_mean,
                stats.between_sigma,
                z_score
            );
            outliers.push(OutlierRecord {
                poll: poll.clone(),
                z_score: *z_score,
                weighted_mean_pct: stats.weighted_mean,
                between_sigma_pct: stats.between_sigma,
            });
        }

        if !options.remove_outliers {
            return Ok(FilteredGroup {
                polls: current,
                stats,
                outliers,
            });
        }

        let flagged_ids: HashSet<PollId> = flagged.iter().map(|(pid, _)| *pid).collect();
        let residual: Vec<PollId> = current
            .iter()
            .filter(|pid| !flagged_ids.contains(pid))
            .cloned()
            .collect();
        if residual.is_empty() {
            debug!(
                "filter_outliers: all {} polls flagged, reverting to the original group",
                current.len()
            );
            return Ok(FilteredGroup {
                polls: original.to_vec(),
                stats: group_statistics(polls, original, reference_date)?,
                outliers,
            });
        }
        assert!(
            residual.len() < current.len(),
            "The group did not shrink: {:?} -> {:?}",
            current,
            residual
        );
        current = residual;
    }
    // Only reachable with an empty original group, which grouping never produces.
    Ok(FilteredGroup {
        polls: Vec::new(),
        stats: GroupStatistics {
            weighted_mean: f64::NAN,
            mean_reported_sigma: f64::NAN,
            between_sigma: 0.0,
            aggregated_sigma: f64::NAN,
        },
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn poll(candidate: &str, pct: f64, institute: &str, day: &str) -> PollRecord {
        PollRecord {
            candidate: candidate.to_string(),
            intention_pct: pct,
            reported_sigma_pct: 2.0,
            institute: institute.to_string(),
            date: date(day),
            sample_size: 2000,
        }
    }

    fn agreeing_polls() -> Vec<PollRecord> {
        vec![
            poll("Lula", 38.0, "Datafolha", "2026-02-18"),
            poll("Lula", 36.0, "Quaest", "2026-02-19"),
            poll("Lula", 37.0, "PoderData", "2026-02-20"),
        ]
    }

    fn polls_with_outlier() -> Vec<PollRecord> {
        vec![
            poll("Candidato X", 31.0, "I1", "2026-02-18"),
            poll("Candidato X", 32.0, "I2", "2026-02-19"),
            poll("Candidato X", 45.0, "I3", "2026-02-20"),
        ]
    }

    fn with_removal(z_threshold: f64) -> AggregationOptions {
        AggregationOptions {
            remove_outliers: true,
            z_threshold,
        }
    }

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn recency_weighted_mean_without_outliers() {
        init();
        let res = aggregate_polls(&agreeing_polls(), &AggregationOptions::DEFAULT_OPTIONS).unwrap();
        assert_eq!(res.aggregates.len(), 1);
        let lula = &res.aggregates[0];
        assert!(36.9 < lula.intention_pct && lula.intention_pct < 37.1);
        assert!(lula.sigma_pct > 2.0);
        assert_eq!(lula.num_polls, 3);
        assert_eq!(lula.total_sample, 6000);
        assert!(res.outliers.is_empty());
    }

    #[test]
    fn detects_outlier_without_removing() {
        init();
        let options = AggregationOptions {
            remove_outliers: false,
            z_threshold: 1.2,
        };
        let res = aggregate_polls(&polls_with_outlier(), &options).unwrap();
        assert_eq!(res.outliers.len(), 1);
        let o = &res.outliers[0];
        assert_eq!(o.poll.institute, "I3");
        assert_eq!(o.poll.intention_pct, 45.0);
        assert!(o.z_score > 1.2);
        assert!(o.between_sigma_pct > 0.0);
        assert_eq!(res.aggregates[0].num_polls, 3);
        assert_eq!(res.aggregates[0].intention_pct, o.weighted_mean_pct);
    }

    #[test]
    fn removing_outlier_recomputes_aggregate() {
        init();
        let res = aggregate_polls(&polls_with_outlier(), &with_removal(1.2)).unwrap();
        assert_eq!(res.outliers.len(), 1);
        let row = &res.aggregates[0];
        assert_eq!(row.num_polls, 2);
        assert_eq!(row.total_sample, 4000);
        assert!(row.intention_pct < 33.0);
        // The reference date is not recomputed after the removal.
        assert_eq!(row.reference_date, date("2026-02-20"));
    }

    #[test]
    fn mean_stays_within_poll_range() {
        let mut polls = agreeing_polls();
        polls.extend(polls_with_outlier());
        polls.push(poll("Outros", 12.0, "I1", "2026-01-02"));
        polls.push(poll("Outros", 19.5, "I2", "2026-02-01"));
        let res = aggregate_polls(&polls, &AggregationOptions::DEFAULT_OPTIONS).unwrap();
        for agg in res.aggregates.iter() {
            let values: Vec<f64> = polls
                .iter()
                .filter(|p| p.candidate == agg.candidate)
                .map(|p| p.intention_pct)
                .collect();
            let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            assert!(lo <= agg.intention_pct && agg.intention_pct <= hi);
        }
    }

    #[test]
    fn sigma_equals_reported_when_institutes_agree() {
        let polls = vec![
            poll("A", 30.0, "I1", "2026-02-15"),
            poll("A", 30.0, "I2", "2026-02-15"),
        ];
        let res = aggregate_polls(&polls, &AggregationOptions::DEFAULT_OPTIONS).unwrap();
        assert_eq!(res.aggregates[0].sigma_pct, 2.0);
        assert!(res.outliers.is_empty());

        let polls = vec![
            poll("A", 30.0, "I1", "2026-02-10"),
            poll("A", 31.0, "I2", "2026-02-15"),
        ];
        let res = aggregate_polls(&polls, &AggregationOptions::DEFAULT_OPTIONS).unwrap();
        assert!(res.aggregates[0].sigma_pct > 2.0);
    }

    #[test]
    fn single_poll_is_never_an_outlier() {
        let polls = vec![poll("A", 99.0, "I1", "2026-02-10")];
        let res = aggregate_polls(&polls, &with_removal(0.01)).unwrap();
        assert!(res.outliers.is_empty());
        assert_eq!(res.aggregates[0].num_polls, 1);
        assert_eq!(res.aggregates[0].intention_pct, 99.0);
        assert_eq!(res.aggregates[0].sigma_pct, 2.0);
    }

    #[test]
    fn second_pass_is_a_fixed_point() {
        let first = aggregate_polls(&polls_with_outlier(), &with_removal(1.2)).unwrap();
        let survivors: Vec<PollRecord> = polls_with_outlier()
            .into_iter()
            .filter(|p| !first.outliers.iter().any(|o| o.poll == *p))
            .collect();
        let second = aggregate_polls(&survivors, &with_removal(1.2)).unwrap();
        assert!(second.outliers.is_empty());
        let (a, b) = (&first.aggregates[0], &second.aggregates[0]);
        assert_eq!(a.num_polls, b.num_polls);
        assert_eq!(a.total_sample, b.total_sample);
        // Shifting the reference date scales all the weights by the same factor.
        assert!((a.intention_pct - b.intention_pct).abs() < 1e-9);
        assert!((a.sigma_pct - b.sigma_pct).abs() < 1e-9);
    }

    #[test]
    fn emptying_removal_reverts_to_original_group() {
        init();
        // With two polls of equal weight, both are exactly one deviation away.
        let polls = vec![
            poll("A", 30.0, "I1", "2026-02-20"),
            poll("A", 34.0, "I2", "2026-02-20"),
        ];
        let res = aggregate_polls(&polls, &with_removal(0.5)).unwrap();
        assert_eq!(res.outliers.len(), 2);
        for o in res.outliers.iter() {
            assert!((o.z_score - 1.0).abs() < 1e-9);
            assert!((o.weighted_mean_pct - 32.0).abs() < 1e-9);
            assert!((o.between_sigma_pct - 2.0).abs() < 1e-9);
        }
        let row = &res.aggregates[0];
        assert_eq!(row.num_polls, 2);
        assert_eq!(row.total_sample, 4000);
        assert!((row.intention_pct - 32.0).abs() < 1e-9);
        assert!((row.sigma_pct - 8.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn z_score_equal_to_threshold_is_not_an_outlier() {
        // Same date, equal weights: both polls are exactly one deviation away.
        let polls = vec![
            poll("A", 30.0, "I1", "2026-02-20"),
            poll("A", 34.0, "I2", "2026-02-20"),
        ];
        let res = aggregate_polls(&polls, &with_removal(1.0)).unwrap();
        assert!(res.outliers.is_empty());
        assert_eq!(res.aggregates[0].num_polls, 2);
    }

    #[test]
    fn polls_too_old_to_weigh_are_an_error() {
        let polls = vec![
            poll("Old", 30.0, "I1", "2000-01-01"),
            poll("Old", 32.0, "I2", "2000-01-02"),
            poll("New", 40.0, "I1", "2026-02-20"),
        ];
        let res = aggregate_polls(&polls, &AggregationOptions::DEFAULT_OPTIONS);
        assert_eq!(
            res,
            Err(AggregationError::ZeroWeight {
                candidate: "Old".to_string()
            })
        );
    }

    #[test]
    fn huge_samples_saturate() {
        let mut polls = agreeing_polls();
        polls[0].sample_size = u64::MAX;
        polls[1].sample_size = u64::MAX;
        let res = aggregate_polls(&polls, &AggregationOptions::DEFAULT_OPTIONS).unwrap();
        assert_eq!(res.aggregates[0].total_sample, u64::MAX);
    }

    #[test]
    fn removal_iterates_until_stable() {
        init();
        let polls = vec![
            poll("A", 30.0, "I1", "2026-02-20"),
            poll("A", 30.2, "I2", "2026-02-20"),
            poll("A", 30.4, "I3", "2026-02-20"),
            poll("A", 31.0, "I4", "2026-02-20"),
            poll("A", 34.0, "I5", "2026-02-20"),
            poll("A", 60.0, "I6", "2026-02-20"),
        ];
        let res = aggregate_polls(&polls, &with_removal(1.5)).unwrap();
        // 60 goes first, then 34 stands out among the rest.
        let institutes: Vec<&str> = res
            .outliers
            .iter()
            .map(|o| o.poll.institute.as_str())
            .collect();
        assert_eq!(institutes[0], "I6");
        assert!(institutes.contains(&"I5"));
        assert!(res.outliers.len() >= 2);
        let row = &res.aggregates[0];
        assert_eq!(row.num_polls, polls.len() - res.outliers.len());
        assert!(row.intention_pct < 31.0);
    }

    #[test]
    fn candidates_are_sorted_and_share_reference_date() {
        let polls = vec![
            poll("Zeca", 10.0, "I1", "2026-01-10"),
            poll("Ana", 20.0, "I1", "2026-01-05"),
            poll("Maria", 30.0, "I2", "2026-03-01"),
            poll("Ana", 22.0, "I2", "2026-01-06"),
        ];
        let res = aggregate_polls(&polls, &AggregationOptions::default()).unwrap();
        let names: Vec<&str> = res
            .aggregates
            .iter()
            .map(|a| a.candidate.as_str())
            .collect();
        assert_eq!(names, vec!["Ana", "Maria", "Zeca"]);
        for a in res.aggregates.iter() {
            assert_eq!(a.reference_date, date("2026-03-01"));
        }
        assert_eq!(res.reference_date, Some(date("2026-03-01")));
    }

    #[test]
    fn empty_input_gives_empty_tables() {
        let res = aggregate_polls(&[], &AggregationOptions::default()).unwrap();
        assert!(res.aggregates.is_empty());
        assert!(res.outliers.is_empty());
        assert_eq!(res.reference_date, None);
    }

    #[test]
    fn rejects_invalid_threshold() {
        for z in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let options = AggregationOptions {
                remove_outliers: false,
                z_threshold: z,
            };
            let res = aggregate_polls(&agreeing_polls(), &options);
            assert!(matches!(res, Err(AggregationError::InvalidThreshold(_))));
        }
    }
}
