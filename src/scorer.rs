//! Quantile scoring
//!
//! Every metric goes through the same rank-then-bucket routine: optionally
//! replace values by a stable rank, cut the population at the quantiles
//! `i / QUANTILE_COUNT` (linear interpolation between order statistics), and
//! map the bucket to a score according to the metric's polarity.

use crate::error::RfmError;
use crate::types::{CustomerMetrics, Metric, RfCode, Score, ScoredCustomer, QUANTILE_COUNT};
use serde::{Deserialize, Serialize};

/// How duplicate values are treated before bucketing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Bucket the raw values; equal values share a bucket
    #[default]
    None,
    /// Rank values 1..=N, ties ordered by position in the table
    FirstSeen,
}

/// Whether a larger metric value earns a larger score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

/// Scoring rule for a single metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricScoring {
    pub tie_break: TieBreak,
    pub polarity: Polarity,
}

impl MetricScoring {
    pub fn new(tie_break: TieBreak, polarity: Polarity) -> Self {
        Self {
            tie_break,
            polarity,
        }
    }
}

/// Scoring rules for all three metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub recency: MetricScoring,
    pub frequency: MetricScoring,
    pub monetary: MetricScoring,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            recency: MetricScoring::new(TieBreak::None, Polarity::LowerIsBetter),
            frequency: MetricScoring::new(TieBreak::FirstSeen, Polarity::HigherIsBetter),
            monetary: MetricScoring::new(TieBreak::None, Polarity::HigherIsBetter),
        }
    }
}

impl ScorerConfig {
    pub fn for_metric(&self, metric: Metric) -> MetricScoring {
        match metric {
            Metric::Recency => self.recency,
            Metric::Frequency => self.frequency,
            Metric::Monetary => self.monetary,
        }
    }
}

/// Stage 3 of the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileScorer {
    config: ScorerConfig,
}

impl QuantileScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score every customer on all three metrics
    pub fn score(
        &self,
        customers: Vec<CustomerMetrics>,
    ) -> Result<Vec<ScoredCustomer>, RfmError> {
        let recency = self.score_metric(&customers, Metric::Recency)?;
        let frequency = self.score_metric(&customers, Metric::Frequency)?;
        let monetary = self.score_metric(&customers, Metric::Monetary)?;

        let scored = customers
            .into_iter()
            .zip(recency)
            .zip(frequency)
            .zip(monetary)
            .map(|(((metrics, r), f), m)| ScoredCustomer {
                metrics,
                recency_score: r,
                frequency_score: f,
                monetary_score: m,
                rf_code: RfCode::new(r, f),
            })
            .collect();

        Ok(scored)
    }

    fn score_metric(
        &self,
        customers: &[CustomerMetrics],
        metric: Metric,
    ) -> Result<Vec<Score>, RfmError> {
        let values: Vec<f64> = customers.iter().map(|c| c.value(metric)).collect();
        quantile_scores(&values, self.config.for_metric(metric)).map_err(|e| match e {
            BucketError::TooFewDistinct { distinct } => RfmError::InsufficientData {
                metric,
                distinct,
                required: QUANTILE_COUNT,
            },
            BucketError::CollidingCutPoints {
                cut_point,
                distinct,
            } => RfmError::CollidingCutPoints {
                metric,
                cut_point,
                distinct,
            },
        })
    }
}

/// Why a column could not be cut into quantile buckets
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketError {
    /// Fewer distinct values than buckets
    TooFewDistinct { distinct: usize },
    /// Two adjacent cut points are equal, leaving a bucket empty
    CollidingCutPoints { cut_point: f64, distinct: usize },
}

/// Score a column of values
pub fn quantile_scores(values: &[f64], scoring: MetricScoring) -> Result<Vec<Score>, BucketError> {
    let keyed = match scoring.tie_break {
        TieBreak::None => values.to_vec(),
        TieBreak::FirstSeen => first_seen_ranks(values),
    };

    let buckets = quantile_buckets(&keyed, QUANTILE_COUNT)?;

    Ok(buckets
        .into_iter()
        .map(|bucket| {
            let score = match scoring.polarity {
                Polarity::HigherIsBetter => bucket,
                Polarity::LowerIsBetter => QUANTILE_COUNT + 1 - bucket,
            };
            Score::from_bucket(score)
        })
        .collect())
}

/// 1-based ranks, equal values ranked by their position
pub fn first_seen_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Assign each value a bucket in `1..=bins`
///
/// Fails when fewer than `bins` distinct values exist, or when duplicates
/// pile up on a cut point so the cut points are not strictly increasing.
pub fn quantile_buckets(values: &[f64], bins: usize) -> Result<Vec<usize>, BucketError> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() < bins {
        return Err(BucketError::TooFewDistinct {
            distinct: distinct.len(),
        });
    }

    let edges: Vec<f64> = (0..=bins)
        .map(|i| interpolate(&sorted, i as f64 / bins as f64))
        .collect();
    if let Some(pair) = edges.windows(2).find(|w| w[0] >= w[1]) {
        return Err(BucketError::CollidingCutPoints {
            cut_point: pair[1],
            distinct: distinct.len(),
        });
    }

    Ok(values
        .iter()
        .map(|v| {
            edges[1..]
                .iter()
                .position(|edge| v <= edge)
                .map_or(bins, |pos| pos + 1)
        })
        .collect())
}

/// Quantile of sorted data with linear interpolation
fn interpolate(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scores(values: &[f64], scoring: MetricScoring) -> Vec<u8> {
        quantile_scores(values, scoring)
            .unwrap()
            .into_iter()
            .map(|s| s.get())
            .collect()
    }

    #[test]
    fn test_five_distinct_values_get_every_score() {
        let higher = MetricScoring::default();
        assert_eq!(scores(&[10.0, 50.0, 30.0, 20.0, 40.0], higher), vec![1, 5, 3, 2, 4]);
    }

    #[test]
    fn test_lower_is_better_inverts() {
        let lower = MetricScoring::new(TieBreak::None, Polarity::LowerIsBetter);
        assert_eq!(scores(&[1.0, 2.0, 3.0, 4.0, 5.0], lower), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_ten_values_two_per_bucket() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert_eq!(
            scores(&values, MetricScoring::default()),
            vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]
        );
    }

    #[test]
    fn test_first_seen_ranks_break_ties_by_position() {
        assert_eq!(
            first_seen_ranks(&[3.0, 1.0, 3.0, 1.0, 2.0]),
            vec![4.0, 1.0, 5.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_first_seen_scores_heavily_tied_column() {
        let values = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 9.0];
        let first_seen = MetricScoring::new(TieBreak::FirstSeen, Polarity::HigherIsBetter);

        assert_eq!(scores(&values, first_seen), vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
        assert!(quantile_scores(&values, MetricScoring::default()).is_err());
    }

    #[test]
    fn test_too_few_distinct_values() {
        let err = quantile_scores(&[1.0, 2.0, 3.0, 4.0, 4.0, 4.0], MetricScoring::default())
            .unwrap_err();
        assert_eq!(err, BucketError::TooFewDistinct { distinct: 4 });
    }

    #[test]
    fn test_duplicate_cut_points_fail() {
        // Five distinct values but the 20% and 40% cut points coincide
        let mut values = vec![1.0; 12];
        values.extend([2.0, 3.0, 4.0, 5.0]);
        assert_eq!(
            quantile_buckets(&values, 5),
            Err(BucketError::CollidingCutPoints {
                cut_point: 1.0,
                distinct: 5,
            })
        );
    }

    #[test]
    fn test_colliding_cut_points_error_names_cut_point() {
        let customers: Vec<CustomerMetrics> = (1..=16)
            .map(|i| CustomerMetrics {
                customer_id: i,
                recency: i as i64,
                frequency: 1,
                monetary: if i <= 12 { 1.0 } else { (i - 11) as f64 },
            })
            .collect();

        let err = QuantileScorer::default().score(customers).unwrap_err();
        match &err {
            RfmError::CollidingCutPoints {
                metric,
                cut_point,
                distinct,
            } => {
                assert_eq!(*metric, Metric::Monetary);
                assert_eq!(*cut_point, 1.0);
                assert_eq!(*distinct, 5);
            }
            other => panic!("expected colliding cut points, got {:?}", other),
        }
        assert!(!err.to_string().contains("need"), "{}", err);
    }

    #[test]
    fn test_scorer_names_failing_metric() {
        let customers: Vec<CustomerMetrics> = (1..=5)
            .map(|i| CustomerMetrics {
                customer_id: i,
                recency: 10,
                frequency: i as u32,
                monetary: i as f64 * 10.0,
            })
            .collect();

        match QuantileScorer::default().score(customers) {
            Err(RfmError::InsufficientData {
                metric, distinct, ..
            }) => {
                assert_eq!(metric, Metric::Recency);
                assert_eq!(distinct, 1);
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }

    #[test]
    fn test_scorer_builds_rf_code() {
        let customers: Vec<CustomerMetrics> = (1..=5)
            .map(|i| CustomerMetrics {
                customer_id: i,
                recency: i as i64 * 30,
                frequency: 6 - i as u32,
                monetary: i as f64 * 100.0,
            })
            .collect();

        let scored = QuantileScorer::default().score(customers).unwrap();
        let codes: Vec<String> = scored.iter().map(|s| s.rf_code.to_string()).collect();
        assert_eq!(codes, vec!["55", "44", "33", "22", "11"]);

        let monetary: Vec<u8> = scored.iter().map(|s| s.monetary_score.get()).collect();
        assert_eq!(monetary, vec![1, 2, 3, 4, 5]);
    }
}
