//! Pipeline orchestration
//!
//! This module provides the public API for RFM segmentation.
//! It sequences sanitization, aggregation, scoring and classification and
//! returns the first error any stage raises.

use crate::aggregator::{CustomerAggregator, RecencyAnchor};
use crate::error::RfmError;
use crate::sanitizer::{EventSanitizer, SanitizeReport};
use crate::schema::RawTransactions;
use crate::scorer::{QuantileScorer, ScorerConfig};
use crate::segment::SegmentRules;
use crate::types::{CustomerId, ScoredCustomer, Segment, SegmentedCustomer};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Compute segments for every customer with the default configuration.
///
/// # Arguments
/// * `raw` - Parsed transaction table
/// * `as_of` - Reference date recency is measured against
///
/// # Returns
/// One segmented customer per customer with positive spend, ordered by id
///
/// # Example
/// ```ignore
/// let table = RawTransactionAdapter::parse_csv_file(path)?;
/// let segments = compute_segments(&table, as_of)?;
/// ```
pub fn compute_segments(
    raw: &RawTransactions,
    as_of: NaiveDateTime,
) -> Result<Vec<SegmentedCustomer>, RfmError> {
    RfmProcessor::new().process(raw, as_of)
}

/// Customer ids assigned to one segment, in table order
pub fn customers_in_segment(segments: &[SegmentedCustomer], label: Segment) -> Vec<CustomerId> {
    segments
        .iter()
        .filter(|customer| customer.segment == label)
        .map(SegmentedCustomer::customer_id)
        .collect()
}

/// Tunable parts of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RfmConfig {
    #[serde(default)]
    pub rules: SegmentRules,
    #[serde(default)]
    pub recency_anchor: RecencyAnchor,
    #[serde(default)]
    pub scoring: ScorerConfig,
}

/// Processor holding a configuration across runs.
///
/// Use this when the rule table or scoring rules differ from the defaults.
#[derive(Debug, Clone, Default)]
pub struct RfmProcessor {
    config: RfmConfig,
}

impl RfmProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RfmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RfmConfig {
        &self.config
    }

    /// Replace the rule table from JSON
    pub fn load_rules(&mut self, json: &str) -> Result<(), RfmError> {
        self.config.rules = SegmentRules::from_json(json)?;
        Ok(())
    }

    /// Save the rule table to JSON
    pub fn save_rules(&self) -> Result<String, RfmError> {
        Ok(self.config.rules.to_json()?)
    }

    /// Run the full pipeline
    pub fn process(
        &self,
        raw: &RawTransactions,
        as_of: NaiveDateTime,
    ) -> Result<Vec<SegmentedCustomer>, RfmError> {
        self.process_with_report(raw, as_of)
            .map(|(segments, _)| segments)
    }

    /// Run the full pipeline and keep the sanitization counts
    ///
    /// Pipeline stages:
    /// 1. EventSanitizer - Drop incomplete and cancelled rows
    /// 2. CustomerAggregator - Per-customer recency, frequency, monetary
    /// 3. QuantileScorer - Quintile scores per metric
    /// 4. SegmentRules - Segment label from recency and frequency scores
    pub fn process_with_report(
        &self,
        raw: &RawTransactions,
        as_of: NaiveDateTime,
    ) -> Result<(Vec<SegmentedCustomer>, SanitizeReport), RfmError> {
        // Stage 1: Sanitize rows into purchase events
        let (events, report) = EventSanitizer::sanitize_with_report(raw)?;

        // Stage 2: Aggregate per customer
        let metrics =
            CustomerAggregator::new(self.config.recency_anchor).aggregate(&events, as_of)?;

        // Stage 3: Score against the population
        let scored = QuantileScorer::new(self.config.scoring).score(metrics)?;

        // Stage 4: Classify
        let segmented = classify_all(&self.config.rules, scored)?;

        log::info!(
            "Segmented {} customers from {} events as of {}",
            segmented.len(),
            events.len(),
            as_of
        );

        Ok((segmented, report))
    }
}

fn classify_all(
    rules: &SegmentRules,
    scored: Vec<ScoredCustomer>,
) -> Result<Vec<SegmentedCustomer>, RfmError> {
    scored
        .into_iter()
        .map(|scored| {
            let segment = rules.classify(&scored.rf_code)?;
            Ok(SegmentedCustomer { scored, segment })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, RawTransactionRow};
    use crate::types::Metric;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn as_of() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 12, 11)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn days_ago(days: i64) -> NaiveDateTime {
        as_of() - Duration::days(days)
    }

    /// Ten customers with distinct recency, frequency and spend.
    ///
    /// Customer 100 is the most recent and most frequent; customer 10 is the
    /// oldest with a single invoice.
    fn population() -> RawTransactions {
        let mut rows = Vec::new();
        for i in 1..=10u64 {
            let customer_id = i * 10;
            let recency = match customer_id {
                100 => 10,
                10 => 400,
                _ => 400 - (i as i64) * 35,
            };
            for invoice in 0..i {
                let invoice_id = format!("{}{:02}", customer_id, invoice);
                let at = days_ago(recency + (i - 1 - invoice) as i64);
                rows.push(RawTransactionRow::purchase(
                    invoice_id,
                    customer_id,
                    1,
                    25.0 * i as f64,
                    at,
                ));
            }
        }
        RawTransactions::with_all_columns(rows)
    }

    #[test]
    fn test_compute_segments_extremes() {
        let segments = compute_segments(&population(), as_of()).unwrap();
        assert_eq!(segments.len(), 10);

        let top = segments.iter().find(|s| s.customer_id() == 100).unwrap();
        assert_eq!(top.metrics().recency, 10);
        assert_eq!(top.metrics().frequency, 10);
        assert_eq!(top.scored.rf_code.to_string(), "55");
        assert_eq!(top.segment, Segment::Champions);

        let bottom = segments.iter().find(|s| s.customer_id() == 10).unwrap();
        assert_eq!(bottom.metrics().recency, 400);
        assert_eq!(bottom.metrics().frequency, 1);
        assert_eq!(bottom.scored.rf_code.to_string(), "11");
        assert_eq!(bottom.segment, Segment::Hibernating);
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let first = compute_segments(&population(), as_of()).unwrap();
        let second = compute_segments(&population(), as_of()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_output_invariants() {
        let segments = compute_segments(&population(), as_of()).unwrap();
        for customer in &segments {
            assert!(customer.metrics().monetary > 0.0);
            assert!(customer.metrics().frequency >= 1);
        }
    }

    #[test]
    fn test_cancelled_invoice_does_not_count() {
        let mut raw = population();
        raw.rows.push(RawTransactionRow::purchase("C12345", 100, 50, 1000.0, days_ago(1)));

        let segments = compute_segments(&raw, as_of()).unwrap();
        let top = segments.iter().find(|s| s.customer_id() == 100).unwrap();
        assert_eq!(top.metrics().frequency, 10);
        assert_eq!(top.metrics().monetary, 2500.0);
        assert_eq!(top.metrics().recency, 10);
    }

    #[test]
    fn test_customers_in_segment() {
        let segments = compute_segments(&population(), as_of()).unwrap();

        assert_eq!(customers_in_segment(&segments, Segment::Champions), vec![90, 100]);
        assert!(customers_in_segment(&segments, Segment::Hibernating).contains(&10));
    }

    #[test]
    fn test_stage_errors_propagate() {
        let schema_less = RawTransactions::new([Column::InvoiceId], vec![]);
        assert!(matches!(
            compute_segments(&schema_less, as_of()),
            Err(RfmError::Schema { .. })
        ));

        let too_small = RawTransactions::with_all_columns(vec![RawTransactionRow::purchase(
            "1", 1, 1, 1.0, days_ago(3),
        )]);
        assert!(matches!(
            compute_segments(&too_small, as_of()),
            Err(RfmError::InsufficientData {
                metric: Metric::Recency,
                ..
            })
        ));

        let future = RawTransactions::with_all_columns(vec![RawTransactionRow::purchase(
            "1",
            1,
            1,
            1.0,
            as_of() + Duration::days(1),
        )]);
        assert!(matches!(
            compute_segments(&future, as_of()),
            Err(RfmError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_processor_rule_table_round_trip() {
        let mut processor = RfmProcessor::new();
        let saved = processor.save_rules().unwrap();
        processor.load_rules(&saved).unwrap();
        assert_eq!(processor.config().rules, SegmentRules::default());

        assert!(processor.load_rules("{\"rules\": []}").is_err());
    }
}
