//! Core types for the RFM pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: sanitized transaction events, per-customer metrics, scored
//! customers and segmented customers. Each stage wraps the output of the
//! previous one instead of mutating it.

use crate::error::RfmError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Customer identifier as carried by the source data
pub type CustomerId = u64;

/// Number of quantile buckets every metric is scored into
pub const QUANTILE_COUNT: usize = 5;

/// A purchase line that survived sanitization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub invoice_id: String,
    pub stock_code: String,
    pub description: String,
    pub quantity: i64,
    pub invoice_timestamp: NaiveDateTime,
    pub unit_price: f64,
    pub customer_id: CustomerId,
    pub country: String,
    /// quantity * unit_price, always finite
    pub line_total: f64,
}

/// The three behavioral metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Recency,
    Frequency,
    Monetary,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Recency => "recency",
            Metric::Frequency => "frequency",
            Metric::Monetary => "monetary",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw RFM metrics for one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMetrics {
    pub customer_id: CustomerId,
    /// Days between the reference date and the anchor invoice
    pub recency: i64,
    /// Number of distinct invoices
    pub frequency: u32,
    /// Sum of line totals, always > 0
    pub monetary: f64,
}

impl CustomerMetrics {
    /// Value of a single metric as a float, for quantile computation
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Recency => self.recency as f64,
            Metric::Frequency => self.frequency as f64,
            Metric::Monetary => self.monetary,
        }
    }
}

/// Ordinal quantile score in `1..=QUANTILE_COUNT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = QUANTILE_COUNT as u8;

    pub fn new(value: u8) -> Result<Self, RfmError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Score(value))
        } else {
            Err(RfmError::InvalidScore(format!(
                "{} is outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// Bucket indices from the scorer are always in range
    pub(crate) fn from_bucket(bucket: usize) -> Self {
        Score(bucket.clamp(Self::MIN as usize, Self::MAX as usize) as u8)
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// All valid scores in ascending order
    pub fn all() -> impl Iterator<Item = Score> {
        (Self::MIN..=Self::MAX).map(Score)
    }
}

impl TryFrom<u8> for Score {
    type Error = RfmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recency digit followed by frequency digit, e.g. `"51"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RfCode {
    pub recency: Score,
    pub frequency: Score,
}

impl RfCode {
    pub fn new(recency: Score, frequency: Score) -> Self {
        Self { recency, frequency }
    }

    /// Every valid code, recency-major
    pub fn all() -> impl Iterator<Item = RfCode> {
        Score::all().flat_map(|r| Score::all().map(move |f| RfCode::new(r, f)))
    }
}

impl fmt::Display for RfCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.recency, self.frequency)
    }
}

impl FromStr for RfCode {
    type Err = RfmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: Vec<char> = s.chars().collect();
        let parse_digit = |c: char| -> Result<Score, RfmError> {
            let value = c
                .to_digit(10)
                .ok_or_else(|| RfmError::InvalidScore(format!("rf_code {:?} is not numeric", s)))?;
            Score::new(value as u8)
        };

        match digits.as_slice() {
            [r, f] => Ok(RfCode::new(parse_digit(*r)?, parse_digit(*f)?)),
            _ => Err(RfmError::InvalidScore(format!(
                "rf_code {:?} must be exactly two digits",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RfCode {
    type Error = RfmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RfCode> for String {
    fn from(code: RfCode) -> Self {
        code.to_string()
    }
}

/// Customer metrics with quantile scores attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCustomer {
    #[serde(flatten)]
    pub metrics: CustomerMetrics,
    pub recency_score: Score,
    pub frequency_score: Score,
    pub monetary_score: Score,
    pub rf_code: RfCode,
}

/// Named customer segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Hibernating,
    AtRisk,
    CantLoose,
    AboutToSleep,
    NeedAttention,
    LoyalCustomers,
    Promising,
    NewCustomers,
    PotentialLoyalists,
    Champions,
}

impl Segment {
    pub const ALL: [Segment; 10] = [
        Segment::Hibernating,
        Segment::AtRisk,
        Segment::CantLoose,
        Segment::AboutToSleep,
        Segment::NeedAttention,
        Segment::LoyalCustomers,
        Segment::Promising,
        Segment::NewCustomers,
        Segment::PotentialLoyalists,
        Segment::Champions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Hibernating => "hibernating",
            Segment::AtRisk => "at_risk",
            Segment::CantLoose => "cant_loose",
            Segment::AboutToSleep => "about_to_sleep",
            Segment::NeedAttention => "need_attention",
            Segment::LoyalCustomers => "loyal_customers",
            Segment::Promising => "promising",
            Segment::NewCustomers => "new_customers",
            Segment::PotentialLoyalists => "potential_loyalists",
            Segment::Champions => "champions",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = RfmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::ALL
            .iter()
            .copied()
            .find(|segment| segment.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RfmError::ParseError(format!("Unknown segment: {}", s)))
    }
}

/// Scored customer with its segment label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedCustomer {
    #[serde(flatten)]
    pub scored: ScoredCustomer,
    pub segment: Segment,
}

impl SegmentedCustomer {
    pub fn customer_id(&self) -> CustomerId {
        self.scored.metrics.customer_id
    }

    pub fn metrics(&self) -> &CustomerMetrics {
        &self.scored.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert!(Score::new(0).is_err());
        assert!(Score::new(1).is_ok());
        assert!(Score::new(5).is_ok());
        assert!(Score::new(6).is_err());
        assert_eq!(Score::all().count(), QUANTILE_COUNT);
    }

    #[test]
    fn test_rf_code_display_and_parse() {
        let code = RfCode::new(Score::new(5).unwrap(), Score::new(1).unwrap());
        assert_eq!(code.to_string(), "51");
        assert_eq!("51".parse::<RfCode>().unwrap(), code);
    }

    #[test]
    fn test_rf_code_rejects_malformed() {
        for bad in ["", "5", "555", "06", "60", "a1", "1 "] {
            assert!(bad.parse::<RfCode>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_rf_code_all_covers_grid() {
        let codes: Vec<String> = RfCode::all().map(|c| c.to_string()).collect();
        assert_eq!(codes.len(), 25);
        assert_eq!(codes.first().map(String::as_str), Some("11"));
        assert_eq!(codes.last().map(String::as_str), Some("55"));
    }

    #[test]
    fn test_segment_round_trip_names() {
        for segment in Segment::ALL {
            assert_eq!(segment.as_str().parse::<Segment>().unwrap(), segment);
            let json = serde_json::to_string(&segment).unwrap();
            assert_eq!(json, format!("\"{}\"", segment.as_str()));
        }
        assert!("vip".parse::<Segment>().is_err());
    }

    #[test]
    fn test_scored_customer_serializes_flat() {
        let scored = ScoredCustomer {
            metrics: CustomerMetrics {
                customer_id: 100,
                recency: 10,
                frequency: 2,
                monetary: 500.0,
            },
            recency_score: Score::new(5).unwrap(),
            frequency_score: Score::new(5).unwrap(),
            monetary_score: Score::new(4).unwrap(),
            rf_code: "55".parse().unwrap(),
        };

        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["customer_id"], 100);
        assert_eq!(value["recency_score"], 5);
        assert_eq!(value["rf_code"], "55");
    }
}
