//! Output tables
//!
//! Flat rows for the customer table and segment rosters, the per-segment
//! summary, and the JSON report envelope.

use crate::error::RfmError;
use crate::sanitizer::SanitizeReport;
use crate::types::{CustomerId, Segment, SegmentedCustomer};
use crate::{PRODUCER_NAME, RFM_VERSION};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// One row of the customer table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRow {
    pub customer_id: CustomerId,
    pub recency: i64,
    pub frequency: u32,
    pub monetary: f64,
    pub segment: Segment,
}

impl From<&SegmentedCustomer> for CustomerRow {
    fn from(customer: &SegmentedCustomer) -> Self {
        let metrics = customer.metrics();
        CustomerRow {
            customer_id: metrics.customer_id,
            recency: metrics.recency,
            frequency: metrics.frequency,
            monetary: metrics.monetary,
            segment: customer.segment,
        }
    }
}

/// One row of a segment roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRow {
    pub customer_id: CustomerId,
}

/// Mean metrics for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Per-segment means, for segments that have customers, in `order`
pub fn segment_summary(segments: &[SegmentedCustomer], order: &[Segment]) -> Vec<SegmentSummary> {
    order
        .iter()
        .filter_map(|&segment| {
            let members: Vec<&SegmentedCustomer> =
                segments.iter().filter(|c| c.segment == segment).collect();
            if members.is_empty() {
                return None;
            }

            let n = members.len() as f64;
            let mean = |f: fn(&SegmentedCustomer) -> f64| {
                members.iter().map(|&c| f(c)).sum::<f64>() / n
            };

            Some(SegmentSummary {
                segment,
                customers: members.len(),
                mean_recency: mean(|c| c.metrics().recency as f64),
                mean_frequency: mean(|c| c.metrics().frequency as f64),
                mean_monetary: mean(|c| c.metrics().monetary),
            })
        })
        .collect()
}

/// Producer metadata stamped on every report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

impl Default for Producer {
    fn default() -> Self {
        Producer {
            name: PRODUCER_NAME.to_string(),
            version: RFM_VERSION.to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Full result of one segmentation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmReport {
    pub producer: Producer,
    pub as_of: NaiveDateTime,
    pub generated_at: DateTime<Utc>,
    pub input: SanitizeReport,
    pub summary: Vec<SegmentSummary>,
    pub customers: Vec<CustomerRow>,
}

impl RfmReport {
    pub fn new(
        segments: &[SegmentedCustomer],
        segment_order: &[Segment],
        input: SanitizeReport,
        as_of: NaiveDateTime,
    ) -> Self {
        RfmReport {
            producer: Producer::default(),
            as_of,
            generated_at: Utc::now(),
            input,
            summary: segment_summary(segments, segment_order),
            customers: segments.iter().map(CustomerRow::from).collect(),
        }
    }
}

/// Write the customer table as CSV with a header row
pub fn write_customers_csv<W: Write>(writer: W, rows: &[CustomerRow]) -> Result<(), RfmError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write a roster as CSV with a `customer_id` header
pub fn write_roster_csv<W: Write>(writer: W, customer_ids: &[CustomerId]) -> Result<(), RfmError> {
    // Header written by hand so an empty roster still has one
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(["customer_id"])?;
    for customer_id in customer_ids {
        csv_writer.serialize(RosterRow {
            customer_id: *customer_id,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}
