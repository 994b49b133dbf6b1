//! RFM Segments - recency, frequency, monetary scoring for retail customers
//!
//! Turns per-line retail transactions into customer segments through a
//! deterministic pipeline: sanitization → per-customer aggregation → quantile
//! scoring → rule-based segment classification.
//!
//! ## Modules
//!
//! - **Schema**: Read CSV / JSON transaction exports into raw rows
//! - **Pipeline**: Run all stages against an explicit reference date
//! - **Report**: Customer tables, segment rosters and per-segment summaries

pub mod aggregator;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod sanitizer;
pub mod schema;
pub mod scorer;
pub mod segment;
pub mod types;

pub use error::RfmError;
pub use pipeline::{compute_segments, customers_in_segment, RfmConfig, RfmProcessor};
pub use segment::SegmentRules;
pub use types::{
    CustomerId, CustomerMetrics, RfCode, Score, ScoredCustomer, Segment, SegmentedCustomer,
    TransactionEvent, QUANTILE_COUNT,
};

// Schema exports
pub use schema::{RawTransactionAdapter, RawTransactionRow, RawTransactions};

/// Crate version embedded in every report
pub const RFM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "rfm-segments";
