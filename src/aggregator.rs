//! Customer aggregation
//!
//! Groups purchase events by customer and computes raw recency, frequency and
//! monetary values. Accumulators are mergeable so shards of the input can be
//! folded independently and combined afterwards with the same result.

use crate::error::RfmError;
use crate::types::{CustomerId, CustomerMetrics, TransactionEvent};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Minor units per currency unit used while summing spend
pub const MONETARY_SCALE: f64 = 10_000.0;

/// Fixed-point amount in `1 / MONETARY_SCALE` units
///
/// Integer sums are exact, so totals do not depend on event order.
fn to_minor_units(amount: f64) -> i128 {
    (amount * MONETARY_SCALE).round() as i128
}

fn from_minor_units(units: i128) -> f64 {
    units as f64 / MONETARY_SCALE
}

/// Which invoice recency is measured from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyAnchor {
    /// Days since the most recent invoice
    #[default]
    LastPurchase,
    /// Days since the earliest invoice (customer tenure)
    FirstPurchase,
}

/// Partial aggregate for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAccumulator {
    first_purchase: NaiveDateTime,
    last_purchase: NaiveDateTime,
    invoices: HashSet<String>,
    monetary_units: i128,
}

impl CustomerAccumulator {
    fn new(event: &TransactionEvent) -> Self {
        CustomerAccumulator {
            first_purchase: event.invoice_timestamp,
            last_purchase: event.invoice_timestamp,
            invoices: HashSet::from([event.invoice_id.clone()]),
            monetary_units: to_minor_units(event.line_total),
        }
    }

    fn add_event(&mut self, event: &TransactionEvent) {
        self.first_purchase = self.first_purchase.min(event.invoice_timestamp);
        self.last_purchase = self.last_purchase.max(event.invoice_timestamp);
        self.invoices.insert(event.invoice_id.clone());
        self.monetary_units += to_minor_units(event.line_total);
    }

    /// Combine two partials for the same customer
    pub fn merge(&mut self, other: CustomerAccumulator) {
        self.first_purchase = self.first_purchase.min(other.first_purchase);
        self.last_purchase = self.last_purchase.max(other.last_purchase);
        self.invoices.extend(other.invoices);
        self.monetary_units += other.monetary_units;
    }

    fn anchor(&self, anchor: RecencyAnchor) -> NaiveDateTime {
        match anchor {
            RecencyAnchor::LastPurchase => self.last_purchase,
            RecencyAnchor::FirstPurchase => self.first_purchase,
        }
    }
}

/// Per-customer partials for one shard of events, keyed in customer order
#[derive(Debug, Clone, Default)]
pub struct PartialAggregate {
    customers: BTreeMap<CustomerId, CustomerAccumulator>,
}

impl PartialAggregate {
    /// Fold a shard of events
    pub fn from_events(events: &[TransactionEvent]) -> Self {
        let mut partial = PartialAggregate::default();
        for event in events {
            partial
                .customers
                .entry(event.customer_id)
                .and_modify(|acc| acc.add_event(event))
                .or_insert_with(|| CustomerAccumulator::new(event));
        }
        partial
    }

    /// Merge another shard into this one
    pub fn merge(&mut self, other: PartialAggregate) {
        for (customer_id, acc) in other.customers {
            match self.customers.get_mut(&customer_id) {
                Some(existing) => existing.merge(acc),
                None => {
                    self.customers.insert(customer_id, acc);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Finish aggregation against the reference date
    ///
    /// Customers with non-positive net spend are dropped. Any invoice dated
    /// after `as_of` fails the whole batch.
    pub fn finish(
        self,
        as_of: NaiveDateTime,
        anchor: RecencyAnchor,
    ) -> Result<Vec<CustomerMetrics>, RfmError> {
        let total = self.customers.len();
        let mut metrics = Vec::with_capacity(total);

        for (customer_id, acc) in self.customers {
            if acc.last_purchase > as_of {
                return Err(RfmError::DataIntegrity(format!(
                    "customer {} has an invoice at {} after the reference date {}",
                    customer_id, acc.last_purchase, as_of
                )));
            }

            let recency = (as_of - acc.anchor(anchor)).num_days();
            let frequency = acc.invoices.len() as u32;
            if frequency == 0 {
                return Err(RfmError::DataIntegrity(format!(
                    "customer {} has no invoices",
                    customer_id
                )));
            }

            if acc.monetary_units <= 0 {
                continue;
            }

            metrics.push(CustomerMetrics {
                customer_id,
                recency,
                frequency,
                monetary: from_minor_units(acc.monetary_units),
            });
        }

        log::debug!(
            "Aggregated {} customers, {} with positive spend",
            total,
            metrics.len()
        );

        Ok(metrics)
    }
}

/// Stage 2 of the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerAggregator {
    anchor: RecencyAnchor,
}

impl CustomerAggregator {
    pub fn new(anchor: RecencyAnchor) -> Self {
        Self { anchor }
    }

    /// Aggregate events into per-customer metrics, ordered by customer id
    pub fn aggregate(
        &self,
        events: &[TransactionEvent],
        as_of: NaiveDateTime,
    ) -> Result<Vec<CustomerMetrics>, RfmError> {
        PartialAggregate::from_events(events).finish(as_of, self.anchor)
    }

    /// Aggregate independently folded shards
    pub fn aggregate_partitions<'a>(
        &self,
        partitions: impl IntoIterator<Item = &'a [TransactionEvent]>,
        as_of: NaiveDateTime,
    ) -> Result<Vec<CustomerMetrics>, RfmError> {
        partitions
            .into_iter()
            .map(PartialAggregate::from_events)
            .fold(PartialAggregate::default(), |mut merged, partial| {
                merged.merge(partial);
                merged
            })
            .finish(as_of, self.anchor)
    }
}
