//! Event sanitization
//!
//! Turns raw rows into purchase events: rows with missing required values,
//! cancelled invoices and non-finite line totals are dropped. Missing values
//! are never an error; a missing required column is.

use crate::error::RfmError;
use crate::schema::{Column, RawTransactionRow, RawTransactions};
use crate::types::TransactionEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a row did not become an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "column")]
pub enum DropReason {
    MissingValue(Column),
    Cancelled,
    NonFiniteTotal,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingValue(column) => write!(f, "missing {}", column),
            DropReason::Cancelled => write!(f, "cancelled invoice"),
            DropReason::NonFiniteTotal => write!(f, "line total is not finite"),
        }
    }
}

/// Row counts from a sanitization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeReport {
    pub rows_read: usize,
    pub missing_values: usize,
    pub cancelled: usize,
    pub non_finite: usize,
    pub kept: usize,
}

impl SanitizeReport {
    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::MissingValue(_) => self.missing_values += 1,
            DropReason::Cancelled => self.cancelled += 1,
            DropReason::NonFiniteTotal => self.non_finite += 1,
        }
    }

    pub fn dropped(&self) -> usize {
        self.missing_values + self.cancelled + self.non_finite
    }
}

/// Stage 1 of the pipeline
pub struct EventSanitizer;

impl EventSanitizer {
    /// Sanitize a raw table into purchase events
    pub fn sanitize(raw: &RawTransactions) -> Result<Vec<TransactionEvent>, RfmError> {
        Self::sanitize_with_report(raw).map(|(events, _)| events)
    }

    /// Sanitize and return the per-reason drop counts
    pub fn sanitize_with_report(
        raw: &RawTransactions,
    ) -> Result<(Vec<TransactionEvent>, SanitizeReport), RfmError> {
        raw.require_columns()?;

        let mut report = SanitizeReport {
            rows_read: raw.len(),
            ..Default::default()
        };
        let mut events = Vec::with_capacity(raw.len());

        for row in &raw.rows {
            match Self::clean_row(row) {
                Ok(event) => events.push(event),
                Err(reason) => report.record(reason),
            }
        }
        report.kept = events.len();

        log::debug!(
            "Sanitized {} rows: kept {}, missing {}, cancelled {}, non-finite {}",
            report.rows_read,
            report.kept,
            report.missing_values,
            report.cancelled,
            report.non_finite
        );

        Ok((events, report))
    }

    /// Convert one row, or say why it is dropped
    ///
    /// Checks run in order: required values, cancellation marker, line total.
    pub fn clean_row(row: &RawTransactionRow) -> Result<TransactionEvent, DropReason> {
        let customer_id = row
            .customer_id
            .ok_or(DropReason::MissingValue(Column::CustomerId))?;
        let quantity = row
            .quantity
            .ok_or(DropReason::MissingValue(Column::Quantity))?;
        let unit_price = row
            .unit_price
            .ok_or(DropReason::MissingValue(Column::UnitPrice))?;
        let invoice_timestamp = row
            .invoice_timestamp
            .ok_or(DropReason::MissingValue(Column::InvoiceTimestamp))?;
        let invoice_id = row
            .invoice_id
            .clone()
            .ok_or(DropReason::MissingValue(Column::InvoiceId))?;

        if row.is_cancellation() {
            return Err(DropReason::Cancelled);
        }

        let line_total = quantity as f64 * unit_price;
        if !line_total.is_finite() {
            return Err(DropReason::NonFiniteTotal);
        }

        Ok(TransactionEvent {
            invoice_id,
            stock_code: row.stock_code.clone().unwrap_or_default(),
            description: row.description.clone().unwrap_or_default(),
            quantity,
            invoice_timestamp,
            unit_price,
            customer_id,
            country: row.country.clone().unwrap_or_default(),
            line_total,
        })
    }
}
