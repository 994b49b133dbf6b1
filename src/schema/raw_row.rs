//! Raw transaction row model
//!
//! Rows as they come out of a spreadsheet or export: every field optional,
//! columns identified by one of several accepted header spellings.

use crate::error::RfmError;
use crate::types::CustomerId;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Marker character that flags a cancelled invoice
pub const CANCELLATION_MARKER: char = 'C';

/// Timestamp layouts accepted in InvoiceDate cells
const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Logical input columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    InvoiceId,
    StockCode,
    Description,
    Quantity,
    InvoiceTimestamp,
    UnitPrice,
    CustomerId,
    Country,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::InvoiceId,
        Column::StockCode,
        Column::Description,
        Column::Quantity,
        Column::InvoiceTimestamp,
        Column::UnitPrice,
        Column::CustomerId,
        Column::Country,
    ];

    /// Columns that must be present for sanitization to run
    pub const REQUIRED: [Column; 5] = [
        Column::CustomerId,
        Column::Quantity,
        Column::UnitPrice,
        Column::InvoiceTimestamp,
        Column::InvoiceId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::InvoiceId => "invoice_id",
            Column::StockCode => "stock_code",
            Column::Description => "description",
            Column::Quantity => "quantity",
            Column::InvoiceTimestamp => "invoice_timestamp",
            Column::UnitPrice => "unit_price",
            Column::CustomerId => "customer_id",
            Column::Country => "country",
        }
    }

    /// Header spellings seen in retail exports
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Column::InvoiceId => &["Invoice", "InvoiceNo", "invoice_id"],
            Column::StockCode => &["StockCode", "stock_code"],
            Column::Description => &["Description", "description"],
            Column::Quantity => &["Quantity", "quantity"],
            Column::InvoiceTimestamp => &["InvoiceDate", "invoice_timestamp", "invoice_date"],
            Column::UnitPrice => &["Price", "UnitPrice", "unit_price"],
            Column::CustomerId => &["Customer ID", "CustomerID", "customer_id"],
            Column::Country => &["Country", "country"],
        }
    }

    /// Resolve a header to a column, ignoring surrounding whitespace
    pub fn from_header(header: &str) -> Option<Column> {
        let header = header.trim();
        Column::ALL
            .iter()
            .copied()
            .find(|column| column.aliases().contains(&header))
    }

    pub fn is_required(&self) -> bool {
        Column::REQUIRED.contains(self)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single untyped cell (JSON numbers or strings, CSV text)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

impl CellValue {
    /// Blank text counts as a missing value
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Integer(i) => i.to_string(),
            CellValue::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            CellValue::Number(n) => integral(*n),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

fn integral(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

/// Parse an InvoiceDate cell in any of the accepted layouts
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// One row of the source table, fields typed but optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_timestamp: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl RawTransactionRow {
    /// Create a row with every required field populated
    pub fn purchase(
        invoice_id: impl Into<String>,
        customer_id: CustomerId,
        quantity: i64,
        unit_price: f64,
        invoice_timestamp: NaiveDateTime,
    ) -> Self {
        RawTransactionRow {
            invoice_id: Some(invoice_id.into()),
            quantity: Some(quantity),
            invoice_timestamp: Some(invoice_timestamp),
            unit_price: Some(unit_price),
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    /// Attach product information
    pub fn with_product(
        mut self,
        stock_code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.stock_code = Some(stock_code.into());
        self.description = Some(description.into());
        self
    }

    /// Attach the country of the buyer
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Store a cell under its column, converting it to the column's type
    pub fn set_cell(&mut self, column: Column, cell: &CellValue) -> Result<(), String> {
        if cell.is_blank() {
            return Ok(());
        }

        match column {
            Column::InvoiceId => self.invoice_id = Some(cell.as_text()),
            Column::StockCode => self.stock_code = Some(cell.as_text()),
            Column::Description => self.description = Some(cell.as_text()),
            Column::Country => self.country = Some(cell.as_text()),
            Column::Quantity => {
                self.quantity = Some(
                    cell.as_i64()
                        .ok_or_else(|| format!("quantity {:?} is not an integer", cell))?,
                );
            }
            Column::UnitPrice => {
                self.unit_price = Some(
                    cell.as_f64()
                        .ok_or_else(|| format!("unit_price {:?} is not a number", cell))?,
                );
            }
            Column::InvoiceTimestamp => {
                self.invoice_timestamp = Some(
                    cell.as_timestamp()
                        .ok_or_else(|| format!("invoice_timestamp {:?} is not a timestamp", cell))?,
                );
            }
            Column::CustomerId => {
                let id = cell
                    .as_i64()
                    .and_then(|id| CustomerId::try_from(id).ok())
                    .ok_or_else(|| {
                        format!("customer_id {:?} is not a non-negative integer", cell)
                    })?;
                self.customer_id = Some(id);
            }
        }

        Ok(())
    }

    /// Whether the invoice id carries the cancellation marker
    pub fn is_cancellation(&self) -> bool {
        self.invoice_id
            .as_deref()
            .is_some_and(|id| id.contains(CANCELLATION_MARKER))
    }
}

/// A parsed source table: the columns it declares plus its rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactions {
    pub columns: BTreeSet<Column>,
    pub rows: Vec<RawTransactionRow>,
}

impl RawTransactions {
    pub fn new(columns: impl IntoIterator<Item = Column>, rows: Vec<RawTransactionRow>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            rows,
        }
    }

    /// Table declaring every known column
    pub fn with_all_columns(rows: Vec<RawTransactionRow>) -> Self {
        Self::new(Column::ALL, rows)
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    /// Fail if any required column is absent from the schema
    pub fn require_columns(&self) -> Result<(), RfmError> {
        match Column::REQUIRED.iter().find(|c| !self.has_column(**c)) {
            Some(column) => Err(RfmError::Schema {
                column: column.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
