//! Adapter for reading tabular transaction exports into RawTransactions
//!
//! Headers are resolved to logical columns up front so the sanitizer can
//! reject a source whose schema lacks a required column. Unknown columns are
//! ignored.

use crate::error::RfmError;
use crate::schema::raw_row::*;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

/// Adapter for converting CSV / JSON exports to raw transaction rows
pub struct RawTransactionAdapter;

impl RawTransactionAdapter {
    /// Parse CSV with a header row
    pub fn parse_csv<R: Read>(reader: R) -> Result<RawTransactions, RfmError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mapping: Vec<Option<Column>> = headers.iter().map(Column::from_header).collect();
        let columns: BTreeSet<Column> = mapping.iter().flatten().copied().collect();

        for (header, column) in headers.iter().zip(&mapping) {
            if column.is_none() {
                log::debug!("Ignoring unknown column {:?}", header);
            }
        }

        let mut rows = Vec::new();
        for (idx, record) in csv_reader.records().enumerate() {
            let record = record?;
            // Quoted cells may span lines, so take the line the record starts on
            let line = record
                .position()
                .map_or(idx + 2, |position| position.line() as usize);
            let cells = mapping
                .iter()
                .zip(record.iter())
                .filter_map(|(column, text)| column.map(|c| (c, CellValue::from(text))));
            rows.push(build_row(cells, line)?);
        }

        log::debug!("Parsed {} CSV rows with {} known columns", rows.len(), columns.len());
        Ok(RawTransactions { columns, rows })
    }

    /// Parse a CSV file from disk
    pub fn parse_csv_file(path: &Path) -> Result<RawTransactions, RfmError> {
        let file = std::fs::File::open(path)?;
        Self::parse_csv(file)
    }

    /// Parse NDJSON (one JSON object per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<RawTransactions, RfmError> {
        let mut objects = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<HashMap<String, Option<CellValue>>>(trimmed) {
                Ok(object) => objects.push((line_num + 1, object)),
                Err(e) => {
                    return Err(RfmError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        from_objects(objects)
    }

    /// Parse a JSON array of row objects
    pub fn parse_array(json: &str) -> Result<RawTransactions, RfmError> {
        let objects: Vec<HashMap<String, Option<CellValue>>> = serde_json::from_str(json)?;
        from_objects(
            objects
                .into_iter()
                .enumerate()
                .map(|(idx, object)| (idx + 1, object))
                .collect(),
        )
    }
}

/// Column set is the union of keys seen across all objects
fn from_objects(
    objects: Vec<(usize, HashMap<String, Option<CellValue>>)>,
) -> Result<RawTransactions, RfmError> {
    let mut columns = BTreeSet::new();
    let mut rows = Vec::with_capacity(objects.len());

    for (line, object) in objects {
        let mut cells = Vec::with_capacity(object.len());
        for (key, value) in object {
            let Some(column) = Column::from_header(&key) else {
                continue;
            };
            columns.insert(column);
            if let Some(value) = value {
                cells.push((column, value));
            }
        }
        rows.push(build_row(cells, line)?);
    }

    log::debug!("Parsed {} JSON rows with {} known columns", rows.len(), columns.len());
    Ok(RawTransactions { columns, rows })
}

fn build_row(
    cells: impl IntoIterator<Item = (Column, CellValue)>,
    line: usize,
) -> Result<RawTransactionRow, RfmError> {
    let mut row = RawTransactionRow::default();
    for (column, cell) in cells {
        row.set_cell(column, &cell)
            .map_err(|e| RfmError::ParseError(format!("line {}: {}", line, e)))?;
    }
    Ok(row)
}
