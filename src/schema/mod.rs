//! Tabular transaction input
//!
//! This module defines the raw row model for retail transaction exports and
//! the adapter that reads CSV and JSON sources into it. Column headers are
//! resolved to logical columns so schema problems surface before any row is
//! processed.

mod adapter;
mod raw_row;

pub use adapter::*;
pub use raw_row::*;
