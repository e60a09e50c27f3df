//! Ordered record table backed by CSV files.
//!
//! Every stage of the review works on one header plus N rows of string cells.
//! Row order is the record identity used when a screening run is resumed,
//! so nothing in here ever reorders rows.

use crate::error::{Result, SlrError};
use std::path::Path;
use tracing::debug;

/// A spreadsheet-like table: one header, N uniform rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Read a CSV file with a header row.
    ///
    /// Short rows are padded with empty cells so every row has `headers.len()`
    /// cells. A row with more cells than the header is a `Validation` error.
    /// A leading UTF-8 BOM is stripped.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect();

        let width = headers.len();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if record.len() > width {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(SlrError::Validation(format!(
                    "{}: line {} has {} fields, header has {}",
                    path.display(),
                    line,
                    record.len(),
                    width
                )));
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }

        debug!(path = %path.display(), rows = rows.len(), columns = width, "Loaded table");
        Ok(Self { headers, rows })
    }

    /// Overwrite `path` with the whole table.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        debug!(path = %path.display(), rows = self.rows.len(), "Saved table");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column, or `MissingColumn` naming it.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SlrError::MissingColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Index of a column, appending an empty one when it does not exist yet.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    /// Cell value by column name; absent columns read as the empty string.
    pub fn get(&self, row: usize, column: &str) -> &str {
        match (self.rows.get(row), self.headers.iter().position(|h| h == column)) {
            (Some(r), Some(c)) => r.get(c).map(String::as_str).unwrap_or(""),
            _ => "",
        }
    }

    pub fn set(&mut self, row: usize, column: usize, value: impl Into<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = value.into();
        }
    }

    /// Keep only rows for which `keep(index, row)` is true, preserving order.
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &[String]) -> bool,
    {
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .enumerate()
            .filter(|(i, r)| keep(*i, r))
            .map(|(_, r)| r)
            .collect();
    }

    /// Copy of the table holding only the rows matching `keep`.
    pub fn filtered<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&[String]) -> bool,
    {
        Table {
            headers: self.headers.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Append rows from another table, matching cells by column name.
    ///
    /// Columns unknown to `self` are added; cells missing from `other` stay empty.
    pub fn append(&mut self, other: &Table) {
        let mapping: Vec<usize> = other.headers.iter().map(|h| self.ensure_column(h)).collect();
        let width = self.headers.len();
        for src in &other.rows {
            let mut row = vec![String::new(); width];
            for (cell, &dst) in src.iter().zip(&mapping) {
                row[dst] = cell.clone();
            }
            self.rows.push(row);
        }
    }
}
