//! Merge several CSV exports into one table.
//!
//! Database exports rarely share a header, so columns are matched by name and
//! the result carries the union of all headers in first-seen order.

use crate::error::{Result, SlrError};
use crate::table::Table;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Merge options
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Add a column holding each row's source file name
    pub source_column: Option<String>,
    /// Skip unreadable files instead of failing
    pub skip_unreadable: bool,
}

/// Concatenate `paths` in order.
pub fn merge_csv_files(paths: &[PathBuf], options: &MergeOptions) -> Result<Table> {
    if paths.is_empty() {
        return Err(SlrError::Validation("No input files to merge".to_string()));
    }

    let mut merged = Table::default();
    let mut files_read = 0;

    for path in paths {
        let mut table = match Table::read_csv(path) {
            Ok(t) => t,
            Err(e) if options.skip_unreadable => {
                warn!(path = %path.display(), error = %e, "Could not read file, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Some(column) = &options.source_column {
            let idx = table.ensure_column(column);
            let name = file_name(path);
            for row in 0..table.len() {
                table.set(row, idx, name.as_str());
            }
        }

        info!(path = %path.display(), rows = table.len(), "Read export");
        merged.append(&table);
        files_read += 1;
    }

    if files_read == 0 {
        return Err(SlrError::Validation("No data was read from the input files".to_string()));
    }

    info!(files = files_read, rows = merged.len(), "Merge complete");
    Ok(merged)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
