//! # rustslr
//!
//! Systematic Literature Review toolkit
//!
//! ## Modules
//!
//! - [`merge`] - Merge CSV exports from several databases
//! - [`dedup`] - Exact and fuzzy title deduplication
//! - [`screening`] - Resumable LLM screening loop with checkpoints
//! - [`task`] / [`prompts`] - Screening criteria, prompts and presets
//! - [`llm_client`] - OpenAI-compatible chat completion client
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustslr::{dedup, table::Table};
//! use std::path::Path;
//!
//! fn main() -> rustslr::Result<()> {
//!     let mut table = Table::read_csv(Path::new("merged.csv"))?;
//!     let report = dedup::deduplicate(&mut table, "title", dedup::DEFAULT_THRESHOLD)?;
//!     println!("Removed {} duplicates", report.exact_removed + report.fuzzy_removed);
//!     table.write_csv(Path::new("deduplicated.csv"))
//! }
//! ```

pub mod dedup;
pub mod error;
pub mod fuzzy;
pub mod llm_client;
pub mod merge;
pub mod prompts;
pub mod retry;
pub mod screening;
pub mod table;
pub mod task;
pub mod verdict;

pub use error::{Result, SlrError};
