//! Screening task definitions.
//!
//! A task names its criteria, the prompts that ask about them, the parser
//! that reads the answers and the policy that turns verdicts into a decision.
//! Built-in presets live in [`crate::prompts`]; custom tasks load from JSON.

use crate::error::{Result, SlrError};
use crate::prompts;
use crate::table::Table;
use crate::verdict::{AggregationPolicy, ParserKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One screening criterion and the columns its results go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    /// Column receiving the verdict label (also the JSON decision field name)
    pub verdict_column: String,
    /// Column receiving the explanatory comment (also the JSON comment field name)
    #[serde(default)]
    pub comment_column: Option<String>,
    /// Answer line prefix, e.g. `FM/LLM` for `FM/LLM: Yes`
    #[serde(default)]
    pub marker: Option<String>,
    /// Answer meaning the paper passes this criterion
    #[serde(default = "default_include_token")]
    pub include_token: String,
    /// Answer meaning the paper fails this criterion
    #[serde(default = "default_exclude_token")]
    pub exclude_token: String,
}

fn default_include_token() -> String {
    "Yes".to_string()
}

fn default_exclude_token() -> String {
    "No".to_string()
}

/// One prompt sent per record, answering one or more criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// User prompt with `{column}` placeholders
    pub template: String,
    pub criteria: Vec<Criterion>,
    /// Ask the service for a JSON object response
    #[serde(default)]
    pub json_mode: bool,
    /// Columns that must be non-empty for the query to be sent
    #[serde(default)]
    pub require_nonempty: Vec<String>,
    /// Column receiving the raw answer text
    #[serde(default)]
    pub response_column: Option<String>,
}

/// A complete screening task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningTask {
    pub name: String,
    pub queries: Vec<Query>,
    pub parser: ParserKind,
    pub policy: AggregationPolicy,
    /// Overall decision column; a non-empty cell marks the record as done
    pub decision_column: String,
    /// Columns the input must have
    #[serde(default)]
    pub required_columns: Vec<String>,
}

impl ScreeningTask {
    /// Resolve a preset name or a path to a JSON task file.
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        if let Some(task) = prompts::preset(name_or_path) {
            return Ok(task);
        }
        let path = Path::new(name_or_path);
        if path.exists() {
            return Self::from_json_file(path);
        }
        Err(SlrError::Config(format!(
            "Unknown task '{}' (presets: {})",
            name_or_path,
            prompts::PRESET_NAMES.join(", ")
        )))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let task: ScreeningTask = serde_json::from_str(&content)?;
        task.validate()?;
        Ok(task)
    }

    /// Reject tasks the loop could not run.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(SlrError::Validation(format!("Task '{}' has no queries", self.name)));
        }
        if self.decision_column.trim().is_empty() {
            return Err(SlrError::Validation(format!(
                "Task '{}' has an empty decision column",
                self.name
            )));
        }
        for (i, query) in self.queries.iter().enumerate() {
            if query.criteria.is_empty() {
                return Err(SlrError::Validation(format!(
                    "Query {} of task '{}' has no criteria",
                    i + 1,
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.queries.iter().flat_map(|q| q.criteria.iter())
    }

    /// Fail on the first required column the table lacks.
    pub fn check_columns(&self, table: &Table) -> Result<()> {
        for column in &self.required_columns {
            table.column_index(column)?;
        }
        Ok(())
    }
}

impl Query {
    /// Fill `{column}` placeholders from one record.
    ///
    /// Placeholders naming absent columns become empty strings; anything else
    /// in braces (JSON examples in the prompt) is left alone.
    pub fn render(&self, table: &Table, row: usize) -> String {
        render_template(&self.template, |name| {
            if table.has_column(name) {
                Some(table.get(row, name).trim().to_string())
            } else if is_placeholder_name(name) {
                Some(String::new())
            } else {
                None
            }
        })
    }

    /// First required column that is blank for this record.
    pub fn missing_field<'a>(&'a self, table: &Table, row: usize) -> Option<&'a str> {
        self.require_nonempty
            .iter()
            .find(|col| table.get(row, col).trim().is_empty())
            .map(String::as_str)
    }
}

/// Single pass over `template`, substituting `{name}` where `lookup` returns a value.
///
/// Substituted values are never rescanned.
fn render_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let value = tail
            .find(|c: char| c == '}' || c == '{' || c == '\n')
            .filter(|&end| tail[end..].starts_with('}'))
            .and_then(|end| lookup(&tail[..end]).map(|v| (end, v)));
        match value {
            Some((end, v)) => {
                out.push_str(&v);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ' ' | '/'))
}
