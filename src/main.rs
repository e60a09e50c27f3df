//! rustslr - Systematic Literature Review toolkit
//!
//! Merges database exports, removes duplicate titles and screens papers against
//! inclusion/exclusion criteria with an LLM.
//!
//! ## Usage
//!
//! ```bash
//! rustslr merge ieee.csv acm.csv -o merged.csv
//! rustslr dedup merged.csv --threshold 95
//! rustslr screen merged_deduplicated.csv --task inclusion --llm-key sk-...
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rustslr::dedup;
use rustslr::llm_client::{ChatClient, LlmConfig, TokenUsage};
use rustslr::merge::{merge_csv_files, MergeOptions};
use rustslr::prompts;
use rustslr::retry::{Backoff, RetryPolicy};
use rustslr::screening::{self, CsvProgress, ScreeningOptions};
use rustslr::table::Table;
use rustslr::task::ScreeningTask;
use rustslr::verdict::Decision;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Systematic Literature Review toolkit
#[derive(Parser)]
#[command(name = "rustslr")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge CSV exports into one file (union of all columns)
    Merge {
        /// CSV files to merge, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file
        #[arg(short, long, default_value = "merged.csv")]
        output: PathBuf,

        /// Add a column with each row's source file name
        #[arg(long)]
        source_column: Option<String>,

        /// Skip files that cannot be read
        #[arg(long)]
        skip_unreadable: bool,
    },

    /// Remove exact and near-duplicate titles
    Dedup {
        /// Input CSV file
        input: PathBuf,

        /// Output file (default: <input>_deduplicated.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column holding the title
        #[arg(long, default_value = "title")]
        title_column: String,

        /// Similarity threshold 0-100; pairs scoring at or above it are duplicates
        #[arg(long, default_value_t = dedup::DEFAULT_THRESHOLD, value_parser = clap::value_parser!(u8).range(0..=100))]
        threshold: u8,
    },

    /// Screen records with an LLM, resuming from the output file if it exists
    Screen {
        /// Input CSV file
        input: PathBuf,

        /// Preset name (inclusion, venue, exclusion) or path to a JSON task file
        #[arg(long)]
        task: String,

        /// All results, also the resume checkpoint (default: <input>_<task>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Included-only results (default: <output>_included.csv)
        #[arg(long)]
        included: Option<PathBuf>,

        /// Save progress every N records
        #[arg(long, default_value_t = screening::DEFAULT_CHECKPOINT_INTERVAL)]
        checkpoint_every: usize,

        /// Delay between consecutive LLM calls in milliseconds
        #[arg(long, default_value = "1000")]
        delay_ms: u64,

        /// Attempts per LLM call
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Wait growth between attempts
        #[arg(long, default_value = "linear", value_parser = ["constant", "linear", "exponential"])]
        backoff: String,

        /// Base wait between attempts in milliseconds
        #[arg(long, default_value = "5000")]
        backoff_base_ms: u64,

        /// Screen at most N new records in this run
        #[arg(long)]
        limit: Option<usize>,

        /// LLM API base URL
        #[arg(long, default_value = "https://api.openai.com/v1")]
        llm_base_url: String,

        /// LLM API key
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        llm_key: String,

        /// LLM model name
        #[arg(long, default_value = "gpt-4o-mini")]
        llm_model: String,
    },

    /// List built-in screening tasks
    Tasks,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Merge {
            inputs,
            output,
            source_column,
            skip_unreadable,
        } => run_merge(&inputs, &output, source_column, skip_unreadable),
        Commands::Dedup {
            input,
            output,
            title_column,
            threshold,
        } => {
            let output = output.unwrap_or_else(|| sibling(&input, "deduplicated"));
            run_dedup(&input, &output, &title_column, threshold)
        }
        Commands::Screen {
            input,
            task,
            output,
            included,
            checkpoint_every,
            delay_ms,
            max_retries,
            backoff,
            backoff_base_ms,
            limit,
            llm_base_url,
            llm_key,
            llm_model,
        } => {
            let task = ScreeningTask::resolve(&task).context("Invalid --task")?;
            let output = output.unwrap_or_else(|| sibling(&input, &task.name));
            let included = included.unwrap_or_else(|| sibling(&output, "included"));
            let backoff: Backoff = backoff.parse().context("Invalid --backoff")?;

            let options = ScreeningOptions {
                checkpoint_every,
                retry: RetryPolicy {
                    max_attempts: max_retries,
                    backoff,
                    base_delay: Duration::from_millis(backoff_base_ms),
                },
                call_delay: Duration::from_millis(delay_ms),
                limit,
            };
            let config = LlmConfig {
                base_url: llm_base_url,
                api_key: llm_key,
                model: llm_model,
            };

            run_screen(&input, &task, &output, &included, &options, config).await
        }
        Commands::Tasks => {
            for name in prompts::PRESET_NAMES {
                println!("{:<10} {}", name, prompts::describe(name));
            }
            Ok(())
        }
    }
}

/// `dir/stem.csv` -> `dir/stem_<suffix>.csv`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{}_{}.csv", stem, suffix))
}

// ============================================================================
// Merge
// ============================================================================

fn run_merge(
    inputs: &[PathBuf],
    output: &Path,
    source_column: Option<String>,
    skip_unreadable: bool,
) -> Result<()> {
    println!("Found {} files to merge.", inputs.len());

    let options = MergeOptions {
        source_column,
        skip_unreadable,
    };
    let merged = merge_csv_files(inputs, &options).context("Failed to merge inputs")?;

    merged.write_csv(output).context("Failed to write merged file")?;
    println!("Merge complete: {} rows, {} columns", merged.len(), merged.headers.len());
    println!("Saved: {:?}", output);
    Ok(())
}

// ============================================================================
// Dedup
// ============================================================================

fn run_dedup(input: &Path, output: &Path, title_column: &str, threshold: u8) -> Result<()> {
    println!("Reading file: {:?}", input);
    let mut table = Table::read_csv(input).with_context(|| format!("Failed to read {:?}", input))?;
    println!("Original number of articles: {}", table.len());

    let report = dedup::deduplicate(&mut table, title_column, threshold)
        .context("Deduplication failed")?;

    println!(
        "Remaining after exact deduplication: {} (removed {} exact duplicates)",
        report.initial - report.exact_removed,
        report.exact_removed
    );
    println!(
        "Remaining after fuzzy matching: {} (removed {} near duplicates)",
        report.remaining, report.fuzzy_removed
    );

    table.write_csv(output).context("Failed to write deduplicated file")?;
    println!(
        "\n✓ Deduplication complete. {} articles removed. Saved: {:?}",
        report.initial - report.remaining,
        output
    );
    Ok(())
}

// ============================================================================
// Screening
// ============================================================================

async fn run_screen(
    input: &Path,
    task: &ScreeningTask,
    output: &Path,
    included: &Path,
    options: &ScreeningOptions,
    config: LlmConfig,
) -> Result<()> {
    let client = ChatClient::new(config).context("Failed to configure LLM client")?;
    let table = screening::load_for_screening(input, output)
        .with_context(|| format!("Failed to load {:?}", input))?;

    println!(
        "Screening {} articles with task '{}' using {}...",
        table.len(),
        task.name,
        client.model()
    );

    let mut sink = CsvProgress::new(output);
    let (table, report) = screening::run_screening(&client, task, table, options, &mut sink)
        .await
        .context("Screening failed")?;

    let included_table = screening::included_only(&table, task);
    included_table
        .write_csv(included)
        .context("Failed to write included file")?;

    if report.processed > 0 {
        append_token_log(output, &report.usage)?;
    }

    println!("\n--- Screening Complete ---");
    println!("Screened this run: {} (skipped {} already done)", report.processed, report.skipped);
    println!(
        "Include: {}, Exclude: {}, Review Manually: {}",
        report.count(Decision::Include),
        report.count(Decision::Exclude),
        report.count(Decision::ReviewManually)
    );
    println!(
        "Token usage: {} prompt + {} completion = {} total",
        report.usage.prompt_tokens, report.usage.completion_tokens, report.usage.total_tokens
    );
    println!("Results saved to {:?}", sink.path());
    println!("Included articles ({}) saved to {:?}", included_table.len(), included);
    Ok(())
}

/// Append `timestamp,prompt,completion,total` to `<output>.tokens.log`
fn append_token_log(output: &Path, usage: &TokenUsage) -> Result<()> {
    let mut log_path = output.as_os_str().to_owned();
    log_path.push(".tokens.log");
    let log_path = PathBuf::from(log_path);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open token usage log")?;
    writeln!(
        file,
        "{},{},{},{}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens
    )
    .context("Failed to write token usage log")?;

    info!(path = %log_path.display(), total_tokens = usage.total_tokens, "Token usage logged");
    Ok(())
}
