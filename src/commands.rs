// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command runners for the codeseek binary

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codeseek::config::{Config, EmbeddingConfig};
use codeseek::embedding::{create_backend, StoreLocation, VectorStore};
use codeseek::errors::SearchError;
use codeseek::indexer::{
    IndexOptions, IndexSummary, PipelineConfig, SearchResponse, SemanticIndex, Watcher,
};
use codeseek::output::{
    colorize_kind, colorize_line_num, colorize_name, colorize_path, colorize_score, to_json,
    use_colors, warning_label,
};
use codeseek::utils::get_root_with_index;

use crate::cli::OutputFormat;

/// How results are rendered
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub format: OutputFormat,
    pub compact: bool,
    pub color: bool,
}

impl Printer {
    pub fn new(format: OutputFormat, compact: bool) -> Self {
        Self {
            format,
            compact,
            color: use_colors(),
        }
    }

    fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn resolve_root(path: Option<&str>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(PathBuf::from(p)),
        None => std::env::current_dir().context("Cannot determine current directory"),
    }
}

fn embedding_config(config: &Config) -> Result<EmbeddingConfig> {
    config
        .embeddings
        .clone()
        .with_env_overrides()
        .context("Invalid embedding override in environment")
}

/// True when the store is a database file that was never created.
fn store_missing(location: &StoreLocation) -> bool {
    matches!(location, StoreLocation::Path(path) if !path.exists())
}

fn print_missing_index(location: &StoreLocation, printer: Printer) {
    eprintln!(
        "No index found at {}. Run `codeseek index` first.",
        colorize_path(&location.to_string(), printer.color)
    );
}

/// Open the index for `root` using the loaded configuration
fn open_index(root: &Path, config: &Config) -> Result<SemanticIndex> {
    let embeddings = embedding_config(config)?;
    let backend = create_backend(&embeddings);

    let location = config.store_location(root);
    let store = VectorStore::open(&location)
        .with_context(|| format!("Failed to open vector store at {}", location))?;

    Ok(SemanticIndex::new(
        backend,
        Arc::new(store),
        PipelineConfig::from(&embeddings),
    ))
}

fn index_options(config: &Config, force: bool, mut exclude_paths: Vec<String>) -> IndexOptions {
    // CLI excludes first, then config
    exclude_paths.extend(config.index.exclude_paths().iter().cloned());
    IndexOptions {
        force,
        exclude_paths,
        max_file_size: Some(config.index.max_file_size()),
        ..IndexOptions::default()
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} files | Indexing {msg}")
            .expect("valid progress bar template")
            .progress_chars("##."),
    );
    pb
}

/// Run the index command
pub fn index(path: Option<&str>, force: bool, exclude_paths: Vec<String>, printer: Printer) -> Result<()> {
    let root = resolve_root(path)?;
    let config = Config::load();
    let index = open_index(&root, &config)?;

    let mut options = index_options(&config, force, exclude_paths);
    if !printer.is_json() {
        options.progress = Some(progress_bar());
    }

    let summary = index.index(&root, &options)?;
    print_summary(&summary, printer)?;

    match index.degraded_error() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_summary(summary: &IndexSummary, printer: Printer) -> Result<()> {
    if printer.is_json() {
        println!("{}", to_json(summary, printer.compact)?);
        return Ok(());
    }

    for failure in &summary.failures {
        eprintln!(
            "{} {} {}: {}",
            warning_label(printer.color),
            failure.kind.as_str(),
            colorize_path(&failure.path, printer.color),
            failure.message
        );
    }

    if summary.cancelled {
        eprintln!("{} indexing was cancelled", warning_label(printer.color));
    }

    let indexed = if printer.color {
        summary.files_indexed.to_string().cyan().to_string()
    } else {
        summary.files_indexed.to_string()
    };
    println!(
        "{} Indexed {} files ({} unchanged, {} removed, {} total) | {} entities, {} embedded",
        if printer.color { "✓".green().to_string() } else { "✓".to_string() },
        indexed,
        summary.files_skipped,
        summary.files_removed,
        summary.files_scanned,
        summary.entities,
        summary.embedded
    );
    Ok(())
}

/// Run the search command
pub fn search(query: &str, path: Option<&str>, limit: Option<usize>, printer: Printer) -> Result<()> {
    let root = get_root_with_index(resolve_root(path)?);
    let config = Config::load();

    let location = config.store_location(&root);
    if store_missing(&location) {
        let backend = create_backend(&embedding_config(&config)?);
        if !backend.is_available() {
            let reason = backend
                .unavailable_reason()
                .unwrap_or("embedding backend is unavailable");
            return Err(SearchError::unavailable(backend.model_name(), reason).into());
        }
        print_missing_index(&location, printer);
        return Ok(());
    }

    let index = open_index(&root, &config)?;
    let response = index.search(query, config.merge_limit(limit))?;

    if printer.is_json() {
        println!("{}", to_json(&response, printer.compact)?);
        return Ok(());
    }

    print_hits(&response, printer);
    if response.hits.is_empty() && index.store().is_empty() {
        println!("No results. Run `codeseek index` first.");
    }
    Ok(())
}

fn print_hits(response: &SearchResponse, printer: Printer) {
    for warning in &response.warnings {
        eprintln!("{} {}", warning_label(printer.color), warning);
    }

    for hit in &response.hits {
        let file = hit.meta_str("file_path").unwrap_or(&hit.node_id);
        let name = hit
            .meta_str("qualified_name")
            .or_else(|| hit.meta_str("name"))
            .unwrap_or(&hit.node_id);
        let kind = hit.meta_str("kind").unwrap_or("entity");
        let line = hit
            .metadata
            .get("start_line")
            .and_then(|v| v.as_f64())
            .map(|l| l as usize + 1)
            .unwrap_or(1);

        println!(
            "{}:{} {} {} ({})",
            colorize_path(file, printer.color),
            colorize_line_num(line, printer.color),
            colorize_kind(kind, printer.color),
            colorize_name(name, printer.color),
            colorize_score(hit.score, printer.color)
        );
    }
}

/// Run the stats command
pub fn stats(path: Option<&str>, printer: Printer) -> Result<()> {
    let root = get_root_with_index(resolve_root(path)?);
    let config = Config::load();

    let location = config.store_location(&root);
    if store_missing(&location) {
        print_missing_index(&location, printer);
        return Ok(());
    }

    let index = open_index(&root, &config)?;
    let stats = index.stats();

    if printer.is_json() {
        println!("{}", to_json(&stats, printer.compact)?);
        return Ok(());
    }

    println!("Store:   {}", colorize_path(&stats.location, printer.color));
    println!("Records: {} across {} files", stats.records, stats.files);
    let status = match &stats.unavailable_reason {
        Some(reason) => format!("unavailable: {}", reason),
        None => "available".to_string(),
    };
    println!(
        "Backend: {} ({}d, {})",
        colorize_name(&stats.backend_model, printer.color),
        stats.backend_dimension,
        status
    );
    for model in &stats.models {
        println!("  {} ({}d): {} records", model.model_name, model.dimensions, model.records);
    }
    Ok(())
}

/// Run the watch command
pub fn watch(path: Option<&str>, debounce_secs: u64, printer: Printer) -> Result<()> {
    let root = resolve_root(path)?;
    let config = Config::load();
    let index = open_index(&root, &config)?;
    if let Some(err) = index.degraded_error() {
        return Err(err.into());
    }

    let options = index_options(&config, false, Vec::new());
    let summary = index.index(&root, &options)?;
    print_summary(&summary, printer)?;

    Watcher::with_debounce(&root, debounce_secs).watch(&index, &options)
}
