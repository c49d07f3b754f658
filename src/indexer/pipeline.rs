// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index-then-query pipeline.
//!
//! [`SemanticIndex`] ties the source indexer, an embedding backend and the
//! vector store together. Indexing runs in three stages: entity extraction
//! on the global rayon pool, embedding in fixed-size batches on a bounded
//! worker pool, and one store write per file. Per-file problems are collected
//! in the [`IndexSummary`] and never abort the run.

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::embedding::provider::EmbeddingBackend;
use crate::embedding::storage::{ModelCount, VectorStore};
use crate::entity::{CodeEntity, EmbeddingRecord, Metadata, MetadataValue, META_FILE_PATH};
use crate::errors::{Result, SearchError};
use crate::indexer::scanner::{FileScanner, ScannedFile};
use crate::parser::entities::SourceIndexer;

const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_WORKERS: usize = 2;
/// Batches buffered per worker before results are written to the store
const BATCHES_PER_WINDOW: usize = 4;

/// Shared cancellation signal for long index runs.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tuning for the embedding stage
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Texts per embedding call; `None` uses the backend's preference
    pub batch_size: Option<usize>,
    /// Threads in the embedding worker pool
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl From<&EmbeddingConfig> for PipelineConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: Some(config.batch_size()),
            workers: config.workers(),
        }
    }
}

/// Per-run indexing options
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Re-embed files whose content hash is unchanged
    pub force: bool,
    pub exclude_paths: Vec<String>,
    pub max_file_size: Option<u64>,
    pub cancel: CancelFlag,
    pub progress: Option<ProgressBar>,
}

/// Operational state, fixed when the index is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Ready,
    /// The backend is unavailable: entities are still extracted, nothing is embedded
    Degraded { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Read,
    Parse,
    Embed,
    Store,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Read => "read",
            FailureKind::Parse => "parse",
            FailureKind::Embed => "embed",
            FailureKind::Store => "store",
        }
    }
}

/// A problem with one file during an index run
#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

impl IndexFailure {
    fn new(path: impl Into<String>, kind: FailureKind, message: impl ToString) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.to_string(),
        }
    }
}

/// What an index run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub files_scanned: usize,
    pub files_indexed: usize,
    /// Unchanged since the last run
    pub files_skipped: usize,
    /// Vanished from the tree; their records were deleted
    pub files_removed: usize,
    pub entities: usize,
    pub embedded: usize,
    pub failures: Vec<IndexFailure>,
    pub cancelled: bool,
    pub degraded: bool,
}

impl IndexSummary {
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &IndexFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

/// One ranked search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub node_id: String,
    pub score: f32,
    pub metadata: Metadata,
}

impl SearchHit {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub model: String,
    pub hits: Vec<SearchHit>,
    /// Advisories such as records skipped for coming from another model
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub location: String,
    pub records: usize,
    pub files: usize,
    pub models: Vec<ModelCount>,
    pub backend_model: String,
    pub backend_dimension: usize,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
}

/// Source handed to the pipeline
enum SourceInput<'a> {
    Disk(ScannedFile),
    Memory { path: &'a str, content: &'a [u8] },
}

impl SourceInput<'_> {
    fn path(&self) -> &str {
        match self {
            SourceInput::Disk(file) => &file.path,
            SourceInput::Memory { path, .. } => path,
        }
    }

    fn content(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            SourceInput::Disk(file) => file.read().map(Cow::Owned),
            SourceInput::Memory { content, .. } => Ok(Cow::Borrowed(content)),
        }
    }
}

struct ParsedFile {
    path: String,
    hash: String,
    entities: Vec<CodeEntity>,
}

enum Extracted {
    Skipped,
    Parsed(ParsedFile, Option<SearchError>),
    Failed(IndexFailure),
    Cancelled,
}

/// Semantic code index over one vector store.
pub struct SemanticIndex {
    backend: Arc<dyn EmbeddingBackend>,
    store: Arc<VectorStore>,
    indexer: SourceIndexer,
    config: PipelineConfig,
    state: IndexState,
    pool: Option<rayon::ThreadPool>,
}

impl SemanticIndex {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        store: Arc<VectorStore>,
        config: PipelineConfig,
    ) -> Self {
        let state = if backend.is_available() {
            IndexState::Ready
        } else {
            let reason = backend
                .unavailable_reason()
                .unwrap_or("embedding backend is unavailable")
                .to_string();
            tracing::warn!(model = backend.model_name(), "semantic search degraded: {}", reason);
            IndexState::Degraded { reason }
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("codeseek-embed-{}", i))
            .build()
            .map_err(|e| tracing::warn!("falling back to the global pool: {}", e))
            .ok();

        Self {
            backend,
            store,
            indexer: SourceIndexer::new(),
            config,
            state,
            pool,
        }
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == IndexState::Ready
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    fn batch_size(&self) -> usize {
        self.config
            .batch_size
            .unwrap_or_else(|| self.backend.batch_size())
            .max(1)
    }

    /// The error searches fail with while degraded.
    pub fn degraded_error(&self) -> Option<SearchError> {
        match &self.state {
            IndexState::Degraded { reason } => {
                Some(SearchError::unavailable(self.backend.model_name(), reason.as_str()))
            }
            IndexState::Ready => None,
        }
    }

    /// Index every supported file under `root`.
    ///
    /// Records of files that disappeared from the tree are removed, but only
    /// after a walk that visited every entry and was not cancelled.
    pub fn index(&self, root: &Path, options: &IndexOptions) -> Result<IndexSummary> {
        if !root.is_dir() {
            return Err(SearchError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let scanner = FileScanner::new(root)
            .with_excludes(&options.exclude_paths)
            .with_max_file_size(options.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE));
        let report = scanner.scan();
        let walk_complete = report.is_complete();

        let seen: HashSet<String> = report.files.iter().map(|f| f.path.clone()).collect();
        let inputs: Vec<SourceInput> = report.files.into_iter().map(SourceInput::Disk).collect();
        let mut summary = self.run(&inputs, options);

        for error in report.errors {
            summary
                .failures
                .push(IndexFailure::new(root.display().to_string(), FailureKind::Read, error));
        }

        if walk_complete && !summary.cancelled && self.is_ready() {
            for path in self.store.indexed_files() {
                if seen.contains(&path) {
                    continue;
                }
                match self.store.remove_file(&path) {
                    Ok(removed) => {
                        tracing::debug!(path = %path, records = removed, "removed vanished file");
                        summary.files_removed += 1;
                    }
                    Err(err) => summary
                        .failures
                        .push(IndexFailure::new(path, FailureKind::Store, err)),
                }
            }
        }

        tracing::info!(
            scanned = summary.files_scanned,
            indexed = summary.files_indexed,
            skipped = summary.files_skipped,
            removed = summary.files_removed,
            failures = summary.failures.len(),
            "index run finished"
        );
        Ok(summary)
    }

    /// Index caller-supplied `(path, content)` pairs.
    pub fn index_sources<P, C>(&self, sources: &[(P, C)], options: &IndexOptions) -> IndexSummary
    where
        P: AsRef<str> + Sync,
        C: AsRef<[u8]> + Sync,
    {
        let inputs: Vec<SourceInput> = sources
            .iter()
            .map(|(path, content)| SourceInput::Memory {
                path: path.as_ref(),
                content: content.as_ref(),
            })
            .collect();
        self.run(&inputs, options)
    }

    fn run(&self, inputs: &[SourceInput], options: &IndexOptions) -> IndexSummary {
        let mut summary = IndexSummary {
            files_scanned: inputs.len(),
            degraded: !self.is_ready(),
            ..IndexSummary::default()
        };
        let progress = options.progress.clone().unwrap_or_else(ProgressBar::hidden);
        progress.set_length(inputs.len() as u64);

        let extracted: Vec<Extracted> = inputs
            .par_iter()
            .map(|input| self.extract(input, options.force, &options.cancel))
            .collect();

        let mut parsed = Vec::new();
        for item in extracted {
            match item {
                Extracted::Skipped => {
                    summary.files_skipped += 1;
                    progress.inc(1);
                }
                Extracted::Failed(failure) => {
                    if failure.kind == FailureKind::Parse && self.is_ready() {
                        self.drop_stale(&failure.path, &mut summary);
                    }
                    summary.failures.push(failure);
                    progress.inc(1);
                }
                Extracted::Cancelled => summary.cancelled = true,
                Extracted::Parsed(file, diagnostic) => {
                    summary.entities += file.entities.len();
                    if let Some(diagnostic) = diagnostic {
                        summary
                            .failures
                            .push(IndexFailure::new(&file.path, FailureKind::Parse, diagnostic));
                    }
                    if self.is_ready() {
                        parsed.push(file);
                    } else {
                        progress.inc(1);
                    }
                }
            }
        }

        let window_limit = self.batch_size() * self.config.workers.max(1) * BATCHES_PER_WINDOW;
        let mut window = Vec::new();
        let mut window_entities = 0;
        for file in parsed {
            if options.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            window_entities += file.entities.len();
            window.push(file);
            if window_entities >= window_limit {
                self.embed_window(std::mem::take(&mut window), options, &mut summary, &progress);
                window_entities = 0;
            }
        }
        if !window.is_empty() && !summary.cancelled {
            self.embed_window(window, options, &mut summary, &progress);
        }

        summary.cancelled |= options.cancel.is_cancelled();
        progress.finish_and_clear();
        summary
    }

    /// Forget a file whose current content no longer yields entities.
    fn drop_stale(&self, path: &str, summary: &mut IndexSummary) {
        if self.store.file_hash(path).is_none() && self.store.node_ids_for_file(path).is_empty() {
            return;
        }
        match self.store.remove_file(path) {
            Ok(removed) => tracing::debug!(path = %path, records = removed, "dropped stale records"),
            Err(err) => summary
                .failures
                .push(IndexFailure::new(path, FailureKind::Store, err)),
        }
    }

    fn extract(&self, input: &SourceInput, force: bool, cancel: &CancelFlag) -> Extracted {
        if cancel.is_cancelled() {
            return Extracted::Cancelled;
        }

        let path = input.path();
        let content = match input.content() {
            Ok(content) => content,
            Err(err) => return Extracted::Failed(IndexFailure::new(path, FailureKind::Read, err)),
        };

        let hash = blake3::hash(&content).to_hex().to_string();
        if !force && self.store.file_hash(path).as_deref() == Some(hash.as_str()) {
            if self.store.file_matches_model(path, self.backend.model_name(), self.backend.dimension()) {
                return Extracted::Skipped;
            }
            tracing::debug!(path = %path, "re-embedding records from another model");
        }

        let outcome = self.indexer.index(path, &content);
        match outcome.diagnostic {
            Some(diagnostic @ SearchError::UnsupportedLanguage(_)) => {
                Extracted::Failed(IndexFailure::new(path, FailureKind::Parse, diagnostic))
            }
            Some(diagnostic) if outcome.entities.is_empty() => {
                Extracted::Failed(IndexFailure::new(path, FailureKind::Parse, diagnostic))
            }
            diagnostic => Extracted::Parsed(
                ParsedFile {
                    path: path.to_string(),
                    hash,
                    entities: outcome.entities,
                },
                diagnostic,
            ),
        }
    }

    fn embed_window(
        &self,
        files: Vec<ParsedFile>,
        options: &IndexOptions,
        summary: &mut IndexSummary,
        progress: &ProgressBar,
    ) {
        let mut texts = Vec::new();
        let mut ranges: Vec<Range<usize>> = Vec::with_capacity(files.len());
        for file in &files {
            let start = texts.len();
            texts.extend(file.entities.iter().map(embedding_text));
            ranges.push(start..texts.len());
        }

        let batch_size = self.batch_size();
        let embed_chunk = |chunk: &[String]| -> Option<Result<Vec<Vec<f32>>>> {
            if options.cancel.is_cancelled() {
                return None;
            }
            Some(self.backend.embed_batch(chunk))
        };
        let chunks: Vec<&[String]> = texts.chunks(batch_size).collect();
        let results: Vec<Option<Result<Vec<Vec<f32>>>>> = match &self.pool {
            Some(pool) => pool.install(|| chunks.par_iter().map(|c| embed_chunk(*c)).collect()),
            None => chunks.par_iter().map(|c| embed_chunk(*c)).collect(),
        };

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut errors: Vec<Option<String>> = vec![None; texts.len()];
        for (index, result) in results.into_iter().enumerate() {
            let span = index * batch_size..index * batch_size + chunks[index].len();
            let result = result.map(|r| {
                r.and_then(|batch| {
                    if batch.len() == span.len() {
                        Ok(batch)
                    } else {
                        Err(SearchError::EmbeddingFailed(format!(
                            "expected {} vectors, backend returned {}",
                            span.len(),
                            batch.len()
                        )))
                    }
                })
            });
            match result {
                Some(Ok(batch)) => {
                    for (slot, vector) in vectors[span].iter_mut().zip(batch) {
                        *slot = Some(vector);
                    }
                }
                Some(Err(err)) => {
                    let message = err.to_string();
                    for slot in &mut errors[span] {
                        *slot = Some(message.clone());
                    }
                }
                None => summary.cancelled = true,
            }
        }

        let model = self.backend.model_name();
        for (file, range) in files.into_iter().zip(ranges) {
            progress.set_message(file.path.clone());
            progress.inc(1);

            if let Some(message) = errors[range.clone()].iter().flatten().next() {
                summary
                    .failures
                    .push(IndexFailure::new(&file.path, FailureKind::Embed, message));
                continue;
            }
            let Some(file_vectors) = vectors[range]
                .iter_mut()
                .map(Option::take)
                .collect::<Option<Vec<Vec<f32>>>>()
            else {
                // Cancelled before this file's batches ran
                continue;
            };

            let records: Vec<EmbeddingRecord> = file
                .entities
                .iter()
                .zip(file_vectors)
                .map(|(entity, vector)| {
                    EmbeddingRecord::new(&entity.id, vector, model)
                        .with_metadata(entity_metadata(entity))
                })
                .collect();
            let keep: HashSet<String> = file.entities.iter().map(|e| e.id.clone()).collect();

            let written = self
                .store
                .add_batch(records)
                .and_then(|count| {
                    self.store.retain_file(&file.path, &keep)?;
                    self.store.set_file_hash(&file.path, &file.hash)?;
                    Ok(count)
                });
            match written {
                Ok(count) => {
                    summary.files_indexed += 1;
                    summary.embedded += count;
                }
                Err(err) => summary
                    .failures
                    .push(IndexFailure::new(&file.path, FailureKind::Store, err)),
            }
        }
    }

    /// Embed `query` and rank stored entities against it.
    ///
    /// Records produced by a different model or width are left out and
    /// reported as warnings. A degraded index fails with
    /// [`SearchError::CapabilityUnavailable`].
    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResponse> {
        if let Some(err) = self.degraded_error() {
            return Err(err);
        }

        let vector = self.backend.embed(query)?;
        let model = self.backend.model_name();
        let found = self.store.search_model(&vector, model, limit);

        let warnings = found
            .excluded
            .iter()
            .map(|m| {
                let mismatch = SearchError::ModelMismatch {
                    expected_model: model.to_string(),
                    expected_dimensions: vector.len(),
                    found_model: m.model_name.clone(),
                    found_dimensions: m.dimensions,
                };
                tracing::warn!("{} records excluded: {}", m.records, mismatch);
                format!("{} records excluded: {}", m.records, mismatch)
            })
            .collect();

        let hits = found
            .results
            .into_iter()
            .map(|scored| SearchHit {
                node_id: scored.record.node_id.clone(),
                score: scored.score,
                metadata: scored.record.metadata.clone(),
            })
            .collect();

        Ok(SearchResponse {
            query: query.to_string(),
            model: model.to_string(),
            hits,
            warnings,
        })
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            location: self.store.location().to_string(),
            records: self.store.len(),
            files: self.store.indexed_files().len(),
            models: self.store.models(),
            backend_model: self.backend.model_name().to_string(),
            backend_dimension: self.backend.dimension(),
            available: self.is_ready(),
            unavailable_reason: match &self.state {
                IndexState::Degraded { reason } => Some(reason.clone()),
                IndexState::Ready => None,
            },
        }
    }
}

/// Text embedded for an entity.
///
/// `"{kind} {qualified_name}"`, then the signature, the docstring and
/// `"in {file_path}"`, each on its own line when present.
pub fn embedding_text(entity: &CodeEntity) -> String {
    let mut text = format!("{} {}", entity.kind, entity.qualified_name());
    if let Some(signature) = &entity.signature {
        text.push('\n');
        text.push_str(signature);
    }
    if let Some(docstring) = &entity.docstring {
        text.push('\n');
        text.push_str(docstring);
    }
    text.push_str("\nin ");
    text.push_str(&entity.file_path);
    text
}

/// Display metadata stored alongside an entity's vector.
pub fn entity_metadata(entity: &CodeEntity) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(META_FILE_PATH.to_string(), entity.file_path.as_str().into());
    metadata.insert("name".to_string(), entity.name.as_str().into());
    metadata.insert("qualified_name".to_string(), entity.qualified_name().into());
    metadata.insert("kind".to_string(), entity.kind.as_str().into());
    metadata.insert("language".to_string(), entity.language.as_str().into());
    metadata.insert("start_line".to_string(), entity.start_line.into());
    metadata.insert("end_line".to_string(), entity.end_line.into());
    if let Some(parent) = &entity.parent_id {
        metadata.insert("parent_id".to_string(), parent.as_str().into());
    }
    metadata
}
