// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexing module - walks a source tree, extracts entities, embeds them and
//! answers queries against the resulting vector store.

pub mod pipeline;
pub mod scanner;
pub mod watch;

pub use pipeline::{
    embedding_text, entity_metadata, CancelFlag, FailureKind, IndexFailure, IndexOptions, IndexState,
    IndexStats, IndexSummary, PipelineConfig, SearchHit, SearchResponse, SemanticIndex,
};
pub use scanner::{FileScanner, ScanReport, ScannedFile};
pub use watch::Watcher;
