// SPDX-License-Identifier: MIT OR Apache-2.0

//! codeseek - Local semantic code search library
//!
//! Source files are parsed into [`CodeEntity`] values, each entity is turned
//! into a vector by an [`EmbeddingBackend`], and the vectors live in a
//! [`VectorStore`] that ranks them against a query by cosine similarity.
//! [`SemanticIndex`] runs the whole index-then-query flow.

pub mod config;
pub mod embedding;
pub mod entity;
pub mod errors;
pub mod filters;
pub mod indexer;
pub mod output;
pub mod parser;
pub mod utils;

pub use embedding::{create_backend, EmbeddingBackend, HashingEmbedder, StoreLocation, VectorStore};
pub use entity::{CodeEntity, EmbeddingRecord, EntityKind, Metadata, MetadataValue};
pub use errors::{Result, SearchError};
pub use indexer::{IndexOptions, IndexSummary, PipelineConfig, SearchResponse, SemanticIndex};
pub use parser::{ParseOutcome, SourceIndexer};
