// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for indexing, embedding and vector storage.
//!
//! Every failure the library can report is a distinct variant so callers can
//! tell "search is disabled" apart from "nothing matched" and a rejected
//! write apart from a broken database.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the codeseek library.
#[derive(Debug, Error)]
pub enum SearchError {
    /// A source file could not be (fully) parsed. Non-fatal during bulk indexing.
    #[error("failed to parse {path}{}: {message}", line.map(|l| format!(" at line {}", l + 1)).unwrap_or_default())]
    ParseFailure {
        path: String,
        /// Zero-indexed line of the first syntax error, when known
        line: Option<usize>,
        message: String,
    },

    /// The embedding backend cannot be used (model missing, failed to load, ...).
    #[error("semantic search is unavailable: {backend} backend: {reason}")]
    CapabilityUnavailable { backend: String, reason: String },

    /// A record's declared dimension disagrees with its vector length.
    #[error("dimension mismatch for '{node_id}': declared {declared}, vector has {actual}")]
    DimensionMismatch {
        node_id: String,
        declared: usize,
        actual: usize,
    },

    /// A vector component is NaN or infinite.
    #[error("non-finite value in vector for '{node_id}' at index {index}")]
    NonFiniteVector { node_id: String, index: usize },

    /// Stored vectors come from a different model or width than the query.
    #[error("model mismatch: query uses {expected_model} ({expected_dimensions}d), store holds {found_model} ({found_dimensions}d)")]
    ModelMismatch {
        expected_model: String,
        expected_dimensions: usize,
        found_model: String,
        found_dimensions: usize,
    },

    /// The backend was available but a call to it failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("no tree-sitter grammar for language '{0}'")]
    UnsupportedLanguage(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl SearchError {
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        SearchError::CapabilityUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SearchError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error means semantic search cannot run at all.
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, SearchError::CapabilityUnavailable { .. })
    }

    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, SearchError::DimensionMismatch { .. })
    }

    pub fn is_non_finite_vector(&self) -> bool {
        matches!(self, SearchError::NonFiniteVector { .. })
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self, SearchError::ParseFailure { .. })
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failure_message_uses_one_based_line() {
        let err = SearchError::ParseFailure {
            path: "src/a.py".into(),
            line: Some(4),
            message: "syntax error".into(),
        };
        assert_eq!(err.to_string(), "failed to parse src/a.py at line 5: syntax error");
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_unavailable_is_distinguishable() {
        let err = SearchError::unavailable("fastembed", "model not found");
        assert!(err.is_capability_unavailable());
        assert!(!err.is_dimension_mismatch());
        assert!(err.to_string().contains("unavailable"));
    }
}
