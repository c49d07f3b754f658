// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - backends that turn text into vectors, and the store
//! that keeps those vectors and ranks them by cosine similarity.

pub mod provider;
pub mod storage;

#[cfg(feature = "fastembed")]
pub use provider::FastEmbedder;
pub use provider::{
    create_backend, CommandProvider, EmbeddingBackend, HashingEmbedder, UnavailableBackend,
};
pub use storage::{cosine_similarity, ModelCount, ModelSearch, ScoredRecord, StoreLocation, VectorStore};
