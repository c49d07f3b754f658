// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding backend interface and implementations.
//!
//! A backend maps text to fixed-width vectors for one named model. Backends
//! that cannot run (model failed to load, command not installed, feature not
//! compiled in) still exist as values: they report `is_available() == false`
//! and fail every embed call with [`SearchError::CapabilityUnavailable`].

use anyhow::{bail, Context};
use serde_json::Value;
use std::borrow::Cow;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use crate::errors::{Result, SearchError};

const DEFAULT_BATCH_SIZE: usize = 64;

/// Trait for embedding backends.
pub trait EmbeddingBackend: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model_name(&self) -> &str;

    /// Output width, known without embedding anything.
    fn dimension(&self) -> usize;

    fn is_available(&self) -> bool;

    /// Why the backend is unavailable, if it is.
    fn unavailable_reason(&self) -> Option<&str> {
        None
    }

    /// Preferred number of texts per `embed_batch` call.
    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }

    /// Embeds texts, returning one vector per input in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::EmbeddingFailed("no embedding returned".to_string()))
    }
}

/// Known fastembed models: (canonical name, dimension).
pub fn fastembed_model_info(alias: &str) -> Option<(&'static str, usize)> {
    match alias.trim().to_lowercase().as_str() {
        "minilm"
        | "all-minilm-l6-v2"
        | "allminilm-l6-v2"
        | "sentence-transformers/all-minilm-l6-v2" => Some(("all-minilm-l6-v2", 384)),
        "bge-small" | "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
            Some(("bge-small-en-v1.5", 384))
        }
        "bge-base" | "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => {
            Some(("bge-base-en-v1.5", 768))
        }
        "nomic" | "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            Some(("nomic-embed-text-v1.5", 768))
        }
        _ => None,
    }
}

#[cfg(feature = "fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "fastembed")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    fn to_fastembed_model(canonical: &str) -> Option<EmbeddingModel> {
        match canonical {
            "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
            _ => None,
        }
    }

    enum ModelState {
        Loaded(Mutex<TextEmbedding>),
        Failed(String),
    }

    /// FastEmbed backend running a local ONNX model on the CPU.
    ///
    /// The model is loaded once in [`FastEmbedder::new`] and released when the
    /// backend is dropped.
    pub struct FastEmbedder {
        state: ModelState,
        model_name: String,
        dimension: usize,
        batch_size: usize,
        max_chars: usize,
        normalize: bool,
    }

    impl FastEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Self {
            let (model_name, dimension) = fastembed_model_info(config.model())
                .unwrap_or((DEFAULT_MODEL_NAME, DEFAULT_MODEL_DIMENSION));
            let state = match to_fastembed_model(model_name) {
                Some(model) => {
                    match TextEmbedding::try_new(
                        InitOptions::new(model).with_show_download_progress(false),
                    ) {
                        Ok(embedder) => ModelState::Loaded(Mutex::new(embedder)),
                        Err(err) => {
                            tracing::warn!(model = model_name, "failed to load model: {}", err);
                            ModelState::Failed(format!("failed to load {}: {}", model_name, err))
                        }
                    }
                }
                None => ModelState::Failed(format!("unsupported model {}", model_name)),
            };

            Self {
                state,
                model_name: model_name.to_string(),
                dimension,
                batch_size: config.batch_size(),
                max_chars: config.max_chars(),
                normalize: config.normalize(),
            }
        }
    }

    const DEFAULT_MODEL_NAME: &str = "all-minilm-l6-v2";
    const DEFAULT_MODEL_DIMENSION: usize = 384;

    impl EmbeddingBackend for FastEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn is_available(&self) -> bool {
            matches!(self.state, ModelState::Loaded(_))
        }

        fn unavailable_reason(&self) -> Option<&str> {
            match &self.state {
                ModelState::Loaded(_) => None,
                ModelState::Failed(reason) => Some(reason),
            }
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let embedder = match &self.state {
                ModelState::Loaded(embedder) => embedder,
                ModelState::Failed(reason) => {
                    return Err(SearchError::unavailable("fastembed", reason.clone()))
                }
            };
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let prepared = truncate_texts(texts, self.max_chars);
            let mut embeddings = embedder
                .lock()
                .map_err(|_| SearchError::LockPoisoned("fastembed model"))?
                .embed(&prepared, Some(self.batch_size))
                .map_err(|e| SearchError::EmbeddingFailed(e.to_string()))?;

            if self.normalize {
                for embedding in embeddings.iter_mut() {
                    l2_normalize(embedding);
                }
            }

            check_batch(texts.len(), self.dimension, embeddings)
        }
    }
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and prints
/// either a JSON array of vectors or an object holding one under
/// `embeddings`, `vectors` or `data`.
pub struct CommandProvider {
    command: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    missing: Option<String>,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let command = command.into();
        let missing = match command.split_whitespace().next() {
            None => Some("empty command".to_string()),
            Some(program) => which::which(program)
                .err()
                .map(|_| format!("command not found: {}", program)),
        };

        Self {
            command,
            model: model.into(),
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
            missing,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn run_command(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            // The command may exit without reading its input
            if let Err(err) = stdin.write_all(payload_str.as_bytes()) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err).context("Failed to write embeddings payload to stdin");
                }
            }
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Value = serde_json::from_str(stdout.trim())
            .context("Failed to parse embeddings command output as JSON")?;

        let embeddings_value = match parsed {
            Value::Array(arr) => Value::Array(arr),
            Value::Object(ref obj) => {
                if let Some(value) = obj.get("embeddings") {
                    value.clone()
                } else if let Some(value) = obj.get("vectors") {
                    value.clone()
                } else if let Some(value) = obj.get("data") {
                    value.clone()
                } else {
                    bail!("Embeddings command output missing 'embeddings' field");
                }
            }
            _ => bail!("Embeddings command output must be JSON array or object"),
        };

        embeddings_value
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Embeddings output must be a JSON array"))?
            .iter()
            .map(|row| {
                row.as_array()
                    .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                    .iter()
                    .map(|value| {
                        value
                            .as_f64()
                            .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                            .map(|v| v as f32)
                    })
                    .collect::<anyhow::Result<Vec<f32>>>()
            })
            .collect()
    }
}

impl EmbeddingBackend for CommandProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        self.missing.is_none()
    }

    fn unavailable_reason(&self) -> Option<&str> {
        self.missing.as_deref()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(reason) = &self.missing {
            return Err(SearchError::unavailable("command", reason.clone()));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .run_command(texts)
            .map_err(|e| SearchError::EmbeddingFailed(format!("{:#}", e)))?;
        check_batch(texts.len(), self.dimension, vectors)
    }
}

/// Deterministic feature-hashing embedder.
///
/// Identifiers are split on punctuation, `snake_case` and `camelCase`
/// boundaries; each lowercase token is hashed with blake3 into a signed
/// bucket and the result is L2-normalized. Texts sharing vocabulary land
/// close together, which is enough for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_name: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            model_name: format!("hashing-v1-{}", dimension),
            dimension,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let value = u64::from_le_bytes(word);

            let bucket = (value % self.dimension as u64) as usize;
            let sign = if value >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        true
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Placeholder for a backend that cannot be constructed.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    backend: String,
    model_name: String,
    dimension: usize,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(
        backend: impl Into<String>,
        model_name: impl Into<String>,
        dimension: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            model_name: model_name.into(),
            dimension,
            reason: reason.into(),
        }
    }
}

impl EmbeddingBackend for UnavailableBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        false
    }

    fn unavailable_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(SearchError::unavailable(&self.backend, &self.reason))
    }
}

/// Builds the backend selected by the configuration.
pub fn create_backend(config: &EmbeddingConfig) -> Arc<dyn EmbeddingBackend> {
    match config.provider() {
        EmbeddingProviderType::Hashing => Arc::new(HashingEmbedder::new(config.dimension())),
        EmbeddingProviderType::Command => match config.command() {
            Some(command) => Arc::new(
                CommandProvider::new(command, config.model(), config.dimension())
                    .with_batch_size(config.batch_size()),
            ),
            None => Arc::new(UnavailableBackend::new(
                "command",
                config.model(),
                config.dimension(),
                "embeddings.command is not configured",
            )),
        },
        EmbeddingProviderType::Fastembed => {
            let Some((model_name, dimension)) = fastembed_model_info(config.model()) else {
                return Arc::new(UnavailableBackend::new(
                    "fastembed",
                    config.model(),
                    config.dimension(),
                    format!("unsupported model '{}'", config.model()),
                ));
            };
            fastembed_backend(config, model_name, dimension)
        }
    }
}

#[cfg(feature = "fastembed")]
fn fastembed_backend(
    config: &EmbeddingConfig,
    _model_name: &str,
    _dimension: usize,
) -> Arc<dyn EmbeddingBackend> {
    Arc::new(FastEmbedder::new(config))
}

#[cfg(not(feature = "fastembed"))]
fn fastembed_backend(
    _config: &EmbeddingConfig,
    model_name: &str,
    dimension: usize,
) -> Arc<dyn EmbeddingBackend> {
    Arc::new(UnavailableBackend::new(
        "fastembed",
        model_name,
        dimension,
        "codeseek was built without the `fastembed` feature",
    ))
}

/// Verifies a backend returned one vector of the right width per text.
fn check_batch(expected: usize, dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(SearchError::EmbeddingFailed(format!(
            "expected {} vectors, backend returned {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(SearchError::EmbeddingFailed(format!(
            "expected {}-dimensional vectors, backend returned {}",
            dimension,
            bad.len()
        )));
    }
    Ok(vectors)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in word.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

#[cfg(feature = "fastembed")]
fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

/// Cuts `input` to at most `max_chars` characters.
pub fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

/// Scales `vector` to unit length; zero vectors are left as they are.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
