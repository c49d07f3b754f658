// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for codeseek
//!
//! Loads configuration from .codeseekrc.toml in current directory or ~/.config/codeseek/config.toml

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::embedding::storage::StoreLocation;

/// Default vector store location, relative to the indexed root.
pub const DEFAULT_STORE_PATH: &str = ".codeseek/vectors.sqlite";

const DEFAULT_FASTEMBED_MODEL: &str = "minilm";
const DEFAULT_DIMENSION: usize = 384;
const DEFAULT_BATCH_SIZE: usize = 64;
/// Upper bound for `batch_size`; larger values are clamped.
pub const MAX_BATCH_SIZE: usize = 1024;
const DEFAULT_MAX_CHARS: usize = 2000;
const DEFAULT_WORKERS: usize = 2;

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// Local ONNX model via fastembed
    #[default]
    Fastembed,
    /// External command speaking JSON over stdin/stdout
    Command,
    /// Deterministic feature hashing, no model required
    Hashing,
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (fastembed, command, hashing)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Output width for providers that cannot report one themselves
    pub dimension: Option<usize>,
    /// Texts per embedding call
    pub batch_size: Option<usize>,
    /// Texts are truncated to this many characters before embedding
    pub max_chars: Option<usize>,
    /// L2-normalize vectors
    pub normalize: Option<bool>,
    /// Size of the embedding worker pool
    pub workers: Option<usize>,
}

impl EmbeddingConfig {
    /// Config for the offline hashing provider.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: Some(EmbeddingProviderType::Hashing),
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Get provider type (defaults to Fastembed)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "minilm")
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_FASTEMBED_MODEL)
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// Get dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension.filter(|d| *d > 0).unwrap_or(DEFAULT_DIMENSION)
    }

    /// Get batch size (defaults to 64, clamped to 1..=1024)
    pub fn batch_size(&self) -> usize {
        match self.batch_size {
            None | Some(0) => DEFAULT_BATCH_SIZE,
            Some(size) => size.min(MAX_BATCH_SIZE),
        }
    }

    /// Get max chars (defaults to 2000)
    pub fn max_chars(&self) -> usize {
        self.max_chars.filter(|c| *c > 0).unwrap_or(DEFAULT_MAX_CHARS)
    }

    /// Get normalize (defaults to true)
    pub fn normalize(&self) -> bool {
        self.normalize.unwrap_or(true)
    }

    /// Get worker count (defaults to 2, at least 1)
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    /// Apply `FASTEMBED_*` environment overrides.
    ///
    /// Only the binary calls this; library constructors never read the environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(model) = read_env("FASTEMBED_MODEL")? {
            self.model = Some(model);
        }
        if let Some(raw) = read_env("FASTEMBED_BATCH_SIZE")? {
            let size = parse_usize_value("FASTEMBED_BATCH_SIZE", &raw)?;
            if size > MAX_BATCH_SIZE {
                tracing::warn!(
                    "FASTEMBED_BATCH_SIZE={} exceeds max {}; clamping",
                    size,
                    MAX_BATCH_SIZE
                );
            }
            self.batch_size = Some(size);
        }
        if let Some(raw) = read_env("FASTEMBED_MAX_CHARS")? {
            self.max_chars = Some(parse_usize_value("FASTEMBED_MAX_CHARS", &raw)?);
        }
        if let Some(raw) = read_env("FASTEMBED_NORMALIZE")? {
            self.normalize = Some(parse_bool_value("FASTEMBED_NORMALIZE", &raw)?);
        }
        Ok(self)
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// ":memory:" or a path to the SQLite file
    pub path: Option<String>,
}

impl StoreConfig {
    /// Resolve the store location; relative paths are taken from `root`.
    pub fn location(&self, root: &Path) -> StoreLocation {
        let raw = self.path.as_deref().unwrap_or(DEFAULT_STORE_PATH);
        match StoreLocation::parse(raw) {
            StoreLocation::Path(path) if path.is_relative() => StoreLocation::Path(root.join(path)),
            other => other,
        }
    }
}

/// Indexing configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Paths/patterns to exclude from indexing
    pub exclude_paths: Vec<String>,
    /// Maximum file size in bytes to index (default: 1MB)
    pub max_file_size: Option<u64>,
}

impl IndexConfig {
    /// Get exclude paths
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Get max file size (default: 1MB)
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(1024 * 1024)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of hits returned when the CLI gets no limit
    pub default_limit: Option<usize>,
}

impl SearchConfig {
    /// Get default limit (defaults to 10)
    pub fn default_limit(&self) -> usize {
        self.default_limit.unwrap_or(10)
    }
}

/// Configuration loaded from .codeseekrc.toml or ~/.config/codeseek/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,

    /// Vector store configuration
    pub store: StoreConfig,

    /// Index configuration
    pub index: IndexConfig,

    /// Search configuration
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .codeseekrc.toml in current directory
    /// 2. ~/.config/codeseek/config.toml
    pub fn load() -> Self {
        Self::candidate_paths()
            .iter()
            .find_map(|path| Self::load_from_path(path))
            .unwrap_or_default()
    }

    /// Parse a config file; missing files are silent, broken ones are warned about.
    pub fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge CLI limit with config (CLI wins)
    pub fn merge_limit(&self, cli_value: Option<usize>) -> usize {
        cli_value.unwrap_or_else(|| self.search.default_limit())
    }

    /// Store location for an index rooted at `root`
    pub fn store_location(&self, root: &Path) -> StoreLocation {
        self.store.location(root)
    }

    /// Config file candidates in precedence order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".codeseekrc.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("codeseek").join("config.toml"));
        }
        paths
    }
}

fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            Ok((!value.is_empty()).then(|| value.to_string()))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_usize_value(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .with_context(|| format!("Invalid {} value: {}", name, raw.trim()))
}

fn parse_bool_value(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("Invalid {} value: {}", name, other),
    }
}
