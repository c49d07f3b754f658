// SPDX-License-Identifier: MIT OR Apache-2.0

//! Value types shared by the indexer, the embedding pipeline and the store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{Result, SearchError};

/// Separator between id segments.
pub const ID_SEPARATOR: &str = "::";

/// Prefix of the name segment used in import entity ids.
pub const IMPORT_ID_PREFIX: &str = "import:";

/// Structural entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Module,
    Class,
    Function,
    Method,
    Import,
}

impl EntityKind {
    /// Functions and methods both count as function-kind entities.
    pub fn is_callable(self) -> bool {
        matches!(self, EntityKind::Function | EntityKind::Method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Import => "import",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "module" => Ok(EntityKind::Module),
            "class" => Ok(EntityKind::Class),
            "function" => Ok(EntityKind::Function),
            "method" => Ok(EntityKind::Method),
            "import" => Ok(EntityKind::Import),
            other => Err(format!("Unknown entity kind: {}", other)),
        }
    }
}

/// One structural unit of source code, produced by a single indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntity {
    /// `{file_path}::{scope...}::{name}`; stable while the entity is not renamed or moved
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    /// Path relative to the indexing root
    pub file_path: String,
    pub language: String,
    /// Enclosing scope names, outermost first
    pub scope: Vec<String>,
    /// Zero-indexed, inclusive
    pub start_line: usize,
    /// Zero-indexed, inclusive
    pub end_line: usize,
    /// Id of the enclosing class/function, if any
    pub parent_id: Option<String>,
    /// Ids of entities this one references
    pub dependencies: BTreeSet<String>,
    pub docstring: Option<String>,
    /// First line of the declaration, trimmed
    pub signature: Option<String>,
}

impl CodeEntity {
    /// Scope chain and name joined with `::`.
    pub fn qualified_name(&self) -> String {
        if self.scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}{}", self.scope.join(ID_SEPARATOR), ID_SEPARATOR, self.name)
        }
    }

    /// Number of source lines covered.
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Builds the deterministic id for an entity. Line numbers never take part.
pub fn entity_id(file_path: &str, scope: &[String], kind: EntityKind, name: &str) -> String {
    if kind == EntityKind::Module {
        return file_path.to_string();
    }

    let mut id = String::with_capacity(file_path.len() + name.len() + 16);
    id.push_str(file_path);
    for segment in scope {
        id.push_str(ID_SEPARATOR);
        id.push_str(segment);
    }
    id.push_str(ID_SEPARATOR);
    if kind == EntityKind::Import {
        id.push_str(IMPORT_ID_PREFIX);
    }
    id.push_str(name);
    id
}

/// Scalar metadata value carried alongside a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Key-value payload stored with each embedding.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key holding the entity's file path.
pub const META_FILE_PATH: &str = "file_path";

/// A stored vector for one code entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Logical reference to a [`CodeEntity::id`]; not enforced
    pub node_id: String,
    pub vector: Vec<f32>,
    /// Must equal `vector.len()`
    pub dimensions: usize,
    /// Backend/model that produced the vector
    pub model_name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EmbeddingRecord {
    /// Creates a record whose `dimensions` matches the vector.
    pub fn new(node_id: impl Into<String>, vector: Vec<f32>, model_name: impl Into<String>) -> Self {
        let dimensions = vector.len();
        Self {
            node_id: node_id.into(),
            vector,
            dimensions,
            model_name: model_name.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Checks `dimensions == vector.len()` and that every component is finite.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions != self.vector.len() {
            return Err(SearchError::DimensionMismatch {
                node_id: self.node_id.clone(),
                declared: self.dimensions,
                actual: self.vector.len(),
            });
        }
        if let Some(index) = self.vector.iter().position(|v| !v.is_finite()) {
            return Err(SearchError::NonFiniteVector {
                node_id: self.node_id.clone(),
                index,
            });
        }
        Ok(())
    }

    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get(META_FILE_PATH).and_then(MetadataValue::as_str)
    }
}
