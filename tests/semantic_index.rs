// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use codeseek::embedding::{EmbeddingBackend, HashingEmbedder, StoreLocation, VectorStore};
use codeseek::indexer::{CancelFlag, FailureKind, IndexOptions, PipelineConfig, SemanticIndex};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn write_bytes(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

fn open_index(root: &Path) -> SemanticIndex {
    let location = StoreLocation::Path(root.join(".codeseek/vectors.sqlite"));
    let store = VectorStore::open(&location).unwrap();
    SemanticIndex::new(
        Arc::new(HashingEmbedder::new(128)),
        Arc::new(store),
        PipelineConfig {
            batch_size: Some(3),
            workers: 2,
        },
    )
}

fn open_store(root: &Path) -> Arc<VectorStore> {
    let location = StoreLocation::Path(root.join(".codeseek/vectors.sqlite"));
    Arc::new(VectorStore::open(&location).unwrap())
}

fn index_over(
    store: &Arc<VectorStore>,
    backend: Arc<dyn EmbeddingBackend>,
    workers: usize,
) -> SemanticIndex {
    SemanticIndex::new(
        backend,
        Arc::clone(store),
        PipelineConfig {
            batch_size: Some(2),
            workers,
        },
    )
}

/// Two-entity python files: the module and one function.
fn small_repo(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in names {
        write_file(&dir.path().join(name), "def run():\n    return 1\n");
    }
    dir
}

fn models_of(store: &VectorStore, file: &str) -> Vec<String> {
    let mut models: Vec<String> = store
        .node_ids_for_file(file)
        .iter()
        .filter_map(|id| store.get(id))
        .map(|record| record.model_name.clone())
        .collect();
    models.dedup();
    models
}

/// Trips the shared cancel flag from inside its first embedding call.
struct CancellingBackend {
    inner: HashingEmbedder,
    cancel: CancelFlag,
    calls: AtomicUsize,
}

impl EmbeddingBackend for CancellingBackend {
    fn model_name(&self) -> &str {
        "cancel-test"
    }
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
    fn is_available(&self) -> bool {
        true
    }
    fn embed_batch(&self, texts: &[String]) -> codeseek::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        self.inner.embed_batch(texts)
    }
}

fn polyglot_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(
        &dir.path().join("src/config.rs"),
        r#"use std::fs;

/// Parsed settings.
pub struct Settings {
    pub name: String,
}

impl Settings {
    /// Parse settings from a TOML file.
    pub fn parse_file(path: &str) -> Settings {
        let raw = fs::read_to_string(path).unwrap_or_default();
        Settings { name: raw }
    }
}
"#,
    );
    write_file(
        &dir.path().join("web/server.go"),
        r#"package web

import "net/http"

// Server handles http requests.
type Server struct{}

// ServeHTTP routes a request.
func (s *Server) ServeHTTP(w http.ResponseWriter, r *http.Request) {}
"#,
    );
    write_file(
        &dir.path().join("ui/chart.js"),
        r#"import { scale } from './math';

// Draws a bar chart.
export function drawChart(values) {
  return values.map(scale);
}
"#,
    );
    dir
}

#[test]
fn index_tree_and_search_across_languages() {
    let dir = polyglot_repo();
    let index = open_index(dir.path());

    let summary = index.index(dir.path(), &IndexOptions::default()).unwrap();
    assert_eq!(summary.files_scanned, 3);
    assert_eq!(summary.files_indexed, 3);
    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(summary.embedded, summary.entities);

    let response = index.search("parse settings file", 5).unwrap();
    assert_eq!(response.hits[0].node_id, "src/config.rs::Settings::parse_file");
    assert_eq!(response.hits[0].meta_str("kind"), Some("method"));

    let response = index.search("draw chart", 1).unwrap();
    assert_eq!(response.hits[0].node_id, "ui/chart.js::drawChart");
}

#[test]
fn durable_store_survives_reopen() {
    let dir = polyglot_repo();
    let records = {
        let index = open_index(dir.path());
        index.index(dir.path(), &IndexOptions::default()).unwrap();
        index.store().len()
    };

    let reopened = open_index(dir.path());
    assert_eq!(reopened.store().len(), records);
    assert_eq!(reopened.stats().files, 3);

    let summary = reopened.index(dir.path(), &IndexOptions::default()).unwrap();
    assert_eq!(summary.files_skipped, 3);
    assert_eq!(summary.files_indexed, 0);

    let response = reopened.search("http server request", 3).unwrap();
    assert!(response
        .hits
        .iter()
        .any(|hit| hit.meta_str("file_path") == Some("web/server.go")));
}

#[test]
fn edits_and_deletions_are_reflected() {
    let dir = polyglot_repo();
    let index = open_index(dir.path());
    index.index(dir.path(), &IndexOptions::default()).unwrap();
    assert!(index.store().contains("web/server.go::Server::ServeHTTP"));

    write_file(&dir.path().join("web/server.go"), "package web\n\ntype Server struct{}\n");
    fs::remove_file(dir.path().join("ui/chart.js")).unwrap();

    let summary = index.index(dir.path(), &IndexOptions::default()).unwrap();
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.files_removed, 1);
    assert!(!index.store().contains("web/server.go::Server::ServeHTTP"));
    assert!(index.store().contains("web/server.go::Server"));
    assert!(index.store().node_ids_for_file("ui/chart.js").is_empty());
}

#[test]
fn broken_files_are_reported_without_stopping_the_run() {
    let dir = polyglot_repo();
    write_bytes(&dir.path().join("bad/latin1.py"), &[0x64, 0x65, 0x66, 0x20, 0xe9, 0x28, 0x29]);
    write_file(
        &dir.path().join("bad/partial.py"),
        "def ok():\n    return 1\n\ndef broken(:\n    pass\n",
    );

    let index = open_index(dir.path());
    let summary = index.index(dir.path(), &IndexOptions::default()).unwrap();

    let parse: Vec<_> = summary.failures_of(FailureKind::Parse).map(|f| f.path.as_str()).collect();
    assert!(parse.contains(&"bad/latin1.py"));
    assert!(parse.contains(&"bad/partial.py"));
    assert!(index.store().contains("bad/partial.py::ok"));
    assert_eq!(summary.files_indexed, 4);
}

#[test]
fn excludes_and_force_reindex() {
    let dir = polyglot_repo();
    let index = open_index(dir.path());

    let options = IndexOptions {
        exclude_paths: vec!["web/**".to_string()],
        ..IndexOptions::default()
    };
    let summary = index.index(dir.path(), &options).unwrap();
    assert_eq!(summary.files_scanned, 2);
    assert!(index.store().node_ids_for_file("web/server.go").is_empty());

    let forced = IndexOptions {
        force: true,
        ..options
    };
    let before = index.store().len();
    let summary = index.index(dir.path(), &forced).unwrap();
    assert_eq!(summary.files_indexed, 2);
    assert_eq!(index.store().len(), before);
}

#[test]
fn model_switch_replaces_every_record() {
    let dir = polyglot_repo();
    let store = open_store(dir.path());
    index_over(&store, Arc::new(HashingEmbedder::new(64)), 2)
        .index(dir.path(), &IndexOptions::default())
        .unwrap();
    let records = store.len();

    let summary = index_over(&store, Arc::new(HashingEmbedder::new(128)), 2)
        .index(dir.path(), &IndexOptions::default())
        .unwrap();
    assert_eq!(summary.files_indexed, 3);
    assert_eq!(summary.files_skipped, 0);

    let models = store.models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].model_name, "hashing-v1-128");
    assert_eq!(models[0].dimensions, 128);
    assert_eq!(models[0].records, records);
    assert_eq!(store.len(), records);
}

#[test]
fn file_broken_after_model_switch_does_not_pin_reembedding() {
    let dir = small_repo(&["a.py", "b.py"]);
    let store = open_store(dir.path());
    let summary = index_over(&store, Arc::new(HashingEmbedder::new(64)), 2)
        .index(dir.path(), &IndexOptions::default())
        .unwrap();
    assert_eq!(summary.files_indexed, 2);

    write_bytes(&dir.path().join("b.py"), &[0x64, 0x65, 0x66, 0x20, 0xe9, 0x28, 0x29]);
    let index = index_over(&store, Arc::new(HashingEmbedder::new(128)), 2);

    let summary = index.index(dir.path(), &IndexOptions::default()).unwrap();
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.failures_of(FailureKind::Parse).count(), 1);
    assert!(store.node_ids_for_file("b.py").is_empty());
    assert!(store.file_hash("b.py").is_none());
    let models = store.models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].model_name, "hashing-v1-128");

    let summary = index.index(dir.path(), &IndexOptions::default()).unwrap();
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_indexed, 0);
    assert_eq!(summary.embedded, 0);

    let response = index.search("run", 10).unwrap();
    assert!(response
        .hits
        .iter()
        .all(|hit| hit.meta_str("file_path") != Some("b.py")));
}

#[test]
fn cancellation_mid_run_keeps_unfinished_files_and_vanished_records() {
    let dir = small_repo(&["a.py", "b.py", "c.py", "gone.py"]);
    let store = open_store(dir.path());
    index_over(&store, Arc::new(HashingEmbedder::new(32)), 2)
        .index(dir.path(), &IndexOptions::default())
        .unwrap();
    fs::remove_file(dir.path().join("gone.py")).unwrap();

    let options = IndexOptions::default();
    let backend = Arc::new(CancellingBackend {
        inner: HashingEmbedder::new(32),
        cancel: options.cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    // One worker runs the batches in order, so only a.py's batch completes
    let index = index_over(&store, backend.clone(), 1);
    let summary = index.index(dir.path(), &options).unwrap();

    assert!(summary.cancelled);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.embedded, 2);
    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(models_of(&store, "a.py"), vec!["cancel-test"]);
    assert_eq!(models_of(&store, "b.py"), vec!["hashing-v1-32"]);
    assert_eq!(models_of(&store, "c.py"), vec!["hashing-v1-32"]);

    assert_eq!(summary.files_removed, 0);
    assert_eq!(store.node_ids_for_file("gone.py").len(), 2);
    assert!(store.file_hash("gone.py").is_some());
}
