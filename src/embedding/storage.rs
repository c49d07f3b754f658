// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector store for entity embeddings.
//!
//! Records live in an in-memory map keyed by node id. In durable mode every
//! write also goes to a SQLite database, and all rows are loaded back when
//! the store is opened. Searches snapshot the map under a short read lock and
//! score the snapshot in parallel, so writers are never blocked for the
//! length of a scan and readers only ever see whole records.

use rayon::prelude::*;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entity::{EmbeddingRecord, Metadata};
use crate::errors::{Result, SearchError};

/// Where the store keeps its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process lifetime only
    InMemory,
    /// SQLite database file
    Path(PathBuf),
}

impl StoreLocation {
    /// Configuration value selecting the in-memory store.
    pub const MEMORY_SENTINEL: &'static str = ":memory:";

    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == Self::MEMORY_SENTINEL {
            StoreLocation::InMemory
        } else {
            StoreLocation::Path(PathBuf::from(raw))
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, StoreLocation::InMemory)
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::InMemory => f.write_str(Self::MEMORY_SENTINEL),
            StoreLocation::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A search result from similarity search.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<EmbeddingRecord>,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Number of stored records per model and width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCount {
    pub model_name: String,
    pub dimensions: usize,
    pub records: usize,
}

/// Results of a model-scoped search.
#[derive(Debug, Clone, Default)]
pub struct ModelSearch {
    pub results: Vec<ScoredRecord>,
    /// Records skipped because their model or width differs from the query
    pub excluded: Vec<ModelCount>,
}

impl ModelSearch {
    pub fn excluded_records(&self) -> usize {
        self.excluded.iter().map(|m| m.records).sum()
    }
}

/// Keyed embedding storage with brute-force cosine search.
pub struct VectorStore {
    location: StoreLocation,
    records: RwLock<HashMap<String, Arc<EmbeddingRecord>>>,
    file_hashes: RwLock<HashMap<String, String>>,
    conn: Option<Mutex<Connection>>,
}

impl VectorStore {
    /// Opens the store at `location`, loading persisted records.
    pub fn open(location: &StoreLocation) -> Result<Self> {
        match location {
            StoreLocation::InMemory => Ok(Self::in_memory()),
            StoreLocation::Path(path) => Self::open_path(path),
        }
    }

    /// Creates an empty ephemeral store.
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            records: RwLock::new(HashMap::new()),
            file_hashes: RwLock::new(HashMap::new()),
            conn: None,
        }
    }

    fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SearchError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        let records = load_records(&conn)?;
        let file_hashes = load_file_hashes(&conn)?;
        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            files = file_hashes.len(),
            "opened vector store"
        );

        Ok(Self {
            location: StoreLocation::Path(path.to_path_buf()),
            records: RwLock::new(records),
            file_hashes: RwLock::new(file_hashes),
            conn: Some(Mutex::new(conn)),
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Upserts one record by `node_id`.
    ///
    /// Fails with [`SearchError::DimensionMismatch`] when the record's declared
    /// dimension differs from its vector length; the store is left unchanged.
    pub fn add(&self, record: EmbeddingRecord) -> Result<()> {
        record.validate()?;
        let record = Arc::new(record);

        let conn = self.lock_conn();
        if let Some(conn) = &conn {
            upsert_row(conn, &record)?;
        }
        self.write_records()
            .insert(record.node_id.clone(), record);
        Ok(())
    }

    /// Upserts many records; if any record is invalid nothing is written.
    pub fn add_batch(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        for record in &records {
            record.validate()?;
        }
        if records.is_empty() {
            return Ok(0);
        }
        let records: Vec<Arc<EmbeddingRecord>> = records.into_iter().map(Arc::new).collect();

        let mut conn = self.lock_conn();
        if let Some(conn) = conn.as_mut() {
            let tx = conn.transaction()?;
            for record in &records {
                upsert_row(&tx, record)?;
            }
            tx.commit()?;
        }

        let count = records.len();
        let mut map = self.write_records();
        for record in records {
            map.insert(record.node_id.clone(), record);
        }
        Ok(count)
    }

    /// Point lookup; absence is not an error.
    pub fn get(&self, node_id: &str) -> Option<Arc<EmbeddingRecord>> {
        self.read_records().get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.read_records().contains_key(node_id)
    }

    /// Removes one record, returning whether it existed.
    pub fn remove(&self, node_id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        if let Some(conn) = &conn {
            conn.execute("DELETE FROM embeddings WHERE node_id = ?1", params![node_id])?;
        }
        Ok(self.write_records().remove(node_id).is_some())
    }

    /// Removes every record belonging to `file_path` and forgets its hash.
    pub fn remove_file(&self, file_path: &str) -> Result<usize> {
        let conn = self.lock_conn();
        if let Some(conn) = &conn {
            conn.execute(
                "DELETE FROM embeddings WHERE file_path = ?1",
                params![file_path],
            )?;
            conn.execute("DELETE FROM files WHERE path = ?1", params![file_path])?;
        }

        self.write_hashes().remove(file_path);
        let mut map = self.write_records();
        let before = map.len();
        map.retain(|_, record| record.file_path() != Some(file_path));
        Ok(before - map.len())
    }

    /// Removes records of `file_path` whose ids are not in `keep`.
    pub fn retain_file(&self, file_path: &str, keep: &HashSet<String>) -> Result<usize> {
        let stale: Vec<String> = self
            .read_records()
            .values()
            .filter(|r| r.file_path() == Some(file_path) && !keep.contains(&r.node_id))
            .map(|r| r.node_id.clone())
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock_conn();
        if let Some(conn) = conn.as_mut() {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM embeddings WHERE node_id = ?1")?;
                for node_id in &stale {
                    stmt.execute(params![node_id])?;
                }
            }
            tx.commit()?;
        }

        let mut map = self.write_records();
        for node_id in &stale {
            map.remove(node_id);
        }
        Ok(stale.len())
    }

    /// Deletes all records and file hashes.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock_conn();
        if let Some(conn) = &conn {
            conn.execute_batch(
                r#"
            DELETE FROM embeddings;
            DELETE FROM files;
            "#,
            )?;
        }
        self.write_records().clear();
        self.write_hashes().clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_records().is_empty()
    }

    /// Ranks every record whose width matches the query by cosine similarity.
    ///
    /// Scores descend; equal scores are ordered by `node_id`. Returns at most
    /// `limit` results, and nothing for `limit == 0` or an empty store.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<ScoredRecord> {
        self.rank(query, limit, |record| record.dimensions == query.len())
    }

    /// Like [`VectorStore::search`] but only over records from `model_name`.
    pub fn search_model(&self, query: &[f32], model_name: &str, limit: usize) -> ModelSearch {
        let matches =
            |record: &EmbeddingRecord| record.model_name == model_name && record.dimensions == query.len();

        let excluded = self
            .models()
            .into_iter()
            .filter(|m| m.model_name != model_name || m.dimensions != query.len())
            .collect();

        ModelSearch {
            results: self.rank(query, limit, matches),
            excluded,
        }
    }

    fn rank<F>(&self, query: &[f32], limit: usize, accept: F) -> Vec<ScoredRecord>
    where
        F: Fn(&EmbeddingRecord) -> bool + Sync,
    {
        if limit == 0 || query.is_empty() {
            return Vec::new();
        }

        let snapshot: Vec<Arc<EmbeddingRecord>> = self.read_records().values().cloned().collect();

        let mut results: Vec<ScoredRecord> = snapshot
            .into_par_iter()
            .filter(|record| accept(record))
            .map(|record| {
                let score = cosine_similarity(query, &record.vector);
                ScoredRecord { record, score }
            })
            .filter(|scored| scored.score.is_finite())
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.node_id.cmp(&b.record.node_id))
        });
        results.truncate(limit);
        results
    }

    /// Record counts grouped by model name and width.
    pub fn models(&self) -> Vec<ModelCount> {
        let mut counts: BTreeMap<(String, usize), usize> = BTreeMap::new();
        for record in self.read_records().values() {
            *counts
                .entry((record.model_name.clone(), record.dimensions))
                .or_default() += 1;
        }
        counts
            .into_iter()
            .map(|((model_name, dimensions), records)| ModelCount {
                model_name,
                dimensions,
                records,
            })
            .collect()
    }

    /// Ids of the records stored for `file_path`.
    pub fn node_ids_for_file(&self, file_path: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read_records()
            .values()
            .filter(|r| r.file_path() == Some(file_path))
            .map(|r| r.node_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// True when `file_path` has records and all of them come from `model_name` at `dimensions`.
    pub fn file_matches_model(&self, file_path: &str, model_name: &str, dimensions: usize) -> bool {
        let records = self.read_records();
        let mut found = false;
        for record in records.values().filter(|r| r.file_path() == Some(file_path)) {
            if record.model_name != model_name || record.dimensions != dimensions {
                return false;
            }
            found = true;
        }
        found
    }

    /// Content hash recorded for `file_path` by the last successful index.
    pub fn file_hash(&self, file_path: &str) -> Option<String> {
        self.read_hashes().get(file_path).cloned()
    }

    pub fn set_file_hash(&self, file_path: &str, hash: &str) -> Result<()> {
        let conn = self.lock_conn();
        if let Some(conn) = &conn {
            conn.execute(
                r#"
                INSERT INTO files (path, file_hash, indexed_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(path) DO UPDATE SET
                    file_hash = excluded.file_hash,
                    indexed_at = excluded.indexed_at
                "#,
                params![file_path, hash, unix_now()],
            )?;
        }
        self.write_hashes()
            .insert(file_path.to_string(), hash.to_string());
        Ok(())
    }

    /// Files with a recorded hash, sorted.
    pub fn indexed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.read_hashes().keys().cloned().collect();
        files.sort();
        files
    }

    // Every critical section is a single map operation; poisoned guards are recovered.

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<EmbeddingRecord>>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<EmbeddingRecord>>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_hashes(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.file_hashes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_hashes(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.file_hashes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_conn(&self) -> Option<MutexGuard<'_, Connection>> {
        self.conn
            .as_ref()
            .map(|conn| conn.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS embeddings (
            node_id TEXT PRIMARY KEY,
            file_path TEXT,
            model_name TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            vector BLOB NOT NULL,
            metadata TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_embeddings_file_path
            ON embeddings(file_path);

        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            file_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');
        "#,
    )?;
    Ok(())
}

fn load_records(conn: &Connection) -> Result<HashMap<String, Arc<EmbeddingRecord>>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT node_id, model_name, dimensions, vector, metadata
        FROM embeddings
        "#,
    )?;

    let rows = stmt
        .query_map([], |row| {
            let node_id: String = row.get(0)?;
            let model_name: String = row.get(1)?;
            let dimensions: i64 = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            let metadata: String = row.get(4)?;
            Ok((node_id, model_name, dimensions, blob, metadata))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut records = HashMap::with_capacity(rows.len());
    for (node_id, model_name, dimensions, blob, metadata) in rows {
        let metadata: Metadata = serde_json::from_str(&metadata)?;
        let record = EmbeddingRecord {
            node_id,
            vector: blob_to_embedding(&blob),
            dimensions: dimensions as usize,
            model_name,
            metadata,
        };
        if let Err(err) = record.validate() {
            tracing::warn!("skipping stored record: {}", err);
            continue;
        }
        records.insert(record.node_id.clone(), Arc::new(record));
    }
    Ok(records)
}

fn load_file_hashes(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT path, file_hash FROM files")?;
    let hashes = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<HashMap<String, String>, _>>()?;
    Ok(hashes)
}

fn upsert_row(conn: &Connection, record: &EmbeddingRecord) -> Result<()> {
    let metadata = serde_json::to_string(&record.metadata)?;
    conn.execute(
        r#"
        INSERT INTO embeddings (node_id, file_path, model_name, dimensions, vector, metadata, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(node_id) DO UPDATE SET
            file_path = excluded.file_path,
            model_name = excluded.model_name,
            dimensions = excluded.dimensions,
            vector = excluded.vector,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at
        "#,
        params![
            record.node_id,
            record.file_path(),
            record.model_name,
            record.dimensions as i64,
            embedding_to_blob(&record.vector),
            metadata,
            unix_now()
        ],
    )?;
    Ok(())
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Converts an embedding vector to a compact little-endian blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0.0 when either vector has zero norm or widths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{MetadataValue, META_FILE_PATH};
    use tempfile::tempdir;

    fn record(node_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord::new(node_id, vector, "test-model")
    }

    fn record_in(file: &str, node_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        let mut metadata = Metadata::new();
        metadata.insert(META_FILE_PATH.to_string(), MetadataValue::from(file));
        record(node_id, vector).with_metadata(metadata)
    }

    #[test]
    fn test_store_location_parse() {
        assert_eq!(StoreLocation::parse(":memory:"), StoreLocation::InMemory);
        assert_eq!(
            StoreLocation::parse("data/v.sqlite"),
            StoreLocation::Path(PathBuf::from("data/v.sqlite"))
        );
        assert_eq!(StoreLocation::InMemory.to_string(), ":memory:");
    }

    #[test]
    fn test_empty_store_search_returns_nothing() {
        let store = VectorStore::in_memory();
        assert!(store.is_empty());
        assert!(store.search(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_zero_limit_returns_nothing() {
        let store = VectorStore::in_memory();
        store.add(record("a", vec![1.0, 0.0])).unwrap();
        assert!(store.search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_ranking_order() {
        let store = VectorStore::in_memory();
        store.add(record("target", vec![1.0, 0.0, 0.0])).unwrap();
        store.add(record("close", vec![0.9, 0.1, 0.0])).unwrap();
        store.add(record("far", vec![0.0, 1.0, 0.0])).unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.node_id, "target");
        assert!(results[0].score > 0.99);
        assert_eq!(results[1].record.node_id, "close");
        assert!(results[1].score > 0.8);
    }

    #[test]
    fn test_self_similarity() {
        let store = VectorStore::in_memory();
        let v = vec![0.3, -0.2, 0.7, 0.1];
        store.add(record("v", v.clone())).unwrap();
        store.add(record("w", vec![0.1, 0.9, 0.0, 0.2])).unwrap();

        let results = store.search(&v, 1);
        assert_eq!(results[0].record.node_id, "v");
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let store = VectorStore::in_memory();
        let mut bad = record("bad", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        bad.dimensions = 3;

        let err = store.add(bad).unwrap_err();
        assert!(err.is_dimension_mismatch());
        assert!(store.is_empty());
    }

    #[test]
    fn test_non_finite_vectors_never_reach_the_ranking() {
        let store = VectorStore::in_memory();
        store.add(record("good", vec![1.0, 0.0])).unwrap();

        let err = store.add(record("nan", vec![f32::NAN, 0.0])).unwrap_err();
        assert!(err.is_non_finite_vector());
        assert!(store
            .add_batch(vec![record("ok", vec![0.5, 0.5]), record("inf", vec![f32::INFINITY, 0.0])])
            .is_err());
        assert_eq!(store.len(), 1);

        let results = store.search(&[1.0, 0.0], 1);
        assert_eq!(results[0].record.node_id, "good");
        assert!(results[0].score <= 1.0);

        assert!(store.search(&[f32::NAN, 0.0], 5).is_empty());
    }

    #[test]
    fn test_upsert_replaces_record() {
        let store = VectorStore::in_memory();
        store.add(record("a", vec![1.0, 0.0])).unwrap();
        store.add(record("a", vec![0.0, 1.0])).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().vector, vec![0.0, 1.0]);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_ties_are_ordered_by_node_id() {
        let store = VectorStore::in_memory();
        for id in ["c", "a", "b"] {
            store.add(record(id, vec![1.0, 1.0])).unwrap();
        }
        let ids: Vec<_> = store
            .search(&[1.0, 1.0], 3)
            .into_iter()
            .map(|r| r.record.node_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_mismatched_widths_are_excluded_from_ranking() {
        let store = VectorStore::in_memory();
        store.add(record("two", vec![1.0, 0.0])).unwrap();
        store.add(record("three", vec![1.0, 0.0, 0.0])).unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.node_id, "three");
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);

        let store = VectorStore::in_memory();
        store.add(record("zero", vec![0.0, 0.0])).unwrap();
        let results = store.search(&[1.0, 0.0], 1);
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn test_search_model_filters_and_reports_exclusions() {
        let store = VectorStore::in_memory();
        store.add(record("a", vec![1.0, 0.0])).unwrap();
        store
            .add(EmbeddingRecord::new("b", vec![1.0, 0.0], "other-model"))
            .unwrap();
        store
            .add(EmbeddingRecord::new("c", vec![1.0, 0.0, 0.0], "other-model"))
            .unwrap();

        let search = store.search_model(&[1.0, 0.0], "test-model", 10);
        assert_eq!(search.results.len(), 1);
        assert_eq!(search.results[0].record.node_id, "a");
        assert_eq!(search.excluded_records(), 2);
        assert_eq!(search.excluded.len(), 2);
    }

    #[test]
    fn test_add_batch_is_all_or_nothing() {
        let store = VectorStore::in_memory();
        let mut bad = record("bad", vec![1.0]);
        bad.dimensions = 2;

        let err = store
            .add_batch(vec![record("good", vec![1.0, 0.0]), bad])
            .unwrap_err();
        assert!(err.is_dimension_mismatch());
        assert!(store.is_empty());

        let added = store
            .add_batch(vec![record("x", vec![1.0]), record("y", vec![0.5])])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_and_retain_by_file() {
        let store = VectorStore::in_memory();
        store.add(record_in("a.py", "a.py::f", vec![1.0])).unwrap();
        store.add(record_in("a.py", "a.py::g", vec![1.0])).unwrap();
        store.add(record_in("b.py", "b.py::h", vec![1.0])).unwrap();
        store.set_file_hash("a.py", "h1").unwrap();

        let keep: HashSet<String> = ["a.py::f".to_string()].into_iter().collect();
        assert_eq!(store.retain_file("a.py", &keep).unwrap(), 1);
        assert_eq!(store.node_ids_for_file("a.py"), vec!["a.py::f"]);

        assert_eq!(store.remove_file("a.py").unwrap(), 1);
        assert!(store.file_hash("a.py").is_none());
        assert_eq!(store.len(), 1);

        assert!(store.remove("b.py::h").unwrap());
        assert!(!store.remove("b.py::h").unwrap());
    }

    #[test]
    fn test_file_matches_model() {
        let store = VectorStore::in_memory();
        store.add(record_in("a.py", "a.py::f", vec![1.0, 0.0])).unwrap();
        assert!(store.file_matches_model("a.py", "test-model", 2));
        assert!(!store.file_matches_model("a.py", "test-model", 3));
        assert!(!store.file_matches_model("missing.py", "test-model", 2));

        let mut metadata = Metadata::new();
        metadata.insert(META_FILE_PATH.to_string(), MetadataValue::from("a.py"));
        store
            .add(EmbeddingRecord::new("a.py::g", vec![1.0, 0.0], "old-model").with_metadata(metadata))
            .unwrap();
        assert!(!store.file_matches_model("a.py", "test-model", 2));
    }

    #[test]
    fn test_models_counts() {
        let store = VectorStore::in_memory();
        store.add(record("a", vec![1.0, 0.0])).unwrap();
        store.add(record("b", vec![0.0, 1.0])).unwrap();
        assert_eq!(
            store.models(),
            vec![ModelCount {
                model_name: "test-model".into(),
                dimensions: 2,
                records: 2,
            }]
        );
    }

    #[test]
    fn test_durable_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let location = StoreLocation::Path(dir.path().join("nested").join("vectors.sqlite"));

        {
            let store = VectorStore::open(&location).unwrap();
            store
                .add_batch(vec![
                    record_in("a.py", "a.py::f", vec![1.0, 0.0]),
                    record_in("a.py", "a.py::g", vec![0.0, 1.0]),
                ])
                .unwrap();
            store.add(record_in("a.py", "a.py::f", vec![0.6, 0.8])).unwrap();
            store.set_file_hash("a.py", "abc").unwrap();
            store.remove("a.py::g").unwrap();
        }

        let store = VectorStore::open(&location).unwrap();
        assert_eq!(store.len(), 1);
        let f = store.get("a.py::f").unwrap();
        assert_eq!(f.vector, vec![0.6, 0.8]);
        assert_eq!(f.file_path(), Some("a.py"));
        assert_eq!(store.file_hash("a.py").as_deref(), Some("abc"));
        assert_eq!(store.indexed_files(), vec!["a.py"]);

        store.clear().unwrap();
        drop(store);
        let store = VectorStore::open(&location).unwrap();
        assert!(store.is_empty());
        assert!(store.indexed_files().is_empty());
    }

    #[test]
    fn test_rejected_write_is_not_persisted() {
        let dir = tempdir().unwrap();
        let location = StoreLocation::Path(dir.path().join("vectors.sqlite"));
        let store = VectorStore::open(&location).unwrap();

        let mut bad = record("bad", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        bad.dimensions = 3;
        assert!(store.add(bad).is_err());
        drop(store);

        assert!(VectorStore::open(&location).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = VectorStore::in_memory();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..50 {
                        let id = format!("w{}::{}", worker, i);
                        store.add(record(&id, vec![1.0, i as f32])).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    for hit in store.search(&[1.0, 0.0], 5) {
                        assert_eq!(hit.record.vector.len(), 2);
                    }
                }
            });
        });
        assert_eq!(store.len(), 200);
    }
}
