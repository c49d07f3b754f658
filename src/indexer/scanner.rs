// SPDX-License-Identifier: MIT OR Apache-2.0

//! File scanner using the ignore crate (same as ripgrep)
//!
//! The scanner only lists files; reading them is left to the caller so a
//! failed read can be reported against the file that caused it.

use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::errors::{Result, SearchError};
use crate::filters::PathFilter;
use crate::parser::languages::detect_language_for_path;
use crate::utils::{relative_path, INDEX_DIR};

const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// A source file found under the scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub absolute: PathBuf,
    pub size: u64,
}

impl ScannedFile {
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.absolute).map_err(|e| SearchError::io(&self.absolute, e))
    }
}

/// Outcome of one directory walk
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Files sorted by relative path
    pub files: Vec<ScannedFile>,
    /// Entries the walker could not visit
    pub errors: Vec<String>,
}

impl ScanReport {
    /// True when every directory entry was visited.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

enum WalkItem {
    File(ScannedFile),
    Error(String),
}

/// File scanner that respects .gitignore
pub struct FileScanner {
    root: PathBuf,
    filter: PathFilter,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            filter: PathFilter::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_excludes<S: AsRef<str>>(mut self, patterns: &[S]) -> Self {
        self.filter = PathFilter::new(patterns);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative path would be picked up by a scan.
    pub fn accepts(&self, relative: &str) -> bool {
        detect_language_for_path(relative).is_some() && !self.filter.is_excluded(relative)
    }

    /// Walk the root and list every supported source file
    pub fn scan(&self) -> ScanReport {
        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name != INDEX_DIR && name != ".git")
                    .unwrap_or(true)
            })
            .build_parallel();

        walker.run(|| {
            let tx = tx.clone();

            Box::new(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let _ = tx.send(WalkItem::Error(err.to_string()));
                        return ignore::WalkState::Continue;
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    return ignore::WalkState::Continue;
                }

                let path = entry.path();
                let relative = relative_path(&self.root, path);
                if !self.accepts(&relative) {
                    return ignore::WalkState::Continue;
                }

                match entry.metadata() {
                    Ok(meta) if meta.len() > self.max_file_size => {
                        tracing::debug!(path = %relative, size = meta.len(), "skipping large file");
                    }
                    Ok(meta) => {
                        let _ = tx.send(WalkItem::File(ScannedFile {
                            path: relative,
                            absolute: path.to_path_buf(),
                            size: meta.len(),
                        }));
                    }
                    Err(err) => {
                        let _ = tx.send(WalkItem::Error(format!("{}: {}", relative, err)));
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut report = ScanReport::default();
        for item in rx {
            match item {
                WalkItem::File(file) => report.files.push(file),
                WalkItem::Error(err) => {
                    tracing::warn!("scan error: {}", err);
                    report.errors.push(err);
                }
            }
        }
        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        report
    }
}
