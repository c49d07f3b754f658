// SPDX-License-Identifier: MIT OR Apache-2.0

//! File watcher for incremental index updates with debouncing

use anyhow::Result;
use colored::Colorize;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::indexer::pipeline::{IndexOptions, SemanticIndex};
use crate::indexer::scanner::FileScanner;
use crate::utils::{relative_path, INDEX_DIR};

/// Default debounce interval in seconds
const DEFAULT_DEBOUNCE_SECS: u64 = 2;

/// Minimum time between reindex operations
const MIN_REINDEX_INTERVAL_SECS: u64 = 5;

/// File system watcher with debouncing
pub struct Watcher {
    root: PathBuf,
    debounce_duration: Duration,
    min_reindex_interval: Duration,
}

impl Watcher {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            debounce_duration: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            min_reindex_interval: Duration::from_secs(MIN_REINDEX_INTERVAL_SECS),
        }
    }

    /// Create watcher with custom debounce interval
    pub fn with_debounce(root: impl AsRef<Path>, debounce_secs: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            debounce_duration: Duration::from_secs(debounce_secs),
            min_reindex_interval: Duration::from_secs(MIN_REINDEX_INTERVAL_SECS.max(debounce_secs)),
        }
    }

    /// Block and re-run `index` whenever watched sources change.
    ///
    /// Unchanged files are skipped by content hash, so each pass only
    /// re-embeds what was edited.
    pub fn watch(&self, index: &SemanticIndex, options: &IndexOptions) -> Result<()> {
        let (tx, rx) = channel();

        let config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));

        let mut watcher = RecommendedWatcher::new(tx, config)?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let scanner = FileScanner::new(&self.root).with_excludes(&options.exclude_paths);

        println!("{} Watching {} for changes...", "👁".cyan(), self.root.display());
        println!(
            "  Debounce: {}s, Min interval: {}s",
            self.debounce_duration.as_secs(),
            self.min_reindex_interval.as_secs()
        );
        println!("Press Ctrl+C to stop\n");

        let mut pending_paths: HashSet<PathBuf> = HashSet::new();
        let mut last_event_time: Option<Instant> = None;
        let mut last_reindex_time: Option<Instant> = None;

        loop {
            let timeout = if pending_paths.is_empty() {
                Duration::from_secs(60)
            } else {
                self.debounce_duration
            };

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if should_reindex(&event) {
                        for path in &event.paths {
                            if self.is_relevant(&scanner, path) {
                                pending_paths.insert(path.clone());
                            }
                        }
                        last_event_time = Some(Instant::now());
                    }
                }
                Ok(Err(e)) => {
                    eprintln!("{} Watch error: {}", "✗".red(), e);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if options.cancel.is_cancelled() {
                break;
            }
            if pending_paths.is_empty() {
                continue;
            }

            let settled = last_event_time
                .map(|t| t.elapsed() >= self.debounce_duration)
                .unwrap_or(false);
            let can_reindex = last_reindex_time
                .map(|t| t.elapsed() >= self.min_reindex_interval)
                .unwrap_or(true);

            if settled && can_reindex {
                println!("{} {} file(s) changed, reindexing...", "🔄".yellow(), pending_paths.len());

                // Cleared first so events during the run start a new batch
                pending_paths.clear();
                last_event_time = None;

                let start = Instant::now();
                match index.index(&self.root, options) {
                    Ok(summary) => println!(
                        "{} Reindexed {} file(s), removed {} in {:.1}s",
                        "✓".green(),
                        summary.files_indexed,
                        summary.files_removed,
                        start.elapsed().as_secs_f64()
                    ),
                    Err(e) => eprintln!("{} Reindex failed: {}", "✗".red(), e),
                }

                last_reindex_time = Some(Instant::now());
            }
        }

        Ok(())
    }

    /// Source files the scanner would pick up; the index directory never counts.
    fn is_relevant(&self, scanner: &FileScanner, path: &Path) -> bool {
        let relative = relative_path(&self.root, path);
        if relative.split('/').any(|part| part == INDEX_DIR || part == ".git") {
            return false;
        }
        // Deleted files no longer exist, so only the name can be checked
        scanner.accepts(&relative)
    }
}

/// Check if event should trigger reindex
fn should_reindex(event: &Event) -> bool {
    use notify::EventKind::*;
    matches!(event.kind, Create(_) | Modify(_) | Remove(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, EventKind, RemoveKind};

    #[test]
    fn test_should_reindex_on_content_changes() {
        assert!(should_reindex(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(should_reindex(&Event::new(EventKind::Remove(RemoveKind::File))));
        assert!(!should_reindex(&Event::new(EventKind::Access(AccessKind::Any))));
    }

    #[test]
    fn test_relevant_paths() {
        let watcher = Watcher::with_debounce("/repo", 1);
        let scanner = FileScanner::new("/repo").with_excludes(&["build/**"]);

        assert!(watcher.is_relevant(&scanner, Path::new("/repo/src/main.rs")));
        assert!(!watcher.is_relevant(&scanner, Path::new("/repo/.codeseek/vectors.sqlite")));
        assert!(!watcher.is_relevant(&scanner, Path::new("/repo/build/gen.rs")));
        assert!(!watcher.is_relevant(&scanner, Path::new("/repo/README.md")));
        assert_eq!(watcher.min_reindex_interval, Duration::from_secs(5));
    }
}
