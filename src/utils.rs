// SPDX-License-Identifier: MIT OR Apache-2.0

//! Path helpers shared by the scanner, the watcher and the CLI

use std::path::{Path, PathBuf};

/// Directory holding the vector store under an indexed root
pub const INDEX_DIR: &str = ".codeseek";

/// Nearest ancestor of `start` (itself included) that holds an index directory.
pub fn find_index_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| dir.join(INDEX_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// Indexed root containing `path`, or `path` itself when none exists yet.
pub fn get_root_with_index(path: impl AsRef<Path>) -> PathBuf {
    find_index_root(&path).unwrap_or_else(|| path.as_ref().to_path_buf())
}

/// Render `path` relative to `root` with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let text = relative.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
