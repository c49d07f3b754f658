// SPDX-License-Identifier: MIT OR Apache-2.0

//! Path exclusion for the file scanner
//!
//! Exclude patterns are gitignore-flavoured globs compiled once to regexes:
//! `**` spans directories, `*` and `?` stay within one path segment, and a
//! pattern matching a directory excludes everything below it.

use regex::Regex;

/// A precompiled glob pattern for efficient repeated matching
#[derive(Debug, Clone)]
pub struct CompiledGlob {
    pattern: String,
    regex: Regex,
}

impl CompiledGlob {
    /// Compile a glob pattern to a regex
    pub fn new(pattern: &str) -> Option<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return None;
        }
        Regex::new(&glob_to_regex(trimmed))
            .ok()
            .map(|regex| Self {
                pattern: trimmed.to_string(),
                regex,
            })
    }

    /// Check if a `/`-separated relative path matches this glob pattern
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.trim_start_matches("./");
    let anchored = pattern.starts_with('/');
    let pattern = pattern.trim_matches('/');

    // Unanchored patterns may match at any directory depth
    let mut out = String::from(if anchored { "(?i)^" } else { "(?i)(^|/)" });
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }
    out.push_str("(/.*)?$");
    out
}

/// A set of exclude globs
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    excludes: Vec<CompiledGlob>,
}

impl PathFilter {
    /// Compile patterns; invalid ones are logged and skipped.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let excludes = patterns
            .iter()
            .filter_map(|pattern| {
                let compiled = CompiledGlob::new(pattern.as_ref());
                if compiled.is_none() {
                    tracing::warn!("ignoring invalid exclude pattern '{}'", pattern.as_ref());
                }
                compiled
            })
            .collect();
        Self { excludes }
    }

    /// Check if file should be excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excludes.iter().any(|glob| glob.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.excludes.is_empty()
    }
}
