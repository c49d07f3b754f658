// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language registry for tree-sitter parsers

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Language, Parser};

/// Supported languages with their tree-sitter grammars
pub struct LanguageRegistry {
    languages: HashMap<&'static str, Language>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut languages = HashMap::new();

        languages.insert(
            "typescript",
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        );
        languages.insert("tsx", tree_sitter_typescript::LANGUAGE_TSX.into());
        languages.insert("javascript", tree_sitter_javascript::LANGUAGE.into());
        languages.insert("python", tree_sitter_python::LANGUAGE.into());
        languages.insert("rust", tree_sitter_rust::LANGUAGE.into());
        languages.insert("go", tree_sitter_go::LANGUAGE.into());
        languages.insert("c", tree_sitter_c::LANGUAGE.into());
        languages.insert("cpp", tree_sitter_cpp::LANGUAGE.into());
        languages.insert("java", tree_sitter_java::LANGUAGE.into());
        languages.insert("ruby", tree_sitter_ruby::LANGUAGE.into());

        Self { languages }
    }

    /// Get language by name
    pub fn get(&self, name: &str) -> Option<&Language> {
        self.languages.get(name.to_lowercase().as_str())
    }

    /// Create a parser configured for the language
    pub fn parser(&self, name: &str) -> Option<Parser> {
        let lang = self.get(name)?;
        let mut parser = Parser::new();
        parser.set_language(lang).ok()?;
        Some(parser)
    }

    /// List all supported languages, sorted
    pub fn supported_languages(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.languages.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Global language registry
pub static LANGUAGES: Lazy<LanguageRegistry> = Lazy::new(LanguageRegistry::new);

/// Detect language from file extension
pub fn detect_language(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "rs" => Some("rust"),
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "py" | "pyi" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some("cpp"),
        "rb" => Some("ruby"),
        _ => None,
    }
}

/// Detect language from a file path
pub fn detect_language_for_path(path: &str) -> Option<&'static str> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(detect_language)
}
