// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source parsing: language detection and code entity extraction.

pub mod entities;
pub mod languages;

pub use entities::{ParseOutcome, SourceIndexer};
pub use languages::{detect_language, detect_language_for_path, LANGUAGES};
