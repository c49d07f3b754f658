// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use colored::Colorize;
use serde::Serialize;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize file path (cyan)
pub fn colorize_path(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize line number (yellow)
pub fn colorize_line_num(num: usize, use_color: bool) -> String {
    if use_color {
        num.to_string().yellow().to_string()
    } else {
        num.to_string()
    }
}

/// Colorize entity kind (green)
pub fn colorize_kind(text: &str, use_color: bool) -> String {
    if use_color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize entity name (bold)
pub fn colorize_name(text: &str, use_color: bool) -> String {
    if use_color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

/// Similarity score with three decimals (dimmed)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.3}", score);
    if use_color {
        text.dimmed().to_string()
    } else {
        text
    }
}

/// Warning line prefix (yellow bold)
pub fn warning_label(use_color: bool) -> String {
    if use_color {
        "warning:".yellow().bold().to_string()
    } else {
        "warning:".to_string()
    }
}

/// Serialize `value` as pretty or compact JSON
pub fn to_json<T: Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}
