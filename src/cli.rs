// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// codeseek - Local semantic code search tool
///
/// Indexes code entities with tree-sitter, embeds them and ranks them
/// against natural-language queries by cosine similarity.
#[derive(Parser, Debug)]
#[command(name = "codeseek")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or update the semantic index
    #[command(alias = "i")]
    Index {
        /// Root to index (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Re-embed every file, even unchanged ones
        #[arg(short, long)]
        force: bool,

        /// Glob patterns to exclude (repeatable)
        #[arg(short = 'e', long = "exclude")]
        exclude_paths: Vec<String>,
    },

    /// Semantic search over indexed entities
    #[command(alias = "s")]
    Search {
        /// Natural-language query
        query: String,

        /// Path inside the indexed tree (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum number of results
        #[arg(short = 'm', long = "limit", visible_alias = "max-results")]
        limit: Option<usize>,
    },

    /// Show what the index holds
    Stats {
        /// Path inside the indexed tree (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Watch files and update the index on change
    Watch {
        /// Root to watch (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Seconds to wait after the last change before reindexing
        #[arg(short, long, default_value_t = 2)]
        debounce: u64,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
