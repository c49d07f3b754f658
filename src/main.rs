// SPDX-License-Identifier: MIT OR Apache-2.0

//! codeseek - Local semantic code search tool
//!
//! Extracts code entities with tree-sitter, embeds them and answers
//! natural-language queries by cosine similarity.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use codeseek::errors::SearchError;
use commands::Printer;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when the embedding backend cannot be used
const EXIT_UNAVAILABLE: u8 = 2;

fn run(cli: Cli) -> Result<()> {
    let printer = Printer::new(cli.format, cli.compact);

    match cli.command {
        Commands::Index {
            path,
            force,
            exclude_paths,
        } => commands::index(path.as_deref(), force, exclude_paths, printer)?,
        Commands::Search { query, path, limit } => {
            commands::search(&query, path.as_deref(), limit, printer)?
        }
        Commands::Stats { path } => commands::stats(path.as_deref(), printer)?,
        Commands::Watch { path, debounce } => commands::watch(path.as_deref(), debounce, printer)?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "codeseek", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    // CODESEEK_LOG=debug codeseek search "query"
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("CODESEEK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let unavailable = err
                .downcast_ref::<SearchError>()
                .is_some_and(SearchError::is_capability_unavailable);
            if unavailable {
                ExitCode::from(EXIT_UNAVAILABLE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
