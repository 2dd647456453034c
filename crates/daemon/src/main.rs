// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! stintd - The stint sync daemon.
//!
//! Keeps the local SQLite database at `<state_dir>/stint.db` converged with a
//! shared remote database, and offers operator commands to inspect and nudge
//! the sync state.
//!
//! Usage:
//!   stintd [--config <path>] <run | once | status | retry | put | delete>

use std::fs;
use std::path::Path;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod env;
mod error;
mod runner;

use cli::{Cli, Command};
use config::{resolve_config_path, Config};
use error::Result;

/// Log filename within the state directory.
const LOG_NAME: &str = "stintd.log";

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;

    let state_dir = config.state_dir();
    fs::create_dir_all(&state_dir)?;
    setup_logging(&state_dir.join(LOG_NAME));
    tracing::debug!("loaded config from {}", config_path.display());

    match cli.command {
        Command::Run => runner::run_daemon(&config),
        Command::Once { json } => commands::once(&config, json),
        Command::Status { json } => commands::status(&config, json),
        Command::Retry { entity_type, id } => commands::retry(&config, &entity_type, &id),
        Command::Put { entity_type, id, fields, refs } => {
            commands::put(&config, &entity_type, &id, &fields, &refs)
        }
        Command::Delete { entity_type, id } => commands::delete(&config, &entity_type, &id),
    }
}

fn setup_logging(log_path: &Path) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(env::vars::RUST_LOG)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Try to open log file, fall back to stderr
    if let Ok(file) = fs::OpenOptions::new().create(true).append(true).open(log_path) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
