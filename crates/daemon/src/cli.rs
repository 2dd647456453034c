// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stintd", version)]
#[command(about = "Offline-first sync daemon for the stint productivity tracker")]
#[command(
    long_about = "Offline-first sync daemon for the stint productivity tracker.\n\n\
    Keeps the local database converged with a shared remote database, \
    resolving concurrent edits by last writer wins."
)]
pub struct Cli {
    /// Path to config.toml (defaults to $STINT_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync loop until interrupted
    #[command(after_help = "Syncs at start, every sync.interval_secs, and shortly after \
        local edits stop. Stop with Ctrl-C.")]
    Run,

    /// Run a single sync cycle and print its report
    Once {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show records that are not in sync
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset a failed record so the next cycle tries it again
    #[command(arg_required_else_help = true)]
    Retry {
        /// Entity type (goal, sprint, task, checkup, tag, task_tag)
        entity_type: String,
        /// Local id
        id: String,
    },

    /// Create or replace an entity in the local store
    #[command(
        arg_required_else_help = true,
        after_help = "Examples:\n  \
        stintd put goal g1 --fields '{\"title\": \"Get fit\"}'\n  \
        stintd put task t1 --fields '{\"title\": \"Run\"}' --ref goal:g1"
    )]
    Put {
        /// Entity type (goal, sprint, task, checkup, tag, task_tag)
        entity_type: String,
        /// Local id
        id: String,
        /// Entity fields as a JSON object
        #[arg(long)]
        fields: String,
        /// Reference to another entity as TYPE:ID (repeatable)
        #[arg(long = "ref", value_name = "TYPE:ID")]
        refs: Vec<String>,
    },

    /// Delete an entity from the local store
    #[command(arg_required_else_help = true)]
    Delete {
        /// Entity type (goal, sprint, task, checkup, tag, task_tag)
        entity_type: String,
        /// Local id
        id: String,
    },
}
