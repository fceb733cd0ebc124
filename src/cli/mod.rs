//! Command line interface for reelsmith.

pub mod commands;
pub mod interactive;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// reelsmith - cache-aware task orchestration for short-video pipelines.
#[derive(Parser, Debug)]
#[command(name = "reelsmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "reelsmith.toml")]
    pub config: PathBuf,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates a configuration in the current directory.
    Init {
        /// Target directory (default: current directory).
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Runs a batch of configured tasks.
    Run {
        /// Batch as JSON: `[{"name": "theme", "params": {...}}, ...]`, or
        /// `@file.json` to read it from a file.
        #[arg(short, long)]
        tasks: String,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ranks candidate clips against a reference text and downloads the best.
    Select {
        /// Text the candidates are matched against.
        #[arg(short, long)]
        reference: String,

        /// Candidates as a JSON array, or `@file.json`.
        #[arg(long)]
        candidates: String,

        /// Maximum number of clips to keep.
        #[arg(short, long, default_value_t = 3)]
        max: usize,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Shows cache statistics.
    Stats,

    /// Removes cache entries.
    Clear {
        /// Only remove entries whose key or operation contains this text.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Removes expired cache entries.
    Prune,

    /// Edits the configuration interactively.
    Config,

    /// Diagnoses configuration problems.
    Doctor,

    /// Shows version.
    Version,
}
