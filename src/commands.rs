//! CLI command definitions
//!
//! Defines the clap commands for the s3tester CLI.

use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test plan against the configured endpoint
    Run {
        /// Path to the YAML test plan
        #[arg(long, short)]
        config: PathBuf,

        /// Run groups concurrently
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Run groups one at a time in declaration order
        #[arg(long)]
        sequential: bool,

        /// Only run the named group (can be given multiple times)
        #[arg(long = "group", short = 'g')]
        groups: Vec<String>,

        /// Result format
        #[arg(long, short, value_enum, default_value = "console")]
        format: OutputFormat,

        /// Write the rendered results to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Per-attempt timeout in seconds
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Retry budget for retryable errors
        #[arg(long)]
        max_retries: Option<u32>,

        /// Operations dispatched concurrently within a phase
        #[arg(long)]
        workers: Option<usize>,

        /// Validate and walk the plan without contacting the service
        #[arg(long)]
        dry_run: bool,

        /// Show every operation, not only failures
        #[arg(long, short)]
        verbose: bool,
    },

    /// Check a test plan without running it
    Validate {
        /// Path to the YAML test plan
        #[arg(long, short)]
        config: PathBuf,

        /// Also require every file:// reference to exist
        #[arg(long)]
        strict: bool,
    },

    /// List supported operations, or the groups of a plan
    List {
        /// Path to a YAML test plan
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Result rendering formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Console,
    Json,
    Yaml,
}
