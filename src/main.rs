//! s3tester - declarative compatibility testing for S3-style storage services
//!
//! Runs YAML test plans of bucket and object operations against an endpoint
//! and reports which operations behaved as expected.

use std::path::PathBuf;

use clap::Parser;
use s3tester::cli;
use s3tester::commands::Commands;
use s3tester::common::logging::{self, LogFormat};

#[derive(Parser)]
#[command(name = "s3tester", about = "Declarative S3 compatibility tester")]
#[command(version, long_about = None)]
struct Cli {
    /// Log level for s3tester (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "standard")]
    log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = logging::init(&cli.log_level, cli.log_format, cli.log_file.as_deref());

    let code = match cli::dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // Flush the file writer before exiting
    drop(guard);
    std::process::exit(code);
}
