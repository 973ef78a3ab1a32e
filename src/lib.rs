//! s3tester - declarative compatibility testing for S3-style storage services
//!
//! This library loads YAML test plans, executes them against an operation
//! dispatcher and aggregates the verdicts into a session report.

pub mod cli;
pub mod commands;
pub mod common;
pub mod operations;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{load_plan, Engine, RunOptions, Session};
