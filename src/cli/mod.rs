//! CLI command handling
//!
//! Loads plans, drives the engine and renders results.

mod report;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;

use crate::commands::{Commands, OutputFormat};
use crate::common::config::Settings;
use crate::common::{Error, Result};
use crate::operations::{Dispatcher, OperationRegistry};
use crate::testing::runner::{Engine, ExecutionMode, RunOptions};
use crate::testing::validate::validate_plan;
use crate::testing::{load_plan, ChannelSink, Phase, TestPlan};

pub use report::{render, track_progress};

/// Dispatch a CLI command, returning the process exit status
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            config,
            parallel,
            sequential,
            groups,
            format,
            output,
            timeout,
            max_retries,
            workers,
            dry_run,
            verbose,
        } => {
            let plan = load_plan(&config)?;
            let settings = Settings::load()?;
            let registry = OperationRegistry::s3(&settings);

            let mode = if parallel {
                Some(ExecutionMode::Parallel)
            } else if sequential {
                Some(ExecutionMode::Sequential)
            } else {
                None
            };
            let options = RunOptions {
                dry_run,
                groups,
                mode,
                timeout: timeout.map(Duration::from_secs),
                max_retries,
                workers,
            };

            let (sink, events) = ChannelSink::channel();
            let engine = Engine::new(plan, Arc::new(registry), settings)?.with_events(Arc::new(sink));

            let progress = (format == OutputFormat::Console).then(|| track_progress(events));

            let cancel = engine.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, finishing in-flight operations and teardown");
                    cancel.cancel();
                }
            });

            let session = engine.run(options).await?;
            if let Some(progress) = progress {
                let _ = progress.await;
            }

            let rendered = render(&session, format, verbose)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Results written to {}", path.display());
                }
                None => println!("{}", rendered),
            }

            Ok(session.exit_code())
        }

        Commands::Validate { config, strict } => {
            let plan = load_plan(&config)?;
            let settings = Settings::load()?;
            let registry = OperationRegistry::s3(&settings);

            let problems = validate_plan(&plan, &registry, strict);
            if problems.is_empty() {
                println!(
                    "{} {} ({} groups, {} operations)",
                    "✓".green(),
                    config.display(),
                    plan.test_cases.groups.len(),
                    plan.operation_count()
                );
                return Ok(0);
            }

            println!(
                "{} {} has {} problem(s):",
                "✗".red(),
                config.display(),
                problems.len()
            );
            for problem in &problems {
                println!("  - {}", problem);
            }
            Ok(Error::InvalidPlan(problems).exit_code())
        }

        Commands::List { config } => {
            match config {
                Some(path) => list_groups(&path)?,
                None => list_operations(),
            }
            Ok(0)
        }
    }
}

fn list_operations() {
    let registry = OperationRegistry::s3(&Settings::default());
    println!("{}", "Supported operations:".blue().bold());
    for name in registry.operation_names() {
        println!("  {}", name);
    }
}

fn list_groups(path: &Path) -> Result<()> {
    let plan: TestPlan = load_plan(path)?;
    println!(
        "{} {}",
        "Groups in".blue().bold(),
        path.display().to_string().white().bold()
    );

    for group in &plan.test_cases.groups {
        let sizes: Vec<String> = Phase::ALL
            .iter()
            .map(|&phase| format!("{}: {}", phase.key(), group.phase(phase).len()))
            .collect();
        println!(
            "  {} [{}] {}",
            group.name.bold(),
            group.credential.dimmed(),
            sizes.join(", ")
        );
    }
    Ok(())
}
