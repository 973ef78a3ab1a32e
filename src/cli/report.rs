//! Session rendering and live progress

use std::fmt::Write as _;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::commands::OutputFormat;
use crate::common::Result;
use crate::testing::{Event, GroupState, OperationResult, Session, Verdict};

/// Render a finished session
pub fn render(session: &Session, format: OutputFormat, verbose: bool) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(render_console(session, verbose)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(session)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(session)?),
    }
}

fn verdict_mark(verdict: Verdict) -> ColoredString {
    match verdict {
        Verdict::Pass => "✓".green(),
        Verdict::Fail => "✗".red(),
        Verdict::Error => "!".yellow(),
    }
}

fn state_label(state: GroupState) -> ColoredString {
    let label = state.to_string();
    match state {
        GroupState::Completed => label.green(),
        GroupState::Failed => label.red().bold(),
        GroupState::Pending => label.dimmed(),
        _ => label.yellow(),
    }
}

fn secs(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// What the operation was declared to do
fn expected_text(result: &OperationResult) -> String {
    if result.expected.success {
        "success".to_string()
    } else {
        format!(
            "error {}",
            result.expected.error_code.as_deref().unwrap_or("?")
        )
    }
}

/// What actually happened
fn actual_text(result: &OperationResult) -> String {
    if result.success {
        if result.dry_run {
            "success (dry run)".to_string()
        } else {
            "success".to_string()
        }
    } else {
        match (&result.error_code, &result.message) {
            (Some(code), Some(message)) if !message.is_empty() => {
                format!("error {}: {}", code, message)
            }
            (Some(code), _) => format!("error {}", code),
            (None, Some(message)) => message.clone(),
            (None, None) => "error".to_string(),
        }
    }
}

fn render_console(session: &Session, verbose: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "\n{} {}{}",
        "Test Session".blue().bold(),
        session.id.to_string().dimmed(),
        if session.dry_run {
            " (dry run)".yellow().to_string()
        } else {
            String::new()
        }
    );

    for group in &session.groups {
        let _ = writeln!(
            out,
            "\n{} {} [{}] {}",
            "Group:".cyan(),
            group.name.white().bold(),
            state_label(group.state),
            secs(group.duration).dimmed()
        );
        let _ = writeln!(
            out,
            "  credential: {}  passed: {}  failed: {}  errors: {}  skipped: {}",
            group.credential,
            group.summary.passed,
            group.summary.failed,
            group.summary.errors,
            group.skipped
        );
        if let Some(phase) = group.stopped_in {
            let _ = writeln!(out, "  stopped in: {}", phase);
        }

        if verbose {
            for result in session.results_for(&group.name) {
                let _ = writeln!(
                    out,
                    "  {} {}[{}/{}] {} {}",
                    verdict_mark(result.verdict),
                    result.phase,
                    result.index,
                    result.phase_total,
                    result.operation,
                    secs(result.duration).dimmed()
                );
            }
        }
    }

    let failures: Vec<&OperationResult> = session.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\n{}", "Failures:".red().bold());
        for result in failures {
            let _ = writeln!(
                out,
                "  {} {} / {}[{}] {} ({})",
                verdict_mark(result.verdict),
                result.group,
                result.phase,
                result.index,
                result.operation.bold(),
                result.credential
            );
            let _ = writeln!(out, "      expected: {}", expected_text(result));
            let _ = writeln!(out, "      actual:   {}", actual_text(result));
            if let Some(reason) = &result.reason {
                let _ = writeln!(out, "      reason:   {}", reason.dimmed());
            }
        }
    }

    let summary = &session.summary;
    let _ = writeln!(
        out,
        "\n{} {} total, {} passed, {} failed, {} errors ({:.1}% success) in {}",
        "Summary:".bold(),
        summary.total,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.errors.to_string().yellow(),
        summary.success_rate * 100.0,
        secs(session.duration)
    );

    if let Some(timing) = session.timing() {
        let _ = write!(
            out,
            "{} avg {}  min {}  max {}",
            "Timing: ".bold(),
            secs(timing.average),
            secs(timing.min),
            secs(timing.max)
        );
        if let Some(p) = &timing.percentiles {
            let _ = write!(
                out,
                "  p50 {}  p90 {}  p95 {}",
                secs(p.p50),
                secs(p.p90),
                secs(p.p95)
            );
        }
        let _ = writeln!(out, "  ({:.1} ops/s)", timing.ops_per_sec);
    }

    if session.cancelled {
        let _ = writeln!(out, "{}", "Run was cancelled".yellow().bold());
    }

    out
}

/// Drive a progress bar from engine events until the session finishes
pub fn track_progress(mut events: UnboundedReceiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;

        while let Some(event) = events.recv().await {
            match event {
                Event::SessionStarted { operations, .. } => {
                    let pb = ProgressBar::new(operations as u64);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("  [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=> "),
                    );
                    bar = Some(pb);
                }
                Event::GroupStarted { group } => {
                    if let Some(pb) = &bar {
                        pb.set_message(group);
                    }
                }
                Event::OperationCompleted(result) => {
                    if let Some(pb) = &bar {
                        if !result.passed() {
                            pb.println(format!(
                                "  {} {} / {}[{}] {}: {}",
                                verdict_mark(result.verdict),
                                result.group,
                                result.phase,
                                result.index,
                                result.operation,
                                result.reason.as_deref().unwrap_or_default()
                            ));
                        }
                        pb.inc(1);
                    }
                }
                Event::GroupCompleted { skipped, .. } => {
                    if let Some(pb) = &bar {
                        pb.inc(skipped as u64);
                    }
                }
                Event::SessionFinished { .. } => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::config::{ExpectedResult, Phase};
    use crate::testing::retry::Attempted;
    use crate::testing::session::{OperationOrigin, SessionRecorder};
    use crate::testing::validator::Judgement;
    use crate::operations::ServiceError;

    fn session() -> Session {
        let recorder = SessionRecorder::new(false);
        let origin = OperationOrigin {
            group: "basic".into(),
            phase: Phase::Test,
            index: 1,
            phase_total: 1,
            operation: "GetObject".into(),
            credential: "admin".into(),
        };
        recorder
            .record(OperationResult::new(
                origin,
                &ExpectedResult::success(),
                Attempted {
                    result: Ok(Err(ServiceError::new("NoSuchKey", "missing"))),
                    attempts: 1,
                },
                Judgement {
                    verdict: Verdict::Fail,
                    reason: Some("expected success, got NoSuchKey: missing".into()),
                },
                Duration::from_millis(12),
            ))
            .unwrap();
        recorder.finish(&["basic".to_string()], false).unwrap()
    }

    #[test]
    fn test_console_lists_failures() {
        colored::control::set_override(false);
        let text = render(&session(), OutputFormat::Console, false).unwrap();
        assert!(text.contains("Failures:"));
        assert!(text.contains("expected: success"));
        assert!(text.contains("actual:   error NoSuchKey: missing"));
        assert!(text.contains("1 total, 0 passed, 1 failed, 0 errors"));
    }

    #[test]
    fn test_json_is_machine_readable() {
        let text = render(&session(), OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["results"][0]["verdict"], "fail");
        assert_eq!(value["results"][0]["error_code"], "NoSuchKey");
    }

    #[test]
    fn test_yaml_renders() {
        let text = render(&session(), OutputFormat::Yaml, false).unwrap();
        assert!(text.contains("verdict: fail"));
    }
}
