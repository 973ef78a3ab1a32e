//! Session aggregation
//!
//! Per-operation results are appended concurrently through
//! [`SessionRecorder`] and frozen into a [`Session`] when the run ends.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::operations::Response;

use super::config::{ExpectedResult, Phase};
use super::retry::Attempted;
use super::state::GroupState;
use super::validator::{Judgement, Verdict};

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Where an operation sits in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOrigin {
    pub group: String,
    pub phase: Phase,
    /// 1-based position within the phase
    pub index: usize,
    pub phase_total: usize,
    pub operation: String,
    /// Effective credential after overrides
    pub credential: String,
}

/// Outcome of one operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub group: String,
    pub phase: Phase,
    pub index: usize,
    pub phase_total: usize,
    pub operation: String,
    pub credential: String,
    pub verdict: Verdict,
    /// Whether the call itself succeeded
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Why the verdict is not a pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub expected: ExpectedResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub attempts: u32,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    /// Build a result from a governed dispatch and its judgement
    pub fn new(
        origin: OperationOrigin,
        expected: &ExpectedResult,
        attempted: Attempted,
        judgement: Judgement,
        duration: Duration,
    ) -> Self {
        let mut result = Self::blank(origin, expected, judgement, duration);
        result.attempts = attempted.attempts;

        match attempted.result {
            Ok(Ok(response)) => {
                result.success = true;
                result.dry_run = response.dry_run;
                result.response = Some(response);
            }
            Ok(Err(err)) => {
                result.error_code = Some(err.code);
                result.message = Some(err.message);
            }
            Err(err) => result.message = Some(err.to_string()),
        }
        result
    }

    /// Result for an operation that could not be dispatched at all
    pub fn errored(
        origin: OperationOrigin,
        expected: &ExpectedResult,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let message = message.into();
        let judgement = Judgement {
            verdict: Verdict::Error,
            reason: Some(message.clone()),
        };
        let mut result = Self::blank(origin, expected, judgement, duration);
        result.message = Some(message);
        result
    }

    fn blank(
        origin: OperationOrigin,
        expected: &ExpectedResult,
        judgement: Judgement,
        duration: Duration,
    ) -> Self {
        Self {
            group: origin.group,
            phase: origin.phase,
            index: origin.index,
            phase_total: origin.phase_total,
            operation: origin.operation,
            credential: origin.credential,
            verdict: judgement.verdict,
            success: false,
            error_code: None,
            message: None,
            reason: judgement.reason,
            expected: expected.clone(),
            response: None,
            duration,
            attempts: 0,
            dry_run: false,
            timestamp: Utc::now(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Verdict counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Fraction of passed results, 0.0 when nothing ran
    pub success_rate: f64,
}

impl Summary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a OperationResult>) -> Self {
        let mut summary = Summary::default();
        for result in results {
            summary.total += 1;
            match result.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Fail => summary.failed += 1,
                Verdict::Error => summary.errors += 1,
            }
        }
        if summary.total > 0 {
            summary.success_rate = summary.passed as f64 / summary.total as f64;
        }
        summary
    }
}

/// Final accounting for one group
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub credential: String,
    pub state: GroupState,
    /// Phase the group stopped in, when it did not run every phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_in: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    /// Declared operations
    pub declared: usize,
    /// Declared operations never dispatched
    pub skipped: usize,
    pub summary: Summary,
}

impl GroupReport {
    /// Report for a group that never started
    pub fn pending(name: &str, credential: &str, declared: usize) -> Self {
        Self {
            name: name.to_string(),
            credential: credential.to_string(),
            state: GroupState::Pending,
            stopped_in: None,
            started_at: None,
            finished_at: None,
            duration: Duration::ZERO,
            declared,
            skipped: declared,
            summary: Summary::default(),
        }
    }
}

/// Timing statistics over all recorded operations
#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub count: usize,
    #[serde(serialize_with = "as_secs")]
    pub total: Duration,
    #[serde(serialize_with = "as_secs")]
    pub average: Duration,
    #[serde(serialize_with = "as_secs")]
    pub min: Duration,
    #[serde(serialize_with = "as_secs")]
    pub max: Duration,
    /// Percentiles, present with at least two samples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
    pub ops_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Percentiles {
    #[serde(serialize_with = "as_secs")]
    pub p50: Duration,
    #[serde(serialize_with = "as_secs")]
    pub p90: Duration,
    #[serde(serialize_with = "as_secs")]
    pub p95: Duration,
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    sorted[rank.round() as usize]
}

/// A finished run
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    pub dry_run: bool,
    /// A cancellation signal was observed during the run
    pub cancelled: bool,
    pub summary: Summary,
    pub groups: Vec<GroupReport>,
    pub results: Vec<OperationResult>,
}

impl Session {
    /// True when nothing failed, errored or was cancelled
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
            && self.summary.errors == 0
            && !self.cancelled
            && self.groups.iter().all(|g| g.state != GroupState::Failed)
    }

    /// Process exit status derived from the results
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Results that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    /// Results of one group
    pub fn results_for<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a OperationResult> {
        self.results.iter().filter(move |r| r.group == group)
    }

    pub fn timing(&self) -> Option<TimingStats> {
        let mut durations: Vec<Duration> = self.results.iter().map(|r| r.duration).collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort();

        let count = durations.len();
        let total: Duration = durations.iter().sum();
        let percentiles = (count >= 2).then(|| Percentiles {
            p50: percentile(&durations, 50.0),
            p90: percentile(&durations, 90.0),
            p95: percentile(&durations, 95.0),
        });
        let elapsed = self.duration.as_secs_f64();

        Some(TimingStats {
            count,
            total,
            average: total / count as u32,
            min: durations[0],
            max: durations[count - 1],
            percentiles,
            ops_per_sec: if elapsed > 0.0 {
                count as f64 / elapsed
            } else {
                0.0
            },
        })
    }
}

#[derive(Debug, Default)]
struct Recorded {
    results: Vec<OperationResult>,
    groups: Vec<GroupReport>,
}

/// Concurrent append-only collector for a running session
#[derive(Debug)]
pub struct SessionRecorder {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    dry_run: bool,
    recorded: Mutex<Recorded>,
}

impl SessionRecorder {
    pub fn new(dry_run: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            dry_run,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn poisoned() -> Error {
        Error::Engine("session recorder lock poisoned".to_string())
    }

    /// Append an operation result
    pub fn record(&self, result: OperationResult) -> Result<()> {
        let mut recorded = self.recorded.lock().map_err(|_| Self::poisoned())?;
        recorded.results.push(result);
        Ok(())
    }

    /// Append a group's final report
    pub fn record_group(&self, report: GroupReport) -> Result<()> {
        let mut recorded = self.recorded.lock().map_err(|_| Self::poisoned())?;
        if recorded.groups.iter().any(|g| g.name == report.name) {
            return Err(Error::Engine(format!(
                "group '{}' reported twice",
                report.name
            )));
        }
        recorded.groups.push(report);
        Ok(())
    }

    /// Freeze into a session, ordered by group declaration, phase and position
    pub fn finish(&self, group_order: &[String], cancelled: bool) -> Result<Session> {
        let Recorded {
            mut results,
            mut groups,
        } = {
            let mut recorded = self.recorded.lock().map_err(|_| Self::poisoned())?;
            std::mem::take(&mut *recorded)
        };

        let rank: HashMap<&str, usize> = group_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let position = |name: &str| rank.get(name).copied().unwrap_or(usize::MAX);

        results.sort_by_key(|r| (position(&r.group), r.phase, r.index));
        groups.sort_by_key(|g| position(&g.name));

        Ok(Session {
            id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration: self.started.elapsed(),
            dry_run: self.dry_run,
            cancelled,
            summary: Summary::from_results(&results),
            groups,
            results,
        })
    }
}
