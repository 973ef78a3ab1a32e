//! Test execution engine
//!
//! Runs each selected group through its before, test and after phases:
//!
//! - before: fail-fast; the first `fail`/`error` stops the group (`Failed`),
//!   skipping the test and after phases
//! - test, after: best-effort; every operation is attempted
//!
//! Groups run one at a time in declaration order, or concurrently. Within a
//! phase, operations are dispatched by a bounded worker pool. Phases of one
//! group never overlap.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::common::config::Settings;
use crate::common::{Error, Result};
use crate::operations::{DispatchRequest, Dispatcher};

use super::config::{Phase, TestGroup, TestPlan};
use super::credentials::CredentialResolver;
use super::events::{Event, EventSink};
use super::params::ParameterResolver;
use super::retry::{RetryGovernor, RetryPolicy};
use super::session::{
    GroupReport, OperationOrigin, OperationResult, Session, SessionRecorder, Summary,
};
use super::state::{GroupLifecycle, GroupState};
use super::validate::check as check_plan;
use super::validator::{validate, Verdict};

/// Inter-group execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// Per-invocation options; unset fields fall back to the plan, then settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip all remote calls
    pub dry_run: bool,
    /// Run only these groups (all when empty)
    pub groups: Vec<String>,
    pub mode: Option<ExecutionMode>,
    /// Per-attempt dispatch timeout
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Intra-phase worker pool size
    pub workers: Option<usize>,
}

/// Drives a validated plan against a dispatcher
pub struct Engine {
    plan: Arc<TestPlan>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: Settings,
    credentials: Arc<CredentialResolver>,
    events: Option<Arc<dyn EventSink>>,
    cancel: CancellationToken,
}

/// Shared, read-only state for one run
struct RunContext {
    plan: Arc<TestPlan>,
    dispatcher: Arc<dyn Dispatcher>,
    credentials: Arc<CredentialResolver>,
    params: ParameterResolver,
    governor: RetryGovernor,
    recorder: SessionRecorder,
    events: Option<Arc<dyn EventSink>>,
    cancel: CancellationToken,
    dry_run: bool,
    workers: usize,
}

impl RunContext {
    fn emit(&self, event: Event) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }
}

/// What a phase produced
#[derive(Debug, Default)]
struct PhaseOutcome {
    summary: Summary,
    attempted: usize,
    /// A fail-fast phase stopped on a failed operation
    failed: bool,
    /// Scheduling stopped on cancellation
    interrupted: bool,
}

impl Engine {
    /// Create an engine; the plan is validated against the dispatcher first
    pub fn new(plan: TestPlan, dispatcher: Arc<dyn Dispatcher>, settings: Settings) -> Result<Self> {
        check_plan(&plan, dispatcher.as_ref(), false)?;
        let credentials = Arc::new(CredentialResolver::new(&plan.config));

        Ok(Self {
            plan: Arc::new(plan),
            dispatcher,
            settings,
            credentials,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Report progress to a sink
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Token that stops scheduling new work when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    fn select_groups(&self, names: &[String]) -> Result<Vec<usize>> {
        let groups = &self.plan.test_cases.groups;
        if names.is_empty() {
            return Ok((0..groups.len()).collect());
        }

        for name in names {
            if self.plan.group(name).is_none() {
                return Err(Error::UnknownGroup(name.clone()));
            }
        }
        // Keep declaration order regardless of the filter's order
        Ok(groups
            .iter()
            .enumerate()
            .filter(|(_, g)| names.contains(&g.name))
            .map(|(i, _)| i)
            .collect())
    }

    /// Execute the plan
    ///
    /// Only configuration problems and engine invariant violations are
    /// errors; operation failures are recorded in the returned session.
    pub async fn run(&self, options: RunOptions) -> Result<Session> {
        let selected = self.select_groups(&options.groups)?;

        let mode = options.mode.unwrap_or(if self.plan.test_cases.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        });
        let workers = options
            .workers
            .or(self.plan.test_cases.workers)
            .unwrap_or(self.settings.execution.workers)
            .max(1);

        let mut policy = RetryPolicy::from_settings(&self.settings.retry);
        if let Some(max_retries) = options.max_retries {
            policy.max_retries = max_retries;
        }
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.settings.operation_timeout());

        let ctx = Arc::new(RunContext {
            plan: Arc::clone(&self.plan),
            dispatcher: Arc::clone(&self.dispatcher),
            credentials: Arc::clone(&self.credentials),
            params: ParameterResolver::new(&self.plan.base_dir),
            governor: RetryGovernor::new(policy, timeout),
            recorder: SessionRecorder::new(options.dry_run),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            dry_run: options.dry_run,
            workers,
        });

        let names: Vec<String> = selected
            .iter()
            .map(|&i| self.plan.test_cases.groups[i].name.clone())
            .collect();
        let operations: usize = selected
            .iter()
            .map(|&i| self.plan.test_cases.groups[i].operation_count())
            .sum();

        tracing::info!(
            session = %ctx.recorder.id(),
            groups = names.len(),
            operations,
            ?mode,
            workers,
            dry_run = options.dry_run,
            "Starting test session"
        );
        ctx.emit(Event::SessionStarted {
            id: ctx.recorder.id(),
            groups: names.clone(),
            operations,
        });

        match mode {
            ExecutionMode::Sequential => {
                for &index in &selected {
                    run_group(&ctx, index).await?;
                }
            }
            ExecutionMode::Parallel => {
                let runs = selected.iter().map(|&index| run_group(&ctx, index));
                for outcome in join_all(runs).await {
                    outcome?;
                }
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let session = ctx.recorder.finish(&names, cancelled)?;

        tracing::info!(
            session = %session.id,
            passed = session.summary.passed,
            failed = session.summary.failed,
            errors = session.summary.errors,
            cancelled,
            "Test session finished"
        );
        ctx.emit(Event::SessionFinished {
            summary: session.summary,
            cancelled,
        });

        Ok(session)
    }
}

async fn run_group(ctx: &Arc<RunContext>, index: usize) -> Result<()> {
    let group = &ctx.plan.test_cases.groups[index];
    let declared = group.operation_count();

    if ctx.cancel.is_cancelled() {
        tracing::info!(group = %group.name, "Cancelled before start");
        ctx.emit(Event::GroupCompleted {
            group: group.name.clone(),
            state: GroupState::Pending,
            skipped: declared,
        });
        return ctx
            .recorder
            .record_group(GroupReport::pending(&group.name, &group.credential, declared));
    }

    let started_at = Utc::now();
    let started = Instant::now();
    let mut lifecycle = GroupLifecycle::new(&group.name);
    let mut phases: Vec<PhaseOutcome> = Vec::with_capacity(3);
    let mut stopped_in = None;

    tracing::info!(group = %group.name, credential = %group.credential, "Starting group");
    ctx.emit(Event::GroupStarted {
        group: group.name.clone(),
    });

    lifecycle.advance(GroupState::RunningBefore)?;
    let before = run_phase(ctx, index, Phase::Before, &ctx.cancel).await?;
    let before_failed = before.failed;
    let before_interrupted = before.interrupted;
    phases.push(before);

    if before_failed {
        tracing::warn!(group = %group.name, "Setup failed, skipping test and teardown");
        lifecycle.advance(GroupState::Failed)?;
        stopped_in = Some(Phase::Before);
    } else {
        lifecycle.advance(GroupState::RunningTest)?;
        if before_interrupted {
            stopped_in = Some(Phase::Before);
        } else {
            let test = run_phase(ctx, index, Phase::Test, &ctx.cancel).await?;
            if test.interrupted {
                stopped_in = Some(Phase::Test);
            }
            phases.push(test);
        }

        // Teardown ignores cancellation so remote resources are not leaked
        lifecycle.advance(GroupState::RunningAfter)?;
        let detached = CancellationToken::new();
        phases.push(run_phase(ctx, index, Phase::After, &detached).await?);
        lifecycle.advance(GroupState::Completed)?;
    }

    let attempted: usize = phases.iter().map(|p| p.attempted).sum();
    let summary = phases.iter().fold(Summary::default(), |acc, p| merge(acc, p.summary));
    let state = lifecycle.state();

    tracing::info!(
        group = %group.name,
        %state,
        passed = summary.passed,
        failed = summary.failed,
        errors = summary.errors,
        "Group finished"
    );
    ctx.emit(Event::GroupCompleted {
        group: group.name.clone(),
        state,
        skipped: declared - attempted,
    });

    ctx.recorder.record_group(GroupReport {
        name: group.name.clone(),
        credential: group.credential.clone(),
        state,
        stopped_in,
        started_at: Some(started_at),
        finished_at: Some(Utc::now()),
        duration: started.elapsed(),
        declared,
        skipped: declared - attempted,
        summary,
    })
}

fn merge(a: Summary, b: Summary) -> Summary {
    let mut total = Summary {
        total: a.total + b.total,
        passed: a.passed + b.passed,
        failed: a.failed + b.failed,
        errors: a.errors + b.errors,
        success_rate: 0.0,
    };
    if total.total > 0 {
        total.success_rate = total.passed as f64 / total.total as f64;
    }
    total
}

/// Run one phase through the worker pool
///
/// Scheduling stops when `cancel` fires or, in the before phase, after the
/// first operation that does not pass. Operations already in flight are
/// always awaited and recorded.
async fn run_phase(
    ctx: &Arc<RunContext>,
    group_index: usize,
    phase: Phase,
    cancel: &CancellationToken,
) -> Result<PhaseOutcome> {
    let group = &ctx.plan.test_cases.groups[group_index];
    let total = group.phase(phase).len();
    let fail_fast = phase == Phase::Before;

    let mut outcome = PhaseOutcome::default();
    if total == 0 {
        return Ok(outcome);
    }
    tracing::debug!(group = %group.name, %phase, operations = total, "Starting phase");

    let mut tasks = JoinSet::new();
    let mut next = 0;
    let mut halted = false;
    let mut results = Vec::with_capacity(total);

    loop {
        while !halted && next < total && tasks.len() < ctx.workers {
            if cancel.is_cancelled() {
                tracing::info!(group = %group.name, %phase, "Cancelled, not scheduling further operations");
                outcome.interrupted = true;
                halted = true;
                break;
            }
            let task_ctx = Arc::clone(ctx);
            let op_index = next;
            tasks.spawn(async move { execute(&task_ctx, group_index, phase, op_index).await });
            next += 1;
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let result = joined.map_err(|e| Error::Engine(format!("operation task failed: {e}")))?;

        outcome.attempted += 1;
        if fail_fast && !result.passed() {
            tracing::warn!(
                group = %group.name,
                operation = %result.operation,
                verdict = %result.verdict,
                "Setup operation failed"
            );
            outcome.failed = true;
            halted = true;
        }

        ctx.recorder.record(result.clone())?;
        ctx.emit(Event::OperationCompleted(Box::new(result.clone())));
        results.push(result);
    }

    outcome.summary = Summary::from_results(&results);
    Ok(outcome)
}

/// Dispatch and judge a single operation; never fails
async fn execute(ctx: &RunContext, group_index: usize, phase: Phase, op_index: usize) -> OperationResult {
    let group: &TestGroup = &ctx.plan.test_cases.groups[group_index];
    let ops = group.phase(phase);
    let spec = &ops[op_index];
    let started = Instant::now();

    let mut origin = OperationOrigin {
        group: group.name.clone(),
        phase,
        index: op_index + 1,
        phase_total: ops.len(),
        operation: spec.operation.clone(),
        credential: spec
            .credential
            .clone()
            .unwrap_or_else(|| group.credential.clone()),
    };

    let connection = match ctx
        .credentials
        .for_operation(&group.credential, spec.credential.as_deref())
    {
        Ok(connection) => connection,
        Err(e) => {
            return OperationResult::errored(origin, &spec.expected_result, e.to_string(), started.elapsed())
        }
    };
    origin.credential = connection.credential.clone();

    let params = ctx.params.resolve(&spec.parameters);
    let request = DispatchRequest {
        operation: &spec.operation,
        params: &params,
        connection: &connection,
        dry_run: ctx.dry_run,
    };

    let dispatched = AssertUnwindSafe(ctx.governor.dispatch(
        ctx.dispatcher.as_ref(),
        request,
        &ctx.cancel,
    ))
    .catch_unwind()
    .await;

    let result = match dispatched {
        Ok(attempted) => {
            let judgement = validate(&spec.expected_result, &attempted.result);
            OperationResult::new(origin, &spec.expected_result, attempted, judgement, started.elapsed())
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "operation panicked".to_string());
            OperationResult::errored(origin, &spec.expected_result, message, started.elapsed())
        }
    };

    match result.verdict {
        Verdict::Pass => tracing::debug!(
            group = %result.group,
            %phase,
            operation = %result.operation,
            attempts = result.attempts,
            "Operation passed"
        ),
        verdict => tracing::info!(
            group = %result.group,
            %phase,
            operation = %result.operation,
            %verdict,
            reason = result.reason.as_deref().unwrap_or_default(),
            "Operation did not pass"
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{Call, DispatchError, Operation, OperationRegistry, Outcome, Response, ServiceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        outcome: std::result::Result<(), &'static str>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Ok(()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str, code: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Err(code),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Operation for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn call(&self, _call: &Call<'_>) -> std::result::Result<Outcome, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.outcome {
                Ok(()) => Ok(Response::new()),
                Err(code) => Err(ServiceError::new(code, "scripted")),
            })
        }
    }

    struct Panics;

    #[async_trait]
    impl Operation for Panics {
        fn name(&self) -> &'static str {
            "Explode"
        }

        async fn call(&self, _call: &Call<'_>) -> std::result::Result<Outcome, DispatchError> {
            panic!("handler bug");
        }
    }

    fn plan(yaml: &str) -> TestPlan {
        let mut plan: TestPlan = serde_yaml::from_str(yaml).unwrap();
        plan.base_dir = std::env::temp_dir();
        plan
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.retry.base_delay_ms = 1;
        settings.retry.max_delay_ms = 2;
        settings
    }

    const PLAN: &str = r#"
config:
  endpoint_url: http://localhost:9000
  credentials:
    - name: admin
      access_key: a
      secret_key: s
test_cases:
  groups:
    - name: g
      credential: admin
      before_test:
        - operation: Setup
      test:
        - operation: Work
        - operation: Explode
      after_test:
        - operation: Teardown
"#;

    #[tokio::test]
    async fn test_panicking_operation_is_recorded_as_error() {
        let work = Fixed::ok("Work");
        let teardown = Fixed::ok("Teardown");
        let registry = OperationRegistry::new()
            .with(Fixed::ok("Setup"))
            .with(work.clone())
            .with(Arc::new(Panics))
            .with(teardown.clone());

        let engine = Engine::new(plan(PLAN), Arc::new(registry), settings()).unwrap();
        let session = engine.run(RunOptions::default()).await.unwrap();

        assert_eq!(session.summary.passed, 3);
        assert_eq!(session.summary.errors, 1);
        assert_eq!(work.calls(), 1);
        assert_eq!(teardown.calls(), 1);
        assert_eq!(session.group("g").unwrap().state, GroupState::Completed);

        let crashed = session.results.iter().find(|r| r.operation == "Explode").unwrap();
        assert_eq!(crashed.verdict, Verdict::Error);
        assert!(crashed.message.as_deref().unwrap().contains("handler bug"));
    }

    #[tokio::test]
    async fn test_failed_setup_skips_remaining_phases() {
        let work = Fixed::ok("Work");
        let teardown = Fixed::ok("Teardown");
        let registry = OperationRegistry::new()
            .with(Fixed::failing("Setup", "AccessDenied"))
            .with(work.clone())
            .with(Arc::new(Panics))
            .with(teardown.clone());

        let engine = Engine::new(plan(PLAN), Arc::new(registry), settings()).unwrap();
        let session = engine.run(RunOptions::default()).await.unwrap();

        let report = session.group("g").unwrap();
        assert_eq!(report.state, GroupState::Failed);
        assert_eq!(report.stopped_in, Some(Phase::Before));
        assert_eq!(report.skipped, 3);
        assert_eq!(work.calls(), 0);
        assert_eq!(teardown.calls(), 0);
        assert_eq!(session.summary.failed, 1);
        assert_eq!(session.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_run_leaves_groups_pending() {
        let setup = Fixed::ok("Setup");
        let registry = OperationRegistry::new()
            .with(setup.clone())
            .with(Fixed::ok("Work"))
            .with(Arc::new(Panics))
            .with(Fixed::ok("Teardown"));

        let engine = Engine::new(plan(PLAN), Arc::new(registry), settings()).unwrap();
        engine.cancellation_token().cancel();
        let session = engine.run(RunOptions::default()).await.unwrap();

        assert!(session.cancelled);
        assert_eq!(session.group("g").unwrap().state, GroupState::Pending);
        assert_eq!(session.summary.total, 0);
        assert_eq!(setup.calls(), 0);
        assert_ne!(session.exit_code(), 0);
    }

    #[test]
    fn test_unknown_operation_rejected_at_construction() {
        let registry = OperationRegistry::new().with(Fixed::ok("Setup"));
        let err = Engine::new(plan(PLAN), Arc::new(registry), settings())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPlan(_)));
    }
}
