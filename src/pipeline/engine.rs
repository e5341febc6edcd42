//! Pipeline engine: resolves a flow and runs its steps in order.
//!
//! Fail-fast: the first step that does not complete stops the run, its
//! rollback is attempted, and no later step executes. Retries happen only
//! inside a single step, with `2^attempt` backoff between attempts.
//! Every step the run reached gets a `cleanup` call once the run ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::context::{ContextSummary, ExtractedDataEntry, RunContext};
use super::insuree::InsureeConfig;
use super::observer::{NoopObserver, StepObserver};
use super::resolver::FlowResolver;
use super::step::{Step, StepResult, StepTimer};
use super::types::{FileDescriptor, RunStatus, StepStatus};

/// Final, immutable outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub execution_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub step_results: Vec<StepResult>,
    /// Absent only when the run failed before a step list existed.
    pub context_summary: Option<ContextSummary>,
    /// Per-role raw payloads, kept for the audit record.
    #[serde(default)]
    pub extracted_data: Vec<ExtractedDataEntry>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

pub struct PipelineEngine {
    resolver: FlowResolver,
    observer: Arc<dyn StepObserver>,
    backoff_unit: Duration,
}

impl PipelineEngine {
    pub fn new(resolver: FlowResolver) -> Self {
        Self {
            resolver,
            observer: Arc::new(NoopObserver),
            backoff_unit: Duration::from_secs(1),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Scale of the `2^attempt` backoff; one second unless overridden.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn resolver(&self) -> &FlowResolver {
        &self.resolver
    }

    /// Full execution: build a context, resolve the flow, run its steps.
    pub async fn run(
        &self,
        batch_id: &str,
        insuree_id: &str,
        config: InsureeConfig,
        files: Vec<FileDescriptor>,
    ) -> RunResult {
        let started_at = Utc::now();
        let mut ctx = RunContext::new(batch_id, insuree_id, config).with_files(files);

        tracing::info!(
            execution_id = %ctx.execution_id,
            batch_id,
            insuree_code = %ctx.insuree_code,
            total_files = ctx.files.len(),
            is_batch = ctx.is_batch(),
            "Pipeline started"
        );

        let steps = match self.resolver.resolve(&ctx.config) {
            Ok(steps) => steps,
            Err(e) => {
                tracing::error!(execution_id = %ctx.execution_id, error = %e, "Flow resolution failed");
                return RunResult {
                    execution_id: ctx.execution_id,
                    status: RunStatus::Failed,
                    started_at,
                    completed_at: Utc::now(),
                    total_duration_ms: 0,
                    steps_completed: 0,
                    total_steps: 0,
                    step_results: Vec::new(),
                    context_summary: None,
                    extracted_data: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut result = self.run_steps(&mut ctx, &steps).await;
        result.started_at = started_at;

        tracing::info!(
            execution_id = %result.execution_id,
            status = %result.status,
            steps_completed = result.steps_completed,
            total_steps = result.total_steps,
            duration_ms = result.total_duration_ms,
            "Pipeline finished"
        );

        result
    }

    /// Run a pre-built step list against a caller-supplied context.
    pub async fn run_steps(&self, ctx: &mut RunContext, steps: &[Box<dyn Step>]) -> RunResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        ctx.total_steps = steps.len();

        let mut status = RunStatus::Running;
        let mut steps_completed = 0;
        let mut run_error = None;
        let mut reached = 0;

        for (index, step) in steps.iter().enumerate() {
            let step_name = step.name().to_string();
            reached = index + 1;

            match step.should_skip(ctx).await {
                Ok(true) => {
                    tracing::info!(execution_id = %ctx.execution_id, step = %step_name, "Step skipped");
                    let skipped = StepTimer::start(&step_name, step.description()).skipped();
                    self.observer.step_skipped(ctx, index, &skipped);
                    ctx.step_results.push(skipped);
                    steps_completed += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        step = %step_name,
                        error = %e,
                        "should_skip failed, running step anyway"
                    );
                }
            }

            tracing::info!(
                execution_id = %ctx.execution_id,
                step = %step_name,
                "Step {}/{}: {}",
                index + 1,
                steps.len(),
                step.description()
            );
            self.observer.step_started(ctx, index, &step_name);

            let result = self.execute_with_retry(step.as_ref(), ctx).await;
            self.observer.step_finished(ctx, index, &result);
            let completed = result.status == StepStatus::Completed;
            let error = result.error.clone();
            ctx.step_results.push(result);

            if completed {
                steps_completed += 1;
                continue;
            }

            let message = format!(
                "Step '{}' failed: {}",
                step_name,
                error.as_deref().unwrap_or("unknown error")
            );
            tracing::error!(execution_id = %ctx.execution_id, step = %step_name, error = ?error, "Step failed, pipeline stopping");
            ctx.add_error(message.clone());
            run_error = Some(message);
            status = RunStatus::Failed;

            match step.rollback(ctx).await {
                Ok(()) => tracing::info!(execution_id = %ctx.execution_id, step = %step_name, "Rollback completed"),
                Err(e) => tracing::warn!(execution_id = %ctx.execution_id, step = %step_name, error = %e, "Rollback failed"),
            }
            break;
        }

        if status != RunStatus::Failed {
            status = RunStatus::Completed;
        }

        for step in steps[..reached].iter().rev() {
            if let Err(e) = step.cleanup(ctx).await {
                tracing::warn!(execution_id = %ctx.execution_id, step = step.name(), error = %e, "Cleanup failed");
            }
        }

        RunResult {
            execution_id: ctx.execution_id.clone(),
            status,
            started_at,
            completed_at: Utc::now(),
            total_duration_ms: clock.elapsed().as_millis() as u64,
            steps_completed,
            total_steps: steps.len(),
            step_results: ctx.step_results.clone(),
            context_summary: Some(ctx.summary()),
            extracted_data: ctx.extracted_entries(),
            error: run_error,
        }
    }

    async fn execute_with_retry(&self, step: &dyn Step, ctx: &mut RunContext) -> StepResult {
        let max_attempts = if step.retryable() { step.max_retries().max(1) } else { 1 };
        let mut attempt = 1;

        loop {
            let timer = StepTimer::start(step.name(), step.description());
            match step.execute(ctx).await {
                Ok(mut result) => {
                    result.attempts = attempt;
                    return result;
                }
                Err(e) if e.is_unexpected() => {
                    tracing::error!(
                        execution_id = %ctx.execution_id,
                        step = step.name(),
                        error = %e,
                        "Unexpected error in step"
                    );
                    return timer.failure(
                        format!("Unexpected: {e}"),
                        json!({ "attempts": attempt, "error_kind": e.kind(), "debug": format!("{e:?}") }),
                        attempt,
                    );
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let wait = self.backoff_unit * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        execution_id = %ctx.execution_id,
                        step = step.name(),
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Step failed, retrying"
                    );
                    self.observer.step_retrying(ctx, step.name(), attempt, &e.to_string());
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    let e = e.in_step(&ctx.execution_id, step.name());
                    let details = e.context().map(|c| c.details.clone()).unwrap_or_default();
                    return timer.failure(
                        e.to_string(),
                        json!({ "attempts": attempt, "error_kind": e.kind(), "details": details }),
                        attempt,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::PipelineError;
    use crate::pipeline::resolver::FlowBuilder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StepObserver for EventLog {
        fn step_started(&self, _ctx: &RunContext, index: usize, step_name: &str) {
            self.push(format!("started {index} {step_name}"));
        }

        fn step_finished(&self, _ctx: &RunContext, index: usize, result: &StepResult) {
            self.push(format!("finished {index} {}", result.step_name));
        }

        fn step_skipped(&self, _ctx: &RunContext, index: usize, result: &StepResult) {
            self.push(format!("skipped {index} {}", result.step_name));
        }
    }

    /// Test step with a scripted outcome and an execution counter.
    struct ScriptedStep {
        name: &'static str,
        outcome: Outcome,
        retryable: bool,
        calls: Arc<AtomicU32>,
        rollbacks: Arc<AtomicU32>,
        cleanups: Arc<AtomicU32>,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        StepError,
        Unexpected,
        SkipMe,
        SkipCheckFails,
        RollbackFails,
    }

    impl ScriptedStep {
        fn new(name: &'static str, outcome: Outcome) -> Self {
            Self {
                name,
                outcome,
                retryable: false,
                calls: Arc::new(AtomicU32::new(0)),
                rollbacks: Arc::new(AtomicU32::new(0)),
                cleanups: Arc::new(AtomicU32::new(0)),
            }
        }

        fn retryable(mut self) -> Self {
            self.retryable = true;
            self
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "scripted"
        }

        fn retryable(&self) -> bool {
            self.retryable
        }

        async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::StepError | Outcome::RollbackFails => Err(PipelineError::step("always fails")),
                Outcome::Unexpected => Err(PipelineError::Internal("index out of range".into())),
                _ => {
                    ctx.set_scratch(self.name, json!(true));
                    Ok(StepTimer::start(self.name, "scripted").success(json!({})))
                }
            }
        }

        async fn should_skip(&self, _ctx: &RunContext) -> Result<bool, PipelineError> {
            match self.outcome {
                Outcome::SkipMe => Ok(true),
                Outcome::SkipCheckFails => Err(PipelineError::Internal("skip check broke".into())),
                _ => Ok(false),
            }
        }

        async fn rollback(&self, _ctx: &mut RunContext) -> Result<(), PipelineError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::RollbackFails => Err(PipelineError::storage("cannot delete")),
                _ => Ok(()),
            }
        }

        async fn cleanup(&self, _ctx: &mut RunContext) -> Result<(), PipelineError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::RollbackFails => Err(PipelineError::storage("cannot delete")),
                _ => Ok(()),
            }
        }
    }

    fn engine() -> PipelineEngine {
        PipelineEngine::new(FlowResolver::new())
    }

    fn ctx() -> RunContext {
        RunContext::new("batch-1", "ins-1", InsureeConfig::new("TEST", "Test"))
    }

    #[tokio::test]
    async fn all_steps_complete() {
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(ScriptedStep::new("a", Outcome::Ok)),
            Box::new(ScriptedStep::new("b", Outcome::Ok)),
        ];
        let mut ctx = ctx();
        let result = engine().run_steps(&mut ctx, &steps).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.steps_completed, 2);
        assert_eq!(result.total_steps, 2);
        assert!(result.error.is_none());
        assert_eq!(result.context_summary.unwrap().steps_completed, 2);
    }

    #[tokio::test]
    async fn fail_fast_stops_after_failing_step() {
        let third = ScriptedStep::new("c", Outcome::Ok);
        let third_calls = third.calls.clone();
        let second = ScriptedStep::new("b", Outcome::StepError);
        let rollbacks = second.rollbacks.clone();
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(ScriptedStep::new("a", Outcome::Ok)),
            Box::new(second),
            Box::new(third),
        ];
        let mut ctx = ctx();
        let result = engine().run_steps(&mut ctx, &steps).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.step_results[0].status, StepStatus::Completed);
        assert_eq!(result.step_results[1].status, StepStatus::Failed);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(result.steps_completed, 1);
        assert_eq!(result.error.as_deref(), Some("Step 'b' failed: always fails"));
        assert_eq!(ctx.errors, vec!["Step 'b' failed: always fails".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_counts_attempts() {
        let step = ScriptedStep::new("flaky", Outcome::StepError).retryable();
        let calls = step.calls.clone();
        let steps: Vec<Box<dyn Step>> = vec![Box::new(step)];
        let mut ctx = ctx();

        let started = tokio::time::Instant::now();
        let result = engine().run_steps(&mut ctx, &steps).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let failed = &result.step_results[0];
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.metadata["attempts"], 3);
        assert_eq!(failed.attempts, 3);
        // 2s after attempt 1, 4s after attempt 2.
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn unexpected_error_is_not_retried() {
        let step = ScriptedStep::new("boom", Outcome::Unexpected).retryable();
        let calls = step.calls.clone();
        let steps: Vec<Box<dyn Step>> = vec![Box::new(step)];
        let mut ctx = ctx();
        let result = engine().run_steps(&mut ctx, &steps).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let failed = &result.step_results[0];
        assert!(failed.error.as_deref().unwrap().starts_with("Unexpected: "));
        assert_eq!(failed.metadata["error_kind"], "Internal");
    }

    #[tokio::test]
    async fn non_retryable_step_runs_once() {
        let step = ScriptedStep::new("once", Outcome::StepError);
        let calls = step.calls.clone();
        let steps: Vec<Box<dyn Step>> = vec![Box::new(step)];
        let result = engine().run_steps(&mut ctx(), &steps).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.step_results[0].metadata["attempts"], 1);
    }

    #[tokio::test]
    async fn skipped_step_counts_as_completed() {
        let skipped = ScriptedStep::new("skip", Outcome::SkipMe);
        let calls = skipped.calls.clone();
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(skipped),
            Box::new(ScriptedStep::new("after", Outcome::Ok)),
        ];
        let result = engine().run_steps(&mut ctx(), &steps).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.step_results[0].status, StepStatus::Skipped);
        assert_eq!(result.steps_completed, 2);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn observer_sees_skips_separately_from_runs() {
        let log = Arc::new(EventLog::default());
        let engine = engine().with_observer(log.clone());
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(ScriptedStep::new("skip", Outcome::SkipMe)),
            Box::new(ScriptedStep::new("after", Outcome::Ok)),
        ];
        engine.run_steps(&mut ctx(), &steps).await;

        assert_eq!(log.events(), vec!["skipped 0 skip", "started 1 after", "finished 1 after"]);
    }

    #[tokio::test]
    async fn cleanup_runs_for_reached_steps_only() {
        let first = ScriptedStep::new("first", Outcome::Ok);
        let bad = ScriptedStep::new("bad", Outcome::RollbackFails);
        let never = ScriptedStep::new("never", Outcome::Ok);
        let counters = [first.cleanups.clone(), bad.cleanups.clone(), never.cleanups.clone()];
        let steps: Vec<Box<dyn Step>> = vec![Box::new(first), Box::new(bad), Box::new(never)];

        let result = engine().run_steps(&mut ctx(), &steps).await;

        assert_eq!(result.status, RunStatus::Failed);
        let counts: Vec<u32> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn should_skip_error_fails_open() {
        let step = ScriptedStep::new("runs", Outcome::SkipCheckFails);
        let calls = step.calls.clone();
        let steps: Vec<Box<dyn Step>> = vec![Box::new(step)];
        let result = engine().run_steps(&mut ctx(), &steps).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn rollback_failure_is_swallowed() {
        let steps: Vec<Box<dyn Step>> =
            vec![Box::new(ScriptedStep::new("bad", Outcome::RollbackFails))];
        let result = engine().run_steps(&mut ctx(), &steps).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.step_results.len(), 1);
    }

    #[tokio::test]
    async fn run_fails_without_matching_flow() {
        let result = engine()
            .run("batch-1", "ins-1", InsureeConfig::new("NOPE", "Nope"), Vec::new())
            .await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.step_results.is_empty());
        assert!(result.context_summary.is_none());
        assert!(result.error.unwrap().starts_with("Flow resolution failed"));
    }

    #[tokio::test]
    async fn run_resolves_and_executes() {
        let mut resolver = FlowResolver::new();
        let builder: FlowBuilder = Arc::new(|| {
            vec![Box::new(ScriptedStep::new("only", Outcome::Ok)) as Box<dyn Step>]
        });
        resolver.register_flow("DEFAULT", builder);
        let engine = PipelineEngine::new(resolver);

        let result = engine
            .run(
                "batch-9",
                "ins-1",
                InsureeConfig::new("ANY", "Any"),
                vec![FileDescriptor::new("f1", "a.csv", "primary")],
            )
            .await;

        assert!(result.is_completed());
        let summary = result.context_summary.unwrap();
        assert_eq!(summary.batch_id, "batch-9");
        assert_eq!(summary.total_files, 1);
    }
}
