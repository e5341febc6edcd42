//! Hooks invoked by the engine around every step.

use super::context::RunContext;
use super::step::StepResult;

/// Receives step lifecycle events. All methods default to no-ops.
pub trait StepObserver: Send + Sync {
    fn step_started(&self, _ctx: &RunContext, _index: usize, _step_name: &str) {}

    fn step_retrying(&self, _ctx: &RunContext, _step_name: &str, _attempt: u32, _error: &str) {}

    fn step_finished(&self, _ctx: &RunContext, _index: usize, _result: &StepResult) {}

    /// A step whose `should_skip` returned true. No `step_started` precedes it.
    fn step_skipped(&self, _ctx: &RunContext, _index: usize, _result: &StepResult) {}
}

pub struct NoopObserver;

impl StepObserver for NoopObserver {}

/// Emits a `tracing` debug event per lifecycle hook.
pub struct TracingObserver;

impl StepObserver for TracingObserver {
    fn step_started(&self, ctx: &RunContext, index: usize, step_name: &str) {
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step = step_name,
            index,
            total = ctx.total_steps,
            "Step started"
        );
    }

    fn step_retrying(&self, ctx: &RunContext, step_name: &str, attempt: u32, error: &str) {
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step = step_name,
            attempt,
            error,
            "Step retrying"
        );
    }

    fn step_finished(&self, ctx: &RunContext, index: usize, result: &StepResult) {
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step = %result.step_name,
            index,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Step finished"
        );
    }

    fn step_skipped(&self, ctx: &RunContext, index: usize, result: &StepResult) {
        tracing::debug!(
            execution_id = %ctx.execution_id,
            step = %result.step_name,
            index,
            "Step skipped"
        );
    }
}
