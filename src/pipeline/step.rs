//! Step contract: the polymorphic unit of work every flow is built from.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::RunContext;
use super::error::PipelineError;
use super::types::StepStatus;

/// One unit of pipeline work.
///
/// `execute` signals failure by returning an error, never by returning a
/// failed result; the engine turns errors into FAILED results after retries.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the engine may re-attempt after a step-execution error.
    fn retryable(&self) -> bool {
        false
    }

    /// Attempt budget when retryable.
    fn max_retries(&self) -> u32 {
        3
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError>;

    /// Checked before execution; an error here means "do not skip".
    async fn should_skip(&self, _ctx: &RunContext) -> Result<bool, PipelineError> {
        Ok(false)
    }

    /// Undo side effects after the step has ultimately failed.
    async fn rollback(&self, _ctx: &mut RunContext) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Release per-run resources once the run has ended, whatever its status.
    /// Called for every step the run reached, in reverse order.
    async fn cleanup(&self, _ctx: &mut RunContext) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Outcome of one step. Immutable once appended to the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    /// Execution attempts consumed; 0 for skipped steps.
    pub attempts: u32,
}

impl StepResult {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Captures start time and builds the step's result.
pub struct StepTimer {
    step_name: String,
    description: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StepTimer {
    pub fn start(step_name: &str, description: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            description: description.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn success(self, metadata: Value) -> StepResult {
        self.finish(StepStatus::Completed, None, metadata, 1)
    }

    pub fn failure(self, error: impl Into<String>, metadata: Value, attempts: u32) -> StepResult {
        self.finish(StepStatus::Failed, Some(error.into()), metadata, attempts)
    }

    pub fn skipped(self) -> StepResult {
        self.finish(StepStatus::Skipped, None, Value::Null, 0)
    }

    fn finish(
        self,
        status: StepStatus,
        error: Option<String>,
        metadata: Value,
        attempts: u32,
    ) -> StepResult {
        StepResult {
            step_name: self.step_name,
            description: self.description,
            status,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            error,
            metadata: into_metadata(metadata),
            attempts,
        }
    }
}

fn into_metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}
