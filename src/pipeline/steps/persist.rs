use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::pipeline::collaborators::{PersistBatch, RecordSink};
use crate::pipeline::context::RunContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};

/// Hands the canonical records and both routing queues to the record sink.
pub struct PersistRecordsStep {
    sink: Arc<dyn RecordSink>,
}

impl PersistRecordsStep {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Step for PersistRecordsStep {
    fn name(&self) -> &str {
        "persist_records"
    }

    fn description(&self) -> &str {
        "Persist canonical records and dispatch routing queues"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let batch = PersistBatch::from_context(ctx);

        let persisted = self.sink.persist(&batch).await.map_err(|e| {
            PipelineError::step(format!("Failed to persist records: {e}"))
                .in_step(&ctx.execution_id, self.name())
        })?;

        tracing::info!(
            execution_id = %ctx.execution_id,
            persisted,
            submission = batch.records_for_submission.len(),
            review = batch.records_for_review.len(),
            "Records persisted"
        );

        Ok(timer.success(json!({
            "persisted": persisted,
            "dispatched_submission": batch.records_for_submission.len(),
            "dispatched_review": batch.records_for_review.len(),
        })))
    }
}
