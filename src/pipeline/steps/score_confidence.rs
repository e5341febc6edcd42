use async_trait::async_trait;
use serde_json::json;

use crate::pipeline::context::{CanonicalRecord, RunContext, ValidationResult};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};

/// Splits records into auto-submit and human-review queues.
///
/// Errors and duplicate flags always send a record to review, whatever its
/// confidence. Queue entries are `"{execution_id}:{index}"`.
pub struct ScoreConfidenceStep;

/// True when the record may be submitted without review.
pub fn auto_submittable(record: &CanonicalRecord, result: Option<&ValidationResult>, min_confidence: f64) -> bool {
    let blocked = result.is_some_and(|r| r.has_blocking_errors() || r.has_duplicates());
    !blocked && record.confidence() >= min_confidence
}

#[async_trait]
impl Step for ScoreConfidenceStep {
    fn name(&self) -> &str {
        "score_confidence"
    }

    fn description(&self) -> &str {
        "Score confidence and route to auto-submit or human review"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let min_confidence = ctx.config.min_confidence();

        let mut submission = Vec::new();
        let mut review = Vec::new();
        for (idx, record) in ctx.canonical_records.iter().enumerate() {
            let id = format!("{}:{}", ctx.execution_id, idx);
            if auto_submittable(record, ctx.validation_results.get(idx), min_confidence) {
                submission.push(id);
            } else {
                review.push(id);
            }
        }

        ctx.records_for_submission = submission;
        ctx.records_for_review = review;

        tracing::info!(
            total = ctx.canonical_records.len(),
            auto_submit = ctx.records_for_submission.len(),
            human_review = ctx.records_for_review.len(),
            min_confidence,
            "Confidence routing complete"
        );

        Ok(timer.success(json!({
            "total": ctx.canonical_records.len(),
            "auto_submit": ctx.records_for_submission.len(),
            "human_review": ctx.records_for_review.len(),
            "min_confidence": min_confidence,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::insuree::InsureeConfig;
    use crate::pipeline::types::DuplicateFlag;

    fn record(confidence: f64) -> CanonicalRecord {
        CanonicalRecord(json!({"_confidence": confidence}).as_object().cloned().unwrap())
    }

    #[test]
    fn low_confidence_goes_to_review() {
        assert!(!auto_submittable(&record(0.79), Some(&ValidationResult::default()), 0.80));
        assert!(auto_submittable(&record(0.80), Some(&ValidationResult::default()), 0.80));
    }

    #[test]
    fn errors_dominate_confidence() {
        let failed = ValidationResult { schema_errors: vec!["Missing required field: member".into()], ..Default::default() };
        assert!(!auto_submittable(&record(0.95), Some(&failed), 0.80));

        let mut dup = ValidationResult::default();
        dup.flag(DuplicateFlag::PossibleDuplicate);
        assert!(!auto_submittable(&record(0.99), Some(&dup), 0.80));
    }

    #[tokio::test]
    async fn queues_use_execution_scoped_ids() {
        let mut config = InsureeConfig::new("X", "X");
        config.min_confidence = Some(0.9);
        let mut ctx = RunContext::new("b", "i", config);
        ctx.canonical_records = vec![record(0.95), record(0.5), record(1.0)];
        ctx.validation_results = vec![ValidationResult::default(); 3];
        ctx.validation_results[2].business_errors.push("too old".into());

        let result = ScoreConfidenceStep.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.records_for_submission, vec![format!("{}:0", ctx.execution_id)]);
        assert_eq!(
            ctx.records_for_review,
            vec![format!("{}:1", ctx.execution_id), format!("{}:2", ctx.execution_id)]
        );
        assert_eq!(result.metadata["human_review"], 2);
    }
}
