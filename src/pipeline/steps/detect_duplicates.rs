use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::pipeline::collaborators::SubmissionLookup;
use crate::pipeline::context::{value_text, CanonicalRecord, RunContext, ValidationResult};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::DuplicateFlag;

/// How far back prior submissions count as possible duplicates.
pub const CROSS_BATCH_WINDOW_DAYS: u32 = 30;

/// Dedup fingerprint: insuree, member id, action, effective date, lowercased name.
pub fn composite_key(insuree_id: &str, record: &CanonicalRecord) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        insuree_id,
        record.member_text("employee_id"),
        record.endorsement_type().unwrap_or_default(),
        record.effective_date().map(value_text).unwrap_or_default(),
        record.member_text("name").trim().to_lowercase(),
    )
}

/// Flags every member of a colliding key group within the batch, and any
/// key seen in a recent prior submission. Never fails.
pub struct DetectDuplicatesStep {
    submissions: Arc<dyn SubmissionLookup>,
}

impl DetectDuplicatesStep {
    pub fn new(submissions: Arc<dyn SubmissionLookup>) -> Self {
        Self { submissions }
    }
}

#[async_trait]
impl Step for DetectDuplicatesStep {
    fn name(&self) -> &str {
        "detect_duplicates"
    }

    fn description(&self) -> &str {
        "Detect duplicate endorsements within file and across recent submissions"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());

        let keys: Vec<String> = ctx
            .canonical_records
            .iter()
            .map(|r| composite_key(&ctx.insuree_id, r))
            .collect();

        while ctx.validation_results.len() < keys.len() {
            let row_index = ctx.validation_results.len();
            ctx.validation_results.push(ValidationResult { row_index, ..ValidationResult::default() });
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in &keys {
            *counts.entry(key.as_str()).or_default() += 1;
        }

        let mut within_file = 0;
        for (idx, key) in keys.iter().enumerate() {
            if counts.get(key.as_str()).copied().unwrap_or(0) > 1 {
                ctx.validation_results[idx].flag(DuplicateFlag::DuplicateInFile);
                within_file += 1;
            }
        }

        let mut cross_file = 0;
        match self
            .submissions
            .recent_composite_keys(&ctx.insuree_id, CROSS_BATCH_WINDOW_DAYS)
            .await
        {
            Ok(prior) => {
                for (idx, key) in keys.iter().enumerate() {
                    if prior.contains(key) {
                        ctx.validation_results[idx].flag(DuplicateFlag::PossibleDuplicate);
                        cross_file += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(execution_id = %ctx.execution_id, error = %e, "Prior submission lookup failed, skipping cross-batch check");
            }
        }

        tracing::info!(
            total = keys.len(),
            within_file_duplicates = within_file,
            cross_file_duplicates = cross_file,
            "Duplicate detection complete"
        );

        Ok(timer.success(json!({
            "total": keys.len(),
            "within_file_duplicates": within_file,
            "cross_file_duplicates": cross_file,
        })))
    }
}
