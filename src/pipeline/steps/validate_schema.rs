use async_trait::async_trait;
use serde_json::{json, Value};

use crate::pipeline::context::{CanonicalRecord, RunContext, ValidationResult};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::ValidationStatus;

const REQUIRED_FIELDS: [&str; 2] = ["endorsement_type", "member"];
const REQUIRED_MEMBER_FIELDS: [&str; 1] = ["name"];

/// Required-field checks. Rebuilds `validation_results` with exactly one
/// entry per canonical record; later validation steps augment these entries.
pub struct ValidateSchemaStep;

#[async_trait]
impl Step for ValidateSchemaStep {
    fn name(&self) -> &str {
        "validate_schema"
    }

    fn description(&self) -> &str {
        "Validate record schema (required fields, types)"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());

        ctx.validation_results = ctx
            .canonical_records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let errors = schema_errors(record);
                if !errors.is_empty() {
                    tracing::warn!(row_index = idx, errors = ?errors, "Schema validation failed");
                }
                ValidationResult {
                    row_index: idx,
                    schema_status: if errors.is_empty() {
                        ValidationStatus::Passed
                    } else {
                        ValidationStatus::Failed
                    },
                    schema_errors: errors,
                    ..ValidationResult::default()
                }
            })
            .collect();

        let total = ctx.validation_results.len();
        let failed = ctx
            .validation_results
            .iter()
            .filter(|r| r.schema_status == ValidationStatus::Failed)
            .count();

        tracing::info!(total, passed = total - failed, failed, "Schema validation complete");

        Ok(timer.success(json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
        })))
    }
}

/// Problems with one record's required structure.
pub fn schema_errors(record: &CanonicalRecord) -> Vec<String> {
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if record.get(field).map_or(true, Value::is_null) {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    match record.get("member") {
        None => {
            for field in REQUIRED_MEMBER_FIELDS {
                errors.push(format!("Missing required member field: {field}"));
            }
        }
        Some(Value::Object(member)) => {
            for field in REQUIRED_MEMBER_FIELDS {
                if !member.get(field).is_some_and(is_truthy) {
                    errors.push(format!("Missing required member field: {field}"));
                }
            }
        }
        Some(_) => errors.push("'member' must be an object".to_string()),
    }

    errors
}

/// Null, false, zero and empty strings/collections count as absent.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
