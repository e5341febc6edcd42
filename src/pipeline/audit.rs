//! Persisted shape of a finished run.
//!
//! One [`RunRecord`] per execution: run header, ordered step entries, ordered
//! file entries and the raw payload extracted for each role. Built from a
//! [`RunResult`] and the insurer config the run used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::{ContextSummary, ExtractedDataEntry};
use super::engine::RunResult;
use super::insuree::InsureeConfig;
use super::types::{RunStatus, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub insurer_code: String,
    pub insurer_name: String,
    pub status: RunStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub config_snapshot: Value,
    pub context_summary: Option<ContextSummary>,
    pub steps: Vec<StepEntry>,
    pub files: Vec<FileEntry>,
    pub extracted_data: Vec<ExtractedDataEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    pub step_index: usize,
    pub step_name: String,
    pub description: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
    /// Attempts beyond the first.
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub role: String,
    pub filename: String,
    pub detected_format: Option<String>,
    pub record_count: usize,
    pub status: FileStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Ok,
    Failed,
}

impl RunRecord {
    pub fn from_result(result: &RunResult, config: &InsureeConfig) -> Self {
        let steps = result
            .step_results
            .iter()
            .enumerate()
            .map(|(index, step)| StepEntry {
                step_index: index,
                step_name: step.step_name.clone(),
                description: step.description.clone(),
                status: step.status,
                started_at: step.started_at,
                completed_at: step.completed_at,
                duration_ms: step.duration_ms,
                error_message: step.error.clone(),
                metadata: step.metadata.clone(),
                retry_count: step.attempts.saturating_sub(1),
            })
            .collect();

        let files = result
            .context_summary
            .iter()
            .flat_map(|summary| summary.files.iter())
            .map(|file| FileEntry {
                role: file.role.clone(),
                filename: file.filename.clone(),
                detected_format: file.detected_format.map(|f| f.as_str().to_string()),
                record_count: file.record_count,
                status: if file.is_ok() { FileStatus::Ok } else { FileStatus::Failed },
                error_message: file.error.clone(),
            })
            .collect();

        Self {
            run_id: result.execution_id.clone(),
            insurer_code: config.code.clone(),
            insurer_name: config.name.clone(),
            status: result.status,
            total_steps: result.total_steps,
            completed_steps: result.steps_completed,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_ms: result.total_duration_ms,
            error_message: result.error.clone(),
            config_snapshot: config.snapshot(),
            context_summary: result.context_summary.clone(),
            steps,
            files,
            extracted_data: result.extracted_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::RunContext;
    use crate::pipeline::step::StepTimer;
    use crate::pipeline::types::{FileDescriptor, FileFormat};
    use serde_json::json;

    fn result_with_context() -> (RunResult, InsureeConfig) {
        let config = InsureeConfig::new("ABHI", "Aditya Birla Health Insurance");
        let mut ctx = RunContext::new("b", "i", config.clone()).with_files(vec![
            FileDescriptor::new("f1", "a.xlsx", "endorsement_data"),
            FileDescriptor::new("f2", "b.pdf", "endorsement_pdf"),
        ]);
        ctx.files[0].detected_format = Some(FileFormat::StructuredXlsx);
        ctx.files[0].record_count = 2;
        ctx.files[1].error = Some("Object not found".into());
        ctx.extracted_by_role.insert(
            "endorsement_data".into(),
            vec![json!({"name": "A"}).as_object().cloned().unwrap()],
        );

        let ok = StepTimer::start("download_files", "Download").success(json!({}));
        let mut failed = StepTimer::start("extract", "Extract").failure("boom", json!({"attempts": 2}), 2);
        failed.metadata.insert("x".into(), json!(1));

        let result = RunResult {
            execution_id: ctx.execution_id.clone(),
            status: RunStatus::Failed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            total_duration_ms: 12,
            steps_completed: 1,
            total_steps: 3,
            step_results: vec![ok, failed],
            context_summary: Some(ctx.summary()),
            extracted_data: ctx.extracted_entries(),
            error: Some("Step 'extract' failed: boom".into()),
        };
        (result, config)
    }

    #[test]
    fn record_mirrors_run_steps_and_files() {
        let (result, config) = result_with_context();
        let record = RunRecord::from_result(&result, &config);

        assert_eq!(record.run_id, result.execution_id);
        assert_eq!(record.insurer_name, "Aditya Birla Health Insurance");
        assert_eq!(record.completed_steps, 1);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[1].step_index, 1);
        assert_eq!(record.steps[0].retry_count, 0);
        assert_eq!(record.steps[1].retry_count, 1);
        assert_eq!(record.files[0].detected_format.as_deref(), Some("STRUCTURED_XLSX"));
        assert_eq!(record.files[0].status, FileStatus::Ok);
        assert_eq!(record.files[1].status, FileStatus::Failed);
        assert_eq!(record.extracted_data[0].extraction_method, "sheet_extractor");
        assert_eq!(record.config_snapshot["code"], "ABHI");
    }

    #[test]
    fn serializes_with_upper_case_statuses() {
        let (result, config) = result_with_context();
        let value = serde_json::to_value(RunRecord::from_result(&result, &config)).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["steps"][0]["status"], "COMPLETED");
        assert_eq!(value["files"][1]["status"], "FAILED");
    }

    #[test]
    fn unresolved_run_has_no_files() {
        let (mut result, config) = result_with_context();
        result.context_summary = None;
        assert!(RunRecord::from_result(&result, &config).files.is_empty());
    }
}
