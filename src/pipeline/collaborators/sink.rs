use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::context::{CanonicalRecord, RunContext, ValidationResult};
use crate::pipeline::error::PipelineError;

/// Everything the persistence collaborator receives for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistBatch {
    pub execution_id: String,
    pub batch_id: String,
    pub insuree_id: String,
    pub insuree_code: String,
    pub canonical_records: Vec<CanonicalRecord>,
    pub validation_results: Vec<ValidationResult>,
    pub records_for_submission: Vec<String>,
    pub records_for_review: Vec<String>,
}

impl PersistBatch {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            execution_id: ctx.execution_id.clone(),
            batch_id: ctx.batch_id.clone(),
            insuree_id: ctx.insuree_id.clone(),
            insuree_code: ctx.insuree_code.clone(),
            canonical_records: ctx.canonical_records.clone(),
            validation_results: ctx.validation_results.clone(),
            records_for_submission: ctx.records_for_submission.clone(),
            records_for_review: ctx.records_for_review.clone(),
        }
    }
}

/// Persistence hand-off for canonical records and routing lists.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Returns the number of records persisted.
    async fn persist(&self, batch: &PersistBatch) -> Result<usize, PipelineError>;
}

/// Writes each batch as `{execution_id}.json` under a directory.
pub struct JsonRecordSink {
    dir: PathBuf,
}

impl JsonRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }
}

#[async_trait]
impl RecordSink for JsonRecordSink {
    async fn persist(&self, batch: &PersistBatch) -> Result<usize, PipelineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::storage(format!("Cannot create {}: {e}", self.dir.display())))?;

        let json = serde_json::to_vec_pretty(batch)?;
        let path = self.path_for(&batch.execution_id);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PipelineError::storage(format!("Cannot write {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), records = batch.canonical_records.len(), "Batch written");
        Ok(batch.canonical_records.len())
    }
}

/// Keeps persisted batches in memory.
#[derive(Default)]
pub struct InMemoryRecordSink {
    batches: Mutex<Vec<PersistBatch>>,
    fail_with: Option<String>,
}

impl InMemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self { fail_with: Some(message.to_string()), ..Self::default() }
    }

    pub fn batches(&self) -> Vec<PersistBatch> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RecordSink for InMemoryRecordSink {
    async fn persist(&self, batch: &PersistBatch) -> Result<usize, PipelineError> {
        if let Some(message) = &self.fail_with {
            return Err(PipelineError::storage(message.clone()));
        }
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.clone());
        Ok(batch.canonical_records.len())
    }
}

// ═══════════════════════════════════════════════════════════
// Prior submissions
// ═══════════════════════════════════════════════════════════

/// Composite keys of recently submitted endorsements, for cross-batch dedup.
#[async_trait]
pub trait SubmissionLookup: Send + Sync {
    async fn recent_composite_keys(
        &self,
        insuree_id: &str,
        window_days: u32,
    ) -> Result<HashSet<String>, PipelineError>;
}

/// No submission history available.
pub struct NoPriorSubmissions;

#[async_trait]
impl SubmissionLookup for NoPriorSubmissions {
    async fn recent_composite_keys(
        &self,
        _insuree_id: &str,
        _window_days: u32,
    ) -> Result<HashSet<String>, PipelineError> {
        Ok(HashSet::new())
    }
}

/// Fixed set of known keys.
pub struct KnownSubmissions {
    keys: HashSet<String>,
}

impl KnownSubmissions {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { keys: keys.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl SubmissionLookup for KnownSubmissions {
    async fn recent_composite_keys(
        &self,
        _insuree_id: &str,
        _window_days: u32,
    ) -> Result<HashSet<String>, PipelineError> {
        Ok(self.keys.clone())
    }
}
