//! Run context: the mutable state threaded through one pipeline execution.
//!
//! Created once per run by the engine, mutated by every step in order,
//! summarized for the audit record when the run ends.
//!
//! `validation_results[i]` always describes `canonical_records[i]`. Schema
//! validation sizes the list; later steps only augment entries in place.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::insuree::InsureeConfig;
use super::step::StepResult;
use super::types::{DuplicateFlag, FileDescriptor, FileFormat, RawRecord, ValidationStatus};

// ═══════════════════════════════════════════════════════════
// FileInfo
// ═══════════════════════════════════════════════════════════

/// One file within a batch. Owned by the context's file list and
/// updated in place by download, detection and extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub filename: String,
    pub role: String,
    pub locator: Option<String>,
    pub local_path: Option<PathBuf>,
    pub detected_format: Option<FileFormat>,
    pub record_count: usize,
    pub error: Option<String>,
    /// SHA-256 of the staged bytes.
    pub sha256: Option<String>,
    /// True when the download step created `local_path` itself.
    #[serde(skip)]
    pub staged: bool,
}

impl FileInfo {
    pub fn new(file_id: &str, filename: &str, role: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            role: role.to_string(),
            locator: None,
            local_path: None,
            detected_format: None,
            record_count: 0,
            error: None,
            sha256: None,
            staged: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<FileDescriptor> for FileInfo {
    fn from(desc: FileDescriptor) -> Self {
        let mut info = FileInfo::new(&desc.file_id, &desc.filename, &desc.role);
        info.locator = desc.locator;
        info
    }
}

// ═══════════════════════════════════════════════════════════
// Canonical records and validation
// ═══════════════════════════════════════════════════════════

/// An endorsement in the common schema: `endorsement_type`, a nested
/// `member` object, optional `effective_date`, plus `_`-prefixed row metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord(pub Map<String, Value>);

impl CanonicalRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn endorsement_type(&self) -> Option<&str> {
        self.0.get("endorsement_type").and_then(Value::as_str)
    }

    pub fn member(&self) -> Option<&Map<String, Value>> {
        self.0.get("member").and_then(Value::as_object)
    }

    /// Text of a member field; missing and null read as empty.
    pub fn member_text(&self, field: &str) -> String {
        self.member()
            .and_then(|m| m.get(field))
            .map(value_text)
            .unwrap_or_default()
    }

    pub fn effective_date(&self) -> Option<&Value> {
        self.0.get("effective_date").filter(|v| !v.is_null())
    }

    /// Extraction confidence, 1.0 when the extractor gave none.
    pub fn confidence(&self) -> f64 {
        self.0
            .get("_confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
    }

    pub fn source_role(&self) -> Option<&str> {
        self.0.get("_source_role").and_then(Value::as_str)
    }
}

/// Findings for one canonical record, aligned by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub row_index: usize,
    pub schema_errors: Vec<String>,
    pub schema_status: ValidationStatus,
    #[serde(default)]
    pub business_errors: Vec<String>,
    #[serde(default)]
    pub business_warnings: Vec<String>,
    #[serde(default)]
    pub business_status: Option<ValidationStatus>,
    #[serde(default)]
    pub duplicate_flags: Vec<DuplicateFlag>,
}

impl ValidationResult {
    /// Schema or business errors that prevent automatic submission.
    pub fn has_blocking_errors(&self) -> bool {
        !self.schema_errors.is_empty() || !self.business_errors.is_empty()
    }

    pub fn has_duplicates(&self) -> bool {
        !self.duplicate_flags.is_empty()
    }

    pub fn flag(&mut self, flag: DuplicateFlag) {
        if !self.duplicate_flags.contains(&flag) {
            self.duplicate_flags.push(flag);
        }
    }
}

// ═══════════════════════════════════════════════════════════
// RunContext
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: String,
    /// Batch id; also the synthesized file id for legacy single-file runs.
    pub batch_id: String,
    pub insuree_id: String,
    pub insuree_code: String,
    pub config: InsureeConfig,

    /// Batch order; one entry for single-file runs.
    pub files: Vec<FileInfo>,

    pub extracted_by_role: IndexMap<String, Vec<RawRecord>>,
    /// All roles merged, each record tagged with `_source_role`.
    pub raw_extracted: Vec<RawRecord>,
    pub canonical_records: Vec<CanonicalRecord>,
    pub validation_results: Vec<ValidationResult>,

    pub records_for_submission: Vec<String>,
    pub records_for_review: Vec<String>,

    /// Step-to-step signaling: API responses, spreadsheet side outputs.
    pub scratch: Map<String, Value>,
    pub errors: Vec<String>,

    pub step_results: Vec<StepResult>,
    pub total_steps: usize,
}

impl RunContext {
    pub fn new(batch_id: &str, insuree_id: &str, config: InsureeConfig) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            insuree_id: insuree_id.to_string(),
            insuree_code: config.code.clone(),
            config,
            files: Vec::new(),
            extracted_by_role: IndexMap::new(),
            raw_extracted: Vec::new(),
            canonical_records: Vec::new(),
            validation_results: Vec::new(),
            records_for_submission: Vec::new(),
            records_for_review: Vec::new(),
            scratch: Map::new(),
            errors: Vec::new(),
            step_results: Vec::new(),
            total_steps: 0,
        }
    }

    pub fn with_files(mut self, files: Vec<FileDescriptor>) -> Self {
        self.files = files.into_iter().map(FileInfo::from).collect();
        self
    }

    pub fn is_batch(&self) -> bool {
        self.files.len() > 1
    }

    pub fn primary_file(&self) -> Option<&FileInfo> {
        self.files.first()
    }

    pub fn file_by_role(&self, role: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.role == role)
    }

    pub fn files_by_role(&self, role: &str) -> Vec<&FileInfo> {
        self.files.iter().filter(|f| f.role == role).collect()
    }

    pub fn extracted_for_role(&self, role: &str) -> &[RawRecord] {
        self.extracted_by_role
            .get(role)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rebuild the flat list from the per-role map, tagging each record with its role.
    pub fn merge_extracted_to_flat(&mut self) {
        let mut merged = Vec::new();
        for (role, records) in self.extracted_by_role.iter_mut() {
            for record in records.iter_mut() {
                record.insert("_source_role".into(), Value::String(role.clone()));
                merged.push(record.clone());
            }
        }
        self.raw_extracted = merged;
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn set_scratch(&mut self, key: &str, value: Value) {
        self.scratch.insert(key.to_string(), value);
    }

    pub fn scratch(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    /// One entry per role, method and model read from the first record's tags.
    pub fn extracted_entries(&self) -> Vec<ExtractedDataEntry> {
        self.extracted_by_role
            .iter()
            .map(|(role, records)| {
                let first = records.first();
                let tag = |key: &str| {
                    first
                        .and_then(|r| r.get(key))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                ExtractedDataEntry {
                    source_role: role.clone(),
                    extraction_method: tag("_extraction_method")
                        .unwrap_or_else(|| DEFAULT_EXTRACTION_METHOD.to_string()),
                    llm_model: tag("_llm_model"),
                    records: records.clone(),
                }
            })
            .collect()
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            execution_id: self.execution_id.clone(),
            batch_id: self.batch_id.clone(),
            insuree_id: self.insuree_id.clone(),
            insuree_code: self.insuree_code.clone(),
            is_batch: self.is_batch(),
            files: self.files.clone(),
            total_files: self.files.len(),
            extracted_by_role: self
                .extracted_by_role
                .iter()
                .map(|(role, records)| (role.clone(), records.len()))
                .collect(),
            records_extracted_total: self.raw_extracted.len(),
            records_canonical: self.canonical_records.len(),
            records_for_review: self.records_for_review.len(),
            records_for_submission: self.records_for_submission.len(),
            steps_completed: self.step_results.len(),
            total_steps: self.total_steps,
            errors: self.errors.clone(),
        }
    }
}

/// Compact snapshot of a context for logging and audit storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub execution_id: String,
    pub batch_id: String,
    pub insuree_id: String,
    pub insuree_code: String,
    pub is_batch: bool,
    pub files: Vec<FileInfo>,
    pub total_files: usize,
    pub extracted_by_role: IndexMap<String, usize>,
    pub records_extracted_total: usize,
    pub records_canonical: usize,
    pub records_for_review: usize,
    pub records_for_submission: usize,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub errors: Vec<String>,
}

/// Raw payload of one role, as kept in the audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDataEntry {
    pub source_role: String,
    pub extraction_method: String,
    pub llm_model: Option<String>,
    pub records: Vec<RawRecord>,
}

/// Extraction method recorded when a record carries none.
pub const DEFAULT_EXTRACTION_METHOD: &str = "sheet_extractor";

/// Render a JSON scalar as plain text (strings unquoted, null empty).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
