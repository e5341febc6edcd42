//! Per-file extraction: route every downloaded file to an extractor, store
//! the records under the file's role, then merge all roles into the flat list.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::extraction::{self, DOCUMENT_SYSTEM_PROMPT, GENERIC_ENDORSEMENT_PROMPT};
use crate::pipeline::collaborators::LlmClient;
use crate::pipeline::context::{FileInfo, RunContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::{FileFormat, RawRecord};

/// Records from one file plus any side outputs destined for the scratch map.
#[derive(Debug, Default)]
pub struct FileOutput {
    pub records: Vec<RawRecord>,
    pub scratch: Vec<(String, Value)>,
}

impl FileOutput {
    pub fn records(records: Vec<RawRecord>) -> Self {
        Self { records, scratch: Vec::new() }
    }

    /// Records from a spreadsheet, with header, summary and title under `{prefix}_*`.
    pub fn from_sheet(sheet: extraction::SheetExtraction, prefix: &str, filename: &str) -> Self {
        let mut scratch = vec![
            (format!("{prefix}_header"), Value::Object(sheet.header)),
            (format!("{prefix}_summary"), Value::Object(sheet.summary)),
        ];
        if let Some(title) = sheet.title {
            scratch.push((format!("{prefix}_title"), Value::String(title)));
        }
        Self {
            records: tag_source_file(sheet.records, filename),
            scratch,
        }
    }
}

/// Strategy deciding how one file is extracted.
#[async_trait]
pub trait FileExtractor: Send + Sync {
    /// `Ok(None)` means the file is not handled and is skipped.
    async fn extract_file(&self, file: &FileInfo) -> Result<Option<FileOutput>, PipelineError>;
}

/// Run `extractor` over every downloaded file, isolating per-file failures.
///
/// Returns the step metadata. Fails only when no file was extracted.
pub async fn extract_all_files(
    ctx: &mut RunContext,
    extractor: &dyn FileExtractor,
    step_name: &str,
    all_failed_message: &str,
) -> Result<Value, PipelineError> {
    if ctx.files.is_empty() {
        return Err(PipelineError::step("No files to extract from").in_step(&ctx.execution_id, step_name));
    }

    // A retried attempt starts from scratch.
    ctx.extracted_by_role.clear();
    let mut per_file = Vec::with_capacity(ctx.files.len());
    let mut files_ok = 0;

    for index in 0..ctx.files.len() {
        let file = ctx.files[index].clone();
        let format = file.detected_format.map(|f| f.as_str());

        if file.local_path.is_none() {
            tracing::warn!(role = %file.role, filename = %file.filename, error = ?file.error, "Skipping file with download error");
            per_file.push(json!({
                "role": file.role,
                "filename": file.filename,
                "status": "skipped",
                "reason": "download_error",
            }));
            continue;
        }

        tracing::info!(role = %file.role, filename = %file.filename, format = ?format, "Extracting from file");
        ctx.files[index].error = None;

        match extractor.extract_file(&file).await {
            Ok(Some(output)) => {
                let count = output.records.len();
                ctx.files[index].record_count = count;
                ctx.extracted_by_role
                    .entry(file.role.clone())
                    .or_default()
                    .extend(output.records);
                for (key, value) in output.scratch {
                    ctx.set_scratch(&key, value);
                }
                files_ok += 1;
                tracing::info!(role = %file.role, records = count, "File extraction complete");
                per_file.push(json!({
                    "role": file.role,
                    "filename": file.filename,
                    "format": format,
                    "records": count,
                    "status": "ok",
                }));
            }
            Ok(None) => {
                tracing::warn!(role = %file.role, filename = %file.filename, "No extractor for role, skipping");
                per_file.push(json!({
                    "role": file.role,
                    "filename": file.filename,
                    "status": "skipped",
                    "reason": "unhandled_role",
                }));
            }
            Err(e) => {
                tracing::error!(role = %file.role, filename = %file.filename, error = %e, "File extraction failed");
                ctx.files[index].error = Some(e.to_string());
                ctx.add_error(format!(
                    "Extraction failed for {} (role={}): {}",
                    file.filename, file.role, e
                ));
                per_file.push(json!({
                    "role": file.role,
                    "filename": file.filename,
                    "status": "failed",
                    "error": e.to_string(),
                }));
            }
        }
    }

    ctx.merge_extracted_to_flat();

    if files_ok == 0 {
        return Err(PipelineError::step(all_failed_message).in_step(&ctx.execution_id, step_name));
    }

    let by_role: serde_json::Map<String, Value> = ctx
        .extracted_by_role
        .iter()
        .map(|(role, records)| (role.clone(), json!(records.len())))
        .collect();

    tracing::info!(
        total_files = ctx.files.len(),
        files_ok,
        total_records = ctx.raw_extracted.len(),
        "All extractions complete"
    );

    Ok(json!({
        "total_files": ctx.files.len(),
        "files_extracted": files_ok,
        "total_records": ctx.raw_extracted.len(),
        "by_role": by_role,
        "per_file": per_file,
    }))
}

pub fn tag_source_file(mut records: Vec<RawRecord>, filename: &str) -> Vec<RawRecord> {
    for record in records.iter_mut() {
        record.insert("_source_file".into(), Value::String(filename.to_string()));
    }
    records
}

pub(crate) fn staged_path(file: &FileInfo) -> Result<&PathBuf, PipelineError> {
    file.local_path
        .as_ref()
        .ok_or_else(|| PipelineError::extraction(format!("File {} was not downloaded", file.filename)))
}

// ═══════════════════════════════════════════════════════════
// Format routing
// ═══════════════════════════════════════════════════════════

/// Routes by detected format: CSV, spreadsheet, or LLM for PDFs and images.
pub struct FormatExtractor {
    llm: Arc<dyn LlmClient>,
}

impl FormatExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl FileExtractor for FormatExtractor {
    async fn extract_file(&self, file: &FileInfo) -> Result<Option<FileOutput>, PipelineError> {
        let path = staged_path(file)?;
        let format = file.detected_format.ok_or_else(|| {
            PipelineError::extraction(format!("No format detected for {}", file.filename))
        })?;

        let output = match format {
            FileFormat::StructuredCsv => {
                FileOutput::records(tag_source_file(extraction::csv::extract_csv(path)?, &file.filename))
            }
            FileFormat::StructuredXlsx => {
                let sheet = extraction::extract_workbook(path).await?;
                FileOutput::from_sheet(sheet, &format!("xlsx_{}", file.role), &file.filename)
            }
            FileFormat::SemiStructuredPdf | FileFormat::UnstructuredPdf | FileFormat::ScannedImage => {
                FileOutput::records(
                    extraction::extract_document(
                        self.llm.as_ref(),
                        path,
                        &file.filename,
                        GENERIC_ENDORSEMENT_PROMPT,
                        DOCUMENT_SYSTEM_PROMPT,
                    )
                    .await?,
                )
            }
            FileFormat::UnstructuredDocx => {
                return Err(PipelineError::extraction(format!(
                    "Unsupported format '{format}' for file {}",
                    file.filename
                )));
            }
        };
        Ok(Some(output))
    }
}

/// Generic extraction used by the DEFAULT flow.
pub struct ExtractDataStep {
    extractor: FormatExtractor,
}

impl ExtractDataStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { extractor: FormatExtractor::new(llm) }
    }
}

#[async_trait]
impl Step for ExtractDataStep {
    fn name(&self) -> &str {
        "extract_data"
    }

    fn description(&self) -> &str {
        "Extract endorsement data from file(s)"
    }

    fn retryable(&self) -> bool {
        true
    }

    fn max_retries(&self) -> u32 {
        2
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let metadata =
            extract_all_files(ctx, &self.extractor, self.name(), "All file extractions failed").await?;
        Ok(timer.success(metadata))
    }
}
