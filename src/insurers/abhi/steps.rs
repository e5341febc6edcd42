//! ABHI extraction: the XLS endorsement sheet goes through the table
//! extractor, the endorsement PDF through the LLM with the ABHI prompt.

use std::sync::Arc;

use async_trait::async_trait;

use super::prompts::{ENDORSEMENT_PDF_PROMPT, SYSTEM_PROMPT};
use super::{ROLE_ENDORSEMENT_DATA, ROLE_ENDORSEMENT_PDF};
use crate::extraction;
use crate::pipeline::collaborators::LlmClient;
use crate::pipeline::context::{FileInfo, RunContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::steps::extract::{extract_all_files, staged_path};
use crate::pipeline::steps::FileExtractor;
use crate::pipeline::steps::FileOutput;

/// Scratch prefix for the sheet's header, summary and title.
pub const SHEET_SCRATCH_PREFIX: &str = "abhi_xls";

/// Routes ABHI files by role. Roles ABHI does not define are skipped.
pub struct AbhiExtractor {
    llm: Arc<dyn LlmClient>,
}

impl AbhiExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl FileExtractor for AbhiExtractor {
    async fn extract_file(&self, file: &FileInfo) -> Result<Option<FileOutput>, PipelineError> {
        let output = match file.role.as_str() {
            ROLE_ENDORSEMENT_DATA => {
                let path = staged_path(file)?;
                let sheet = extraction::extract_workbook(path).await.map_err(|e| abhi_failure(file, e))?;
                tracing::info!(
                    filename = %file.filename,
                    records = sheet.records.len(),
                    header_fields = sheet.header.len(),
                    "ABHI sheet extracted"
                );
                FileOutput::from_sheet(sheet, SHEET_SCRATCH_PREFIX, &file.filename)
            }
            ROLE_ENDORSEMENT_PDF => {
                let path = staged_path(file)?;
                let records = extraction::extract_document(
                    self.llm.as_ref(),
                    path,
                    &file.filename,
                    ENDORSEMENT_PDF_PROMPT,
                    SYSTEM_PROMPT,
                )
                .await
                .map_err(|e| abhi_failure(file, e))?;
                FileOutput::records(records)
            }
            _ => return Ok(None),
        };
        Ok(Some(output))
    }
}

fn abhi_failure(file: &FileInfo, error: PipelineError) -> PipelineError {
    PipelineError::step(format!("ABHI extraction failed for {}: {error}", file.filename))
        .with_detail("role", file.role.as_str())
}

pub struct AbhiExtractStep {
    extractor: AbhiExtractor,
}

impl AbhiExtractStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { extractor: AbhiExtractor::new(llm) }
    }
}

#[async_trait]
impl Step for AbhiExtractStep {
    fn name(&self) -> &str {
        "abhi_extract_data"
    }

    fn description(&self) -> &str {
        "Extract endorsement data from ABHI XLS and PDF files"
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
            extract_all_files(ctx, &self.extractor, self.name(), "All ABHI file extractions failed").await?;
        Ok(timer.success(metadata))
    }
}
