//! LLM extraction for PDFs and images.
//!
//! The file goes to the multimodal model as-is; the answer must be JSON,
//! optionally wrapped in a code fence.

use std::path::Path;

use serde_json::Value;

use crate::pipeline::collaborators::LlmClient;
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::RawRecord;

pub const EXTRACTION_METHOD_LLM: &str = "llm";

/// System instruction shared by every document extraction.
pub const DOCUMENT_SYSTEM_PROMPT: &str = "You read insurance endorsement documents and answer \
with JSON only. Never add commentary, markdown or explanations. Use null for any value the \
document does not state.";

/// Generic member-level prompt used when an insurer has no dedicated one.
pub const GENERIC_ENDORSEMENT_PROMPT: &str = r#"List every member endorsement in this document.

Answer with a JSON array. Each element is an object with these keys:
- "name": member full name
- "employee_id": employee or member identifier
- "action": the requested change, e.g. ADD, DEL, MOD, SI_CHANGE
- "dob": date of birth as YYYY-MM-DD
- "gender": gender as written
- "relationship": relationship to the primary insured
- "effective_date": date the change takes effect, as YYYY-MM-DD
- "sum_insured": sum insured as a number

Set a key to null when the document does not give it. Do not invent values."#;

/// Run one document through the model and normalize the answer to records.
pub async fn extract_document(
    llm: &dyn LlmClient,
    path: &Path,
    filename: &str,
    prompt: &str,
    system: &str,
) -> Result<Vec<RawRecord>, PipelineError> {
    tracing::info!(filename, model = llm.model(), "LLM document extraction started");

    let response = llm.extract(path, prompt, system).await?;
    let mut records = parse_records(&response)?;

    for record in records.iter_mut() {
        record.insert("_source_file".into(), Value::String(filename.to_string()));
        record.insert("_extraction_method".into(), Value::String(EXTRACTION_METHOD_LLM.into()));
        record.insert("_llm_model".into(), Value::String(llm.model().to_string()));
    }

    tracing::info!(filename, records = records.len(), "LLM document extraction complete");
    Ok(records)
}

/// Parse a model answer: strip a code fence, accept an object or an array of objects.
pub fn parse_records(response: &str) -> Result<Vec<RawRecord>, PipelineError> {
    let body = strip_code_fence(response);
    let parsed: Value = serde_json::from_str(body.trim()).map_err(|e| {
        PipelineError::extraction(format!("LLM returned invalid JSON: {e}"))
            .with_detail("response_preview", preview(response))
    })?;

    match parsed {
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::extraction(format!(
                    "LLM returned a non-object list item: {other}"
                ))),
            })
            .collect(),
        other => Err(PipelineError::extraction(format!(
            "LLM returned neither an object nor a list: {other}"
        ))),
    }
}

/// Drop the first and last lines when the text opens with a fence.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    let end = if lines.len() > 1 && lines[lines.len() - 1].trim_start().starts_with("```") {
        lines.len() - 1
    } else {
        lines.len()
    };
    lines[1.min(end)..end].join("\n")
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
