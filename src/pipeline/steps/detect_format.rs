use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::pipeline::context::RunContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::insuree::InsureeConfig;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::FileFormat;

/// Where a detected format came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSource {
    RoleConfig,
    InsureeConfig,
    Extension,
    Fallback,
}

impl FormatSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleConfig => "role_config",
            Self::InsureeConfig => "insuree_config",
            Self::Extension => "extension",
            Self::Fallback => "fallback",
        }
    }
}

/// Decide a file's format: role override, global override (single-file
/// runs only), extension table, fixed fallback. First match wins.
pub fn detect_format(
    config: &InsureeConfig,
    role: &str,
    filename: &str,
    is_batch: bool,
) -> (FileFormat, FormatSource) {
    if let Some(format) = config.role_format(role) {
        return (format, FormatSource::RoleConfig);
    }
    if !is_batch {
        if let Some(format) = config.global_format() {
            return (format, FormatSource::InsureeConfig);
        }
    }
    if let Some(format) = FileFormat::from_extension(&extension(filename)) {
        return (format, FormatSource::Extension);
    }
    (FileFormat::fallback(), FormatSource::Fallback)
}

/// Lowercase extension with leading dot, or empty.
fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Assigns a format to every file. Never fails per file.
pub struct DetectFormatStep;

#[async_trait]
impl Step for DetectFormatStep {
    fn name(&self) -> &str {
        "detect_formats"
    }

    fn description(&self) -> &str {
        "Detect file format(s) and extraction strategy"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let is_batch = ctx.is_batch();
        let mut detections: Vec<Value> = Vec::with_capacity(ctx.files.len());

        for file in ctx.files.iter_mut() {
            let (format, source) = detect_format(&ctx.config, &file.role, &file.filename, is_batch);
            file.detected_format = Some(format);

            let mut entry = json!({
                "role": file.role,
                "format": format.as_str(),
                "source": source.as_str(),
            });
            if source == FormatSource::Extension {
                entry["extension"] = json!(extension(&file.filename));
            }
            detections.push(entry);
        }

        tracing::info!(total_files = ctx.files.len(), "Format detection complete");

        Ok(timer.success(json!({
            "total_files": ctx.files.len(),
            "detections": detections,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::FileDescriptor;

    fn config() -> InsureeConfig {
        let mut config = InsureeConfig::new("ABHI", "Aditya");
        config.role_formats.insert("endorsement_data".into(), "STRUCTURED_XLSX".into());
        config
    }

    #[test]
    fn role_override_beats_extension() {
        let (format, source) = detect_format(&config(), "endorsement_data", "sheet.csv", true);
        assert_eq!(format, FileFormat::StructuredXlsx);
        assert_eq!(source, FormatSource::RoleConfig);
    }

    #[test]
    fn global_override_only_for_single_file() {
        let mut config = InsureeConfig::new("X", "X");
        config.format_type = Some("STRUCTURED_CSV".into());

        let (format, source) = detect_format(&config, "primary", "scan.pdf", false);
        assert_eq!((format, source), (FileFormat::StructuredCsv, FormatSource::InsureeConfig));

        let (format, source) = detect_format(&config, "primary", "scan.pdf", true);
        assert_eq!((format, source), (FileFormat::SemiStructuredPdf, FormatSource::Extension));
    }

    #[test]
    fn extension_is_case_insensitive_and_fallback_applies() {
        let config = InsureeConfig::default();
        assert_eq!(detect_format(&config, "r", "A.XLS", false).0, FileFormat::StructuredXlsx);
        assert_eq!(detect_format(&config, "r", "photo.JPEG", false).0, FileFormat::ScannedImage);
        assert_eq!(
            detect_format(&config, "r", "endorsement_file_123", false),
            (FileFormat::UnstructuredPdf, FormatSource::Fallback)
        );
    }

    #[tokio::test]
    async fn step_sets_format_on_every_file() {
        let mut ctx = RunContext::new("b", "i", config()).with_files(vec![
            FileDescriptor::new("f1", "data.csv", "endorsement_data"),
            FileDescriptor::new("f2", "letter.pdf", "endorsement_pdf"),
        ]);

        let result = DetectFormatStep.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.files[0].detected_format, Some(FileFormat::StructuredXlsx));
        assert_eq!(ctx.files[1].detected_format, Some(FileFormat::SemiStructuredPdf));
        let detections = result.metadata["detections"].as_array().unwrap();
        assert_eq!(detections[0]["source"], "role_config");
        assert_eq!(detections[1]["source"], "extension");
        assert_eq!(detections[1]["extension"], ".pdf");
    }
}
