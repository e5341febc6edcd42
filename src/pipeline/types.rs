use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw record as produced by an extractor: column/field name to value.
pub type RawRecord = Map<String, Value>;

// ═══════════════════════════════════════════════════════════
// File formats
// ═══════════════════════════════════════════════════════════

/// Detected layout of an input file; drives extractor routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileFormat {
    StructuredCsv,
    StructuredXlsx,
    SemiStructuredPdf,
    UnstructuredPdf,
    UnstructuredDocx,
    ScannedImage,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredCsv => "STRUCTURED_CSV",
            Self::StructuredXlsx => "STRUCTURED_XLSX",
            Self::SemiStructuredPdf => "SEMI_STRUCTURED_PDF",
            Self::UnstructuredPdf => "UNSTRUCTURED_PDF",
            Self::UnstructuredDocx => "UNSTRUCTURED_DOCX",
            Self::ScannedImage => "SCANNED_IMAGE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRUCTURED_CSV" => Some(Self::StructuredCsv),
            "STRUCTURED_XLSX" => Some(Self::StructuredXlsx),
            "SEMI_STRUCTURED_PDF" => Some(Self::SemiStructuredPdf),
            "UNSTRUCTURED_PDF" => Some(Self::UnstructuredPdf),
            "UNSTRUCTURED_DOCX" => Some(Self::UnstructuredDocx),
            "SCANNED_IMAGE" => Some(Self::ScannedImage),
            _ => None,
        }
    }

    /// Map a lowercase file extension (with leading dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".csv" => Some(Self::StructuredCsv),
            ".xlsx" | ".xls" => Some(Self::StructuredXlsx),
            ".pdf" => Some(Self::SemiStructuredPdf),
            ".docx" | ".doc" => Some(Self::UnstructuredDocx),
            ".png" | ".jpg" | ".jpeg" | ".tiff" | ".tif" => Some(Self::ScannedImage),
            _ => None,
        }
    }

    /// Format assigned when neither config nor extension decides.
    pub fn fallback() -> Self {
        Self::UnstructuredPdf
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Statuses
// ═══════════════════════════════════════════════════════════

/// Terminal and transient states of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Kept for persistence compatibility; the engine never produces it.
    PartiallyCompleted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::PartiallyCompleted => "PARTIALLY_COMPLETED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Retrying => "RETRYING",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    #[default]
    Passed,
    Failed,
    Warning,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Warning => "WARNING",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Endorsement semantics
// ═══════════════════════════════════════════════════════════

/// Canonical endorsement action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndorsementType {
    AddMember,
    RemoveMember,
    ChangeDetails,
    ChangeSumInsured,
}

impl EndorsementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddMember => "ADD_MEMBER",
            Self::RemoveMember => "REMOVE_MEMBER",
            Self::ChangeDetails => "CHANGE_DETAILS",
            Self::ChangeSumInsured => "CHANGE_SUM_INSURED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADD_MEMBER" => Some(Self::AddMember),
            "REMOVE_MEMBER" => Some(Self::RemoveMember),
            "CHANGE_DETAILS" => Some(Self::ChangeDetails),
            "CHANGE_SUM_INSURED" => Some(Self::ChangeSumInsured),
            _ => None,
        }
    }

    /// Built-in action-code table used when the insurer config has none.
    pub fn from_action_code(code: &str) -> Option<Self> {
        match code {
            "ADD" => Some(Self::AddMember),
            "DEL" | "DELETE" | "REMOVE" => Some(Self::RemoveMember),
            "MOD" | "MODIFY" | "CHANGE" => Some(Self::ChangeDetails),
            "SI_CHANGE" => Some(Self::ChangeSumInsured),
            _ => None,
        }
    }
}

impl std::fmt::Display for EndorsementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Duplicate markers attached to a validation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateFlag {
    /// Same composite key appears more than once in this batch.
    DuplicateInFile,
    /// Composite key matches a recent prior submission.
    PossibleDuplicate,
}

impl DuplicateFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateInFile => "DUPLICATE_IN_FILE",
            Self::PossibleDuplicate => "POSSIBLE_DUPLICATE",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════

/// One file handed to `PipelineEngine::run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub file_id: String,
    pub filename: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub locator: Option<String>,
}

impl FileDescriptor {
    pub fn new(file_id: &str, filename: &str, role: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            filename: filename.to_string(),
            role: role.to_string(),
            locator: None,
        }
    }

    pub fn with_locator(mut self, locator: &str) -> Self {
        self.locator = Some(locator.to_string());
        self
    }
}

pub const PRIMARY_ROLE: &str = "primary";

fn default_role() -> String {
    PRIMARY_ROLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_serialize_screaming_snake() {
        let json = serde_json::to_string(&FileFormat::SemiStructuredPdf).unwrap();
        assert_eq!(json, "\"SEMI_STRUCTURED_PDF\"");
        let back: FileFormat = serde_json::from_str("\"STRUCTURED_XLSX\"").unwrap();
        assert_eq!(back, FileFormat::StructuredXlsx);
    }

    #[test]
    fn format_from_str_is_case_insensitive() {
        assert_eq!(FileFormat::from_str("structured_csv"), Some(FileFormat::StructuredCsv));
        assert_eq!(FileFormat::from_str("PARQUET"), None);
    }

    #[test]
    fn extension_table() {
        assert_eq!(FileFormat::from_extension(".xls"), Some(FileFormat::StructuredXlsx));
        assert_eq!(FileFormat::from_extension(".tif"), Some(FileFormat::ScannedImage));
        assert_eq!(FileFormat::from_extension(".doc"), Some(FileFormat::UnstructuredDocx));
        assert_eq!(FileFormat::from_extension(".txt"), None);
        assert_eq!(FileFormat::fallback(), FileFormat::UnstructuredPdf);
    }

    #[test]
    fn action_codes_map_to_types() {
        assert_eq!(EndorsementType::from_action_code("ADD"), Some(EndorsementType::AddMember));
        assert_eq!(EndorsementType::from_action_code("DELETE"), Some(EndorsementType::RemoveMember));
        assert_eq!(EndorsementType::from_action_code("MOD"), Some(EndorsementType::ChangeDetails));
        assert_eq!(
            EndorsementType::from_action_code("SI_CHANGE"),
            Some(EndorsementType::ChangeSumInsured)
        );
        assert_eq!(EndorsementType::from_action_code("TRANSFER"), None);
    }

    #[test]
    fn status_display_matches_wire_value() {
        assert_eq!(RunStatus::PartiallyCompleted.to_string(), "PARTIALLY_COMPLETED");
        assert_eq!(StepStatus::Skipped.to_string(), "SKIPPED");
        assert_eq!(
            serde_json::to_value(DuplicateFlag::DuplicateInFile).unwrap(),
            "DUPLICATE_IN_FILE"
        );
    }

    #[test]
    fn descriptor_role_defaults_to_primary() {
        let desc: FileDescriptor =
            serde_json::from_str(r#"{"file_id":"f1","filename":"a.csv"}"#).unwrap();
        assert_eq!(desc.role, PRIMARY_ROLE);
        assert!(desc.locator.is_none());
    }
}
