//! Built-in steps shared by every flow.

pub mod api_request;
pub mod detect_duplicates;
pub mod detect_format;
pub mod download;
pub mod extract;
pub mod map_canonical;
pub mod persist;
pub mod score_confidence;
pub mod validate_business_rules;
pub mod validate_schema;

pub use api_request::{ApiRequestStep, HeadersBuilder, RequestBuilder};
pub use detect_duplicates::DetectDuplicatesStep;
pub use detect_format::DetectFormatStep;
pub use download::DownloadFileStep;
pub use extract::{ExtractDataStep, FileExtractor, FileOutput};
pub use map_canonical::MapCanonicalStep;
pub use persist::PersistRecordsStep;
pub use score_confidence::ScoreConfidenceStep;
pub use validate_business_rules::ValidateBusinessRulesStep;
pub use validate_schema::ValidateSchemaStep;
