//! Error taxonomy for the endorsement pipeline.
//!
//! Every taxonomy variant carries an [`ErrorContext`] (execution id, step name,
//! details map) so a failure can be traced back to the run and step that raised it.
//! The engine retries only the step-execution family; `Internal`, `Io` and `Json`
//! are treated as unexpected and fail the step on the first attempt.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Structured context attached to pipeline errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub execution_id: Option<String>,
    pub step_name: Option<String>,
    pub details: Map<String, Value>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{message}")]
    StepExecution { message: String, context: ErrorContext },

    #[error("Flow resolution failed: {message}")]
    FlowResolution { message: String, context: ErrorContext },

    #[error("Extraction failed: {message}")]
    Extraction { message: String, context: ErrorContext },

    #[error("Mapping failed: {message}")]
    Mapping { message: String, context: ErrorContext },

    #[error("Validation failed: {message}")]
    Validation { message: String, context: ErrorContext },

    #[error("API request failed: {message}")]
    ApiRequest {
        message: String,
        status_code: Option<u16>,
        response_body: Option<String>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage { message: String, context: ErrorContext },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn step(message: impl Into<String>) -> Self {
        Self::StepExecution { message: message.into(), context: ErrorContext::default() }
    }

    pub fn flow_resolution(message: impl Into<String>) -> Self {
        Self::FlowResolution { message: message.into(), context: ErrorContext::default() }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction { message: message.into(), context: ErrorContext::default() }
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping { message: message.into(), context: ErrorContext::default() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), context: ErrorContext::default() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(), context: ErrorContext::default() }
    }

    pub fn api_request(
        message: impl Into<String>,
        status_code: Option<u16>,
        response_body: Option<String>,
    ) -> Self {
        Self::ApiRequest {
            message: message.into(),
            status_code,
            response_body,
            context: ErrorContext::default(),
        }
    }

    /// True for the step-execution family, the only errors the engine retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StepExecution { .. }
                | Self::Extraction { .. }
                | Self::Mapping { .. }
                | Self::Validation { .. }
                | Self::ApiRequest { .. }
                | Self::Storage { .. }
        )
    }

    /// True for errors outside the taxonomy.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Io(_) | Self::Json(_))
    }

    /// Stable kind label used in diagnostics metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepExecution { .. } => "StepExecution",
            Self::FlowResolution { .. } => "FlowResolution",
            Self::Extraction { .. } => "Extraction",
            Self::Mapping { .. } => "Mapping",
            Self::Validation { .. } => "Validation",
            Self::ApiRequest { .. } => "ApiRequest",
            Self::Storage { .. } => "Storage",
            Self::Internal(_) => "Internal",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::StepExecution { context, .. }
            | Self::FlowResolution { context, .. }
            | Self::Extraction { context, .. }
            | Self::Mapping { context, .. }
            | Self::Validation { context, .. }
            | Self::ApiRequest { context, .. }
            | Self::Storage { context, .. } => Some(context),
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::StepExecution { context, .. }
            | Self::FlowResolution { context, .. }
            | Self::Extraction { context, .. }
            | Self::Mapping { context, .. }
            | Self::Validation { context, .. }
            | Self::ApiRequest { context, .. }
            | Self::Storage { context, .. } => Some(context),
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => None,
        }
    }

    /// Attach execution id and step name, keeping any values already set.
    pub fn in_step(mut self, execution_id: &str, step_name: &str) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.execution_id.get_or_insert_with(|| execution_id.to_string());
            ctx.step_name.get_or_insert_with(|| step_name.to_string());
        }
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.details.insert(key.to_string(), value.into());
        }
        self
    }
}
