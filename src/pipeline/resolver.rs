//! Flow resolver: maps an insurer config to a fresh, ordered step list.
//!
//! Lookup order: exact `code`, then `flow_type`, then `DEFAULT`. Builders
//! construct new step instances on every call, so no per-run step state
//! is shared between runs.

use std::sync::Arc;

use indexmap::IndexMap;

use super::collaborators::{
    GeminiClient, HttpClient, JsonRecordSink, LlmClient, LocalStorage, NoPriorSubmissions,
    RecordSink, ReqwestHttpClient, StorageReader, SubmissionLookup,
};
use super::error::PipelineError;
use super::insuree::InsureeConfig;
use super::step::Step;
use super::steps::{
    DetectDuplicatesStep, DetectFormatStep, DownloadFileStep, ExtractDataStep, MapCanonicalStep,
    PersistRecordsStep, ScoreConfidenceStep, ValidateBusinessRulesStep, ValidateSchemaStep,
};
use crate::config::Settings;
use crate::insurers;

/// Zero-argument constructor of a flow's step list.
pub type FlowBuilder = Arc<dyn Fn() -> Vec<Box<dyn Step>> + Send + Sync>;

pub const DEFAULT_FLOW: &str = "DEFAULT";

// ═══════════════════════════════════════════════════════════
// Services
// ═══════════════════════════════════════════════════════════

/// Collaborators shared by the steps a flow builder creates.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub storage: Arc<dyn StorageReader>,
    pub llm: Arc<dyn LlmClient>,
    pub http: Arc<dyn HttpClient>,
    pub sink: Arc<dyn RecordSink>,
    pub submissions: Arc<dyn SubmissionLookup>,
}

impl Services {
    pub fn new(
        settings: Settings,
        storage: Arc<dyn StorageReader>,
        llm: Arc<dyn LlmClient>,
        http: Arc<dyn HttpClient>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            storage,
            llm,
            http,
            sink,
            submissions: Arc::new(NoPriorSubmissions),
        }
    }

    pub fn with_submissions(mut self, submissions: Arc<dyn SubmissionLookup>) -> Self {
        self.submissions = submissions;
        self
    }

    /// Production adapters configured from settings.
    pub fn from_settings(settings: Settings) -> Result<Self, PipelineError> {
        let llm = GeminiClient::from_settings(&settings)?;
        Ok(Self::new(
            settings.clone(),
            Arc::new(LocalStorage::new(settings.storage_root.clone())),
            Arc::new(llm),
            Arc::new(ReqwestHttpClient::new()),
            Arc::new(JsonRecordSink::new(settings.output_dir.clone())),
        ))
    }
}

// ═══════════════════════════════════════════════════════════
// Common flow segments
// ═══════════════════════════════════════════════════════════

/// Steps every flow runs before extraction.
pub fn common_pre_steps(services: &Services) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(DownloadFileStep::new(
            services.storage.clone(),
            services.settings.staging_dir.clone(),
        )),
        Box::new(DetectFormatStep),
    ]
}

/// Steps every flow runs after canonical mapping.
pub fn common_post_steps(services: &Services) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(ValidateSchemaStep),
        Box::new(ValidateBusinessRulesStep::new()),
        Box::new(DetectDuplicatesStep::new(services.submissions.clone())),
        Box::new(ScoreConfidenceStep),
        Box::new(PersistRecordsStep::new(services.sink.clone())),
    ]
}

/// Download, detect, extract, map, then the common post steps.
pub fn default_flow(services: &Services) -> Vec<Box<dyn Step>> {
    let mut steps = common_pre_steps(services);
    steps.push(Box::new(ExtractDataStep::new(services.llm.clone())));
    steps.push(Box::new(MapCanonicalStep));
    steps.extend(common_post_steps(services));
    steps
}

// ═══════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FlowResolver {
    registry: IndexMap<String, FlowBuilder>,
}

impl FlowResolver {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in flows: DEFAULT, INSURER_A, INSURER_B, ABHI.
    pub fn with_defaults(services: Services) -> Self {
        let mut resolver = Self::new();

        let s = services.clone();
        resolver.register_flow(DEFAULT_FLOW, Arc::new(move || default_flow(&s)));
        let s = services.clone();
        resolver.register_flow(insurers::insurer_a::CODE, Arc::new(move || insurers::insurer_a::flow(&s)));
        let s = services.clone();
        resolver.register_flow(insurers::insurer_b::CODE, Arc::new(move || insurers::insurer_b::flow(&s)));
        let s = services;
        resolver.register_flow(insurers::abhi::CODE, Arc::new(move || insurers::abhi::flow(&s)));

        resolver
    }

    /// Add or replace a flow builder.
    pub fn register_flow(&mut self, key: &str, builder: FlowBuilder) {
        if self.registry.insert(key.to_string(), builder).is_some() {
            tracing::debug!(flow = key, "Flow builder replaced");
        }
    }

    /// Registered keys in registration order.
    pub fn list_flows(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    pub fn resolve(&self, config: &InsureeConfig) -> Result<Vec<Box<dyn Step>>, PipelineError> {
        let code = config.code.as_str();

        if let Some(builder) = self.registry.get(code) {
            tracing::info!(insuree_code = code, "Flow resolved by insurer code");
            return Ok(builder());
        }

        if let Some(flow_type) = config.flow_type.as_deref().filter(|f| !f.is_empty()) {
            if let Some(builder) = self.registry.get(flow_type) {
                tracing::info!(insuree_code = code, flow_type, "Flow resolved by flow_type");
                return Ok(builder());
            }
        }

        if let Some(builder) = self.registry.get(DEFAULT_FLOW) {
            tracing::info!(insuree_code = code, "Flow resolved to DEFAULT");
            return Ok(builder());
        }

        Err(PipelineError::flow_resolution(format!(
            "No flow registered for insurer '{code}' and no DEFAULT flow"
        ))
        .with_detail("insuree_code", code))
    }
}
