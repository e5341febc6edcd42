//! Configurable HTTP call that an insurer flow can place anywhere between
//! steps. The response lands in the scratch map for later steps to read.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};

use crate::config::DEFAULT_API_BASE_URL;
use crate::pipeline::collaborators::{HttpClient, HttpRequest};
use crate::pipeline::context::RunContext;
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};

/// `{name}` URL placeholders.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").unwrap());

pub const DEFAULT_RESPONSE_KEY: &str = "api_response";
pub const DEFAULT_EXPECTED_STATUSES: [u16; 3] = [200, 201, 202];
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the JSON request body from the run state. `None` sends no body.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, ctx: &RunContext) -> Option<Value>;
}

impl<F> RequestBuilder for F
where
    F: Fn(&RunContext) -> Option<Value> + Send + Sync,
{
    fn build(&self, ctx: &RunContext) -> Option<Value> {
        self(ctx)
    }
}

/// Extra request headers, e.g. auth tokens.
pub trait HeadersBuilder: Send + Sync {
    fn headers(&self, ctx: &RunContext) -> Vec<(String, String)>;
}

impl<F> HeadersBuilder for F
where
    F: Fn(&RunContext) -> Vec<(String, String)> + Send + Sync,
{
    fn headers(&self, ctx: &RunContext) -> Vec<(String, String)> {
        self(ctx)
    }
}

pub struct ApiRequestStep {
    name: String,
    description: String,
    method: String,
    url_template: String,
    http: Arc<dyn HttpClient>,
    request_builder: Option<Arc<dyn RequestBuilder>>,
    headers_builder: Option<Arc<dyn HeadersBuilder>>,
    response_key: String,
    timeout: Duration,
    retryable: bool,
    max_retries: u32,
    expected_statuses: Vec<u16>,
    default_base_url: String,
}

impl ApiRequestStep {
    pub fn new(
        name: &str,
        description: &str,
        method: &str,
        url_template: &str,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            method: method.to_ascii_uppercase(),
            url_template: url_template.to_string(),
            http,
            request_builder: None,
            headers_builder: None,
            response_key: DEFAULT_RESPONSE_KEY.to_string(),
            timeout: DEFAULT_API_TIMEOUT,
            retryable: true,
            max_retries: 3,
            expected_statuses: DEFAULT_EXPECTED_STATUSES.to_vec(),
            default_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn with_request_builder(mut self, builder: Arc<dyn RequestBuilder>) -> Self {
        self.request_builder = Some(builder);
        self
    }

    pub fn with_headers_builder(mut self, builder: Arc<dyn HeadersBuilder>) -> Self {
        self.headers_builder = Some(builder);
        self
    }

    pub fn with_response_key(mut self, key: &str) -> Self {
        self.response_key = key.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retryable: bool, max_retries: u32) -> Self {
        self.retryable = retryable;
        self.max_retries = max_retries;
        self
    }

    pub fn with_expected_statuses(mut self, statuses: &[u16]) -> Self {
        self.expected_statuses = statuses.to_vec();
        self
    }

    /// `{base_url}` used when the insurer config has no `api_base_url`.
    pub fn with_default_base_url(mut self, base_url: &str) -> Self {
        self.default_base_url = base_url.to_string();
        self
    }

    /// Substitute `{name}` placeholders; unknown names are left in place.
    pub fn resolve_url(&self, ctx: &RunContext) -> String {
        let values = placeholder_values(ctx, &self.default_base_url);

        let mut unresolved = Vec::new();
        let url = PLACEHOLDER.replace_all(&self.url_template, |caps: &Captures| {
            let key = &caps[1];
            match values.get(key).and_then(Value::as_str) {
                Some(value) => value.to_string(),
                None => {
                    unresolved.push(key.to_string());
                    caps[0].to_string()
                }
            }
        });

        if !unresolved.is_empty() {
            tracing::warn!(url_template = %self.url_template, missing = ?unresolved, "URL placeholder not resolved");
        }
        url.into_owned()
    }
}

/// Placeholder table. Later sources win: fixed run values, then scratch
/// strings and `{key}_id` for scratch objects with an `id`, then config strings.
fn placeholder_values(ctx: &RunContext, default_base_url: &str) -> Map<String, Value> {
    let mut values = Map::new();
    let base_url = ctx.config.api_base_url.as_deref().unwrap_or(default_base_url);
    values.insert("base_url".into(), json!(base_url));
    values.insert("insuree_id".into(), json!(ctx.insuree_id));
    values.insert("file_id".into(), json!(ctx.batch_id));
    values.insert("execution_id".into(), json!(ctx.execution_id));

    for (key, value) in &ctx.scratch {
        match value {
            Value::String(s) => {
                values.insert(key.clone(), json!(s));
            }
            Value::Object(obj) => {
                if let Some(id) = obj.get("id").filter(|id| !id.is_null()) {
                    let id = match id {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    values.insert(format!("{key}_id"), json!(id));
                }
            }
            _ => {}
        }
    }

    for (key, value) in ctx.config.string_values() {
        values.insert(key, json!(value));
    }
    values
}

#[async_trait]
impl Step for ApiRequestStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let url = self.resolve_url(ctx);
        let body = self.request_builder.as_ref().and_then(|b| b.build(ctx));

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(builder) = &self.headers_builder {
            headers.extend(builder.headers(ctx));
        }

        tracing::info!(
            execution_id = %ctx.execution_id,
            step = %self.name,
            method = %self.method,
            url = %url,
            has_body = body.is_some(),
            "API request"
        );

        let response = self
            .http
            .send(HttpRequest {
                method: self.method.clone(),
                url: url.clone(),
                headers,
                body,
                timeout: self.timeout,
            })
            .await
            .map_err(|e| e.in_step(&ctx.execution_id, &self.name))?;

        if !self.expected_statuses.contains(&response.status) {
            tracing::warn!(step = %self.name, status = response.status, "Unexpected API status");
            return Err(PipelineError::api_request(
                format!("{} {} returned {}", self.method, url, response.status),
                Some(response.status),
                Some(response.body.clone()),
            )
            .in_step(&ctx.execution_id, &self.name));
        }

        ctx.set_scratch(&self.response_key, response.json_or_raw());

        tracing::info!(step = %self.name, status = response.status, response_key = %self.response_key, "API request complete");

        Ok(timer.success(json!({
            "method": self.method,
            "url": url,
            "status_code": response.status,
            "response_key": self.response_key,
        })))
    }
}
