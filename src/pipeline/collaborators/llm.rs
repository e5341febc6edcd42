use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::pipeline::error::PipelineError;

/// Multimodal LLM that reads a whole file and answers with text (expected JSON).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier recorded on extracted records.
    fn model(&self) -> &str;

    async fn extract(
        &self,
        file_path: &Path,
        prompt: &str,
        system: &str,
    ) -> Result<String, PipelineError>;
}

// ═══════════════════════════════════════════════════════════
// Gemini
// ═══════════════════════════════════════════════════════════

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent` client with inline file data.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            timeout,
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let mut client = Self::new(
            &settings.gemini_api_key,
            &settings.gemini_model,
            // Document extraction is slower than ordinary API calls.
            settings.http_timeout * 4,
        )?;
        client.temperature = settings.llm_temperature;
        client.max_tokens = settings.llm_max_tokens;
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(
        &self,
        file_path: &Path,
        prompt: &str,
        system: &str,
    ) -> Result<String, PipelineError> {
        if self.api_key.is_empty() {
            return Err(PipelineError::extraction("Gemini API key not configured"));
        }

        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            PipelineError::extraction(format!("Cannot read {}: {e}", file_path.display()))
        })?;
        let mime_type = mime_guess::from_path(file_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let body = GenerateRequest {
            system_instruction: Content { role: None, parts: vec![Part::Text { text: system }] },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type,
                            data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    PipelineError::extraction(format!("Cannot reach Gemini at {}", self.base_url))
                } else if e.is_timeout() {
                    PipelineError::extraction(format!(
                        "Gemini request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    PipelineError::extraction(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::extraction(format!("Gemini returned HTTP {}", status.as_u16()))
                .with_detail("response_body", body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::extraction(format!("Unreadable Gemini response: {e}")))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(PipelineError::extraction("Gemini returned no text"));
        }
        Ok(text)
    }
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

/// Returns a fixed response and records which files it was asked about.
pub struct MockLlmClient {
    response: Result<String, String>,
    model: String,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
            model: "mock-llm".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every call fails with an extraction error.
    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            ..Self::new("")
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(
        &self,
        file_path: &Path,
        _prompt: &str,
        _system: &str,
    ) -> Result<String, PipelineError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(file_path.to_path_buf());
        self.response.clone().map_err(PipelineError::extraction)
    }
}
