use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::pipeline::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self { status, body: body.to_string() }
    }

    /// JSON body, or the raw text wrapped as `{"raw": ...}` when it is not JSON.
    pub fn json_or_raw(&self) -> Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::json!({ "raw": self.body }))
    }
}

/// Transport for intermediate insurer API calls.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Transport failures are errors; any HTTP status is a response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| PipelineError::api_request(format!("Invalid method '{}'", request.method), None, None))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_connect() {
                format!("Cannot connect to {}", request.url)
            } else if e.is_timeout() {
                format!("Request timed out after {}s", request.timeout.as_secs())
            } else {
                e.to_string()
            };
            PipelineError::api_request(message, None, None).with_detail("url", request.url.clone())
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(HttpResponse { status, body })
    }
}

/// Replays scripted responses in order (the last one repeats) and records requests.
pub struct MockHttpClient {
    responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    pub fn new(response: HttpResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Ok(response)])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self::new(HttpResponse { status, body: body.to_string() })
    }

    /// Queue another response after the ones already scripted.
    pub fn then(self, response: HttpResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(response));
        self
    }

    /// Queue a transport failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(PipelineError::api_request(message, None, None)),
            None => Err(PipelineError::api_request("No scripted response", None, None)),
        }
    }
}
