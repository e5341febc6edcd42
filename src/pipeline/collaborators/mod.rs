//! Narrow I/O adapters the pipeline consumes: object storage, the LLM
//! provider, insurer HTTP APIs, record persistence and submission history.
//!
//! Each seam is a trait with one production adapter and one in-memory
//! implementation for tests and dry runs.

pub mod http;
pub mod llm;
pub mod sink;
pub mod storage;

pub use http::{HttpClient, HttpRequest, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use llm::{GeminiClient, LlmClient, MockLlmClient};
pub use sink::{
    InMemoryRecordSink, JsonRecordSink, KnownSubmissions, NoPriorSubmissions, PersistBatch,
    RecordSink, SubmissionLookup,
};
pub use storage::{InMemoryStorage, LocalStorage, StorageReader};
