pub mod config;
pub mod extraction;
pub mod insurers;
pub mod pipeline;
pub mod telemetry;

pub use pipeline::{FlowResolver, InsureeConfig, PipelineEngine, RunContext, RunRecord, RunResult, Services};
