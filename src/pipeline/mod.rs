//! Endorsement pipeline core: run context, step contract, flow resolution,
//! the engine that executes a flow, and the built-in steps.

pub mod audit;
pub mod collaborators;
pub mod context;
pub mod engine;
pub mod error;
pub mod insuree;
pub mod observer;
pub mod resolver;
pub mod step;
pub mod steps;
pub mod types;

pub use audit::RunRecord;
pub use context::{CanonicalRecord, ContextSummary, FileInfo, RunContext, ValidationResult};
pub use engine::{PipelineEngine, RunResult};
pub use error::{ErrorContext, PipelineError};
pub use insuree::InsureeConfig;
pub use observer::{NoopObserver, StepObserver, TracingObserver};
pub use resolver::{FlowBuilder, FlowResolver, Services, DEFAULT_FLOW};
pub use step::{Step, StepResult, StepTimer};
pub use types::{FileDescriptor, FileFormat, RunStatus, StepStatus};
