//! `endorse-run <config.json> [role=path ...]`
//!
//! Runs one batch against local files and prints the run record as JSON.
//! A bare path (no `role=`) gets the `primary` role.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use endorsement_pipeline::config::Settings;
use endorsement_pipeline::pipeline::types::{RunStatus, PRIMARY_ROLE};
use endorsement_pipeline::pipeline::{
    FileDescriptor, FlowResolver, InsureeConfig, PipelineEngine, PipelineError, RunRecord, Services,
    TracingObserver,
};
use endorsement_pipeline::telemetry;

const USAGE: &str = "usage: endorse-run <config.json> [role=path ...]";

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((config_path, file_args)) = args.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(Path::new(config_path), file_args).await {
        Ok(record) => {
            let completed = record.status == RunStatus::Completed;
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Failed to serialize run record: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, file_args: &[String]) -> Result<RunRecord, PipelineError> {
    let raw = tokio::fs::read_to_string(config_path).await?;
    let config: InsureeConfig = serde_json::from_str(&raw)?;
    let files = file_args
        .iter()
        .enumerate()
        .map(|(index, arg)| file_descriptor(index, arg))
        .collect::<Result<Vec<_>, _>>()?;

    let services = Services::from_settings(Settings::from_env())?;
    let engine = PipelineEngine::new(FlowResolver::with_defaults(services))
        .with_observer(std::sync::Arc::new(TracingObserver));

    let batch_id = uuid::Uuid::new_v4().to_string();
    let insuree_id = config.code.to_lowercase();
    let result = engine.run(&batch_id, &insuree_id, config.clone(), files).await;
    Ok(RunRecord::from_result(&result, &config))
}

fn file_descriptor(index: usize, arg: &str) -> Result<FileDescriptor, PipelineError> {
    let (role, path) = match arg.split_once('=') {
        Some((role, path)) if !role.is_empty() => (role, path),
        _ => (PRIMARY_ROLE, arg),
    };
    let path = PathBuf::from(path);
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::validation(format!("Not a file path: '{arg}'")))?;

    Ok(FileDescriptor::new(&format!("file-{}", index + 1), filename, role)
        .with_locator(&path.to_string_lossy()))
}
