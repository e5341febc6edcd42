//! Download every batch file from object storage to local staging.
//!
//! A locator that already names an existing local file is used in place,
//! which lets local runs work without a storage backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::pipeline::collaborators::StorageReader;
use crate::pipeline::context::{FileInfo, RunContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::PRIMARY_ROLE;

pub struct DownloadFileStep {
    storage: Arc<dyn StorageReader>,
    staging_dir: PathBuf,
}

impl DownloadFileStep {
    pub fn new(storage: Arc<dyn StorageReader>, staging_dir: PathBuf) -> Self {
        Self { storage, staging_dir }
    }

    async fn download_one(
        &self,
        file: &mut FileInfo,
        execution_id: &str,
        insuree_id: &str,
    ) -> Result<(), PipelineError> {
        let locator = file
            .locator
            .clone()
            .unwrap_or_else(|| default_locator(insuree_id, &file.file_id, &file.filename));
        file.locator = Some(locator.clone());

        let local = Path::new(&locator);
        if tokio::fs::metadata(local).await.map(|m| m.is_file()).unwrap_or(false) {
            let bytes = tokio::fs::read(local).await?;
            file.sha256 = Some(sha256_hex(&bytes));
            file.local_path = Some(local.to_path_buf());
            file.staged = false;
            tracing::info!(path = %locator, role = %file.role, "Using local file directly");
            return Ok(());
        }

        let bytes = self.storage.fetch(&locator).await?;
        let dir = self.staging_dir.join(execution_id).join(&file.role);
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(safe_file_name(&file.filename));
        tokio::fs::write(&dest, &bytes).await?;

        file.sha256 = Some(sha256_hex(&bytes));
        file.local_path = Some(dest);
        file.staged = true;
        Ok(())
    }
}

#[async_trait]
impl Step for DownloadFileStep {
    fn name(&self) -> &str {
        "download_files"
    }

    fn description(&self) -> &str {
        "Download raw file(s) from object storage"
    }

    fn retryable(&self) -> bool {
        true
    }

    fn max_retries(&self) -> u32 {
        3
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());

        if ctx.files.is_empty() {
            let id = ctx.batch_id.clone();
            ctx.files
                .push(FileInfo::new(&id, &format!("endorsement_file_{id}"), PRIMARY_ROLE));
        }

        let execution_id = ctx.execution_id.clone();
        let insuree_id = ctx.insuree_id.clone();
        let mut downloaded = 0;
        let mut failures = Vec::new();

        for file in ctx.files.iter_mut() {
            file.error = None;
            match self.download_one(file, &execution_id, &insuree_id).await {
                Ok(()) => {
                    downloaded += 1;
                    tracing::info!(
                        file_id = %file.file_id,
                        role = %file.role,
                        filename = %file.filename,
                        "File downloaded"
                    );
                }
                Err(e) => {
                    tracing::error!(file_id = %file.file_id, role = %file.role, error = %e, "File download failed");
                    file.error = Some(e.to_string());
                    failures.push(format!(
                        "Failed to download {} (role={}): {}",
                        file.filename, file.role, e
                    ));
                }
            }
        }
        for failure in failures {
            ctx.add_error(failure);
        }

        if downloaded == 0 {
            return Err(PipelineError::step("No files could be downloaded")
                .in_step(&ctx.execution_id, self.name()));
        }

        tracing::info!(downloaded, total = ctx.files.len(), is_batch = ctx.is_batch(), "All downloads complete");

        let files: Vec<_> = ctx
            .files
            .iter()
            .map(|f| json!({ "role": f.role, "filename": f.filename, "ok": f.is_ok(), "sha256": f.sha256 }))
            .collect();
        Ok(timer.success(json!({
            "downloaded": downloaded,
            "total_files": ctx.files.len(),
            "is_batch": ctx.is_batch(),
            "files": files,
        })))
    }

    async fn rollback(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        for file in ctx.files.iter().filter(|f| f.staged) {
            if let Some(path) = &file.local_path {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => tracing::info!(path = %path.display(), "Staged file cleaned up"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Staged copies live only as long as the run.
    async fn cleanup(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let dir = self.staging_dir.join(&ctx.execution_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(path = %dir.display(), "Staging directory removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Storage key used when a file descriptor carries no locator.
pub fn default_locator(insuree_id: &str, file_id: &str, filename: &str) -> String {
    format!("raw/{insuree_id}/{file_id}/{filename}")
}

fn safe_file_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "file".to_string())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::collaborators::InMemoryStorage;
    use crate::pipeline::insuree::InsureeConfig;
    use crate::pipeline::types::FileDescriptor;

    fn step(storage: InMemoryStorage, staging: &Path) -> DownloadFileStep {
        DownloadFileStep::new(Arc::new(storage), staging.to_path_buf())
    }

    fn ctx(files: Vec<FileDescriptor>) -> RunContext {
        RunContext::new("batch-7", "ins-1", InsureeConfig::new("X", "X")).with_files(files)
    }

    #[tokio::test]
    async fn stages_files_from_storage_with_default_locator() {
        let staging = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new().with_object("raw/ins-1/f1/data.csv", "a,b\n1,2\n");
        let mut ctx = ctx(vec![FileDescriptor::new("f1", "data.csv", "primary")]);

        let result = step(storage, staging.path()).execute(&mut ctx).await.unwrap();

        let file = &ctx.files[0];
        assert_eq!(file.locator.as_deref(), Some("raw/ins-1/f1/data.csv"));
        let path = file.local_path.as_ref().unwrap();
        assert!(path.starts_with(staging.path()));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n1,2\n");
        assert_eq!(file.sha256.as_ref().unwrap().len(), 64);
        assert!(file.staged);
        assert_eq!(result.metadata["downloaded"], 1);
        assert_eq!(result.metadata["files"][0]["ok"], true);
    }

    #[tokio::test]
    async fn synthesizes_primary_file_when_none_given() {
        let staging = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new()
            .with_object("raw/ins-1/batch-7/endorsement_file_batch-7", "x");
        let mut ctx = ctx(Vec::new());

        step(storage, staging.path()).execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.files.len(), 1);
        assert_eq!(ctx.files[0].file_id, "batch-7");
        assert_eq!(ctx.files[0].filename, "endorsement_file_batch-7");
        assert_eq!(ctx.files[0].role, PRIMARY_ROLE);
    }

    #[tokio::test]
    async fn per_file_failures_are_isolated() {
        let staging = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new().with_object("raw/ins-1/f1/a.xlsx", "x");
        let mut ctx = ctx(vec![
            FileDescriptor::new("f1", "a.xlsx", "endorsement_data"),
            FileDescriptor::new("f2", "b.pdf", "endorsement_pdf"),
        ]);

        let result = step(storage, staging.path()).execute(&mut ctx).await.unwrap();

        assert!(ctx.files[0].is_ok());
        assert!(ctx.files[1].error.as_ref().unwrap().contains("Object not found"));
        assert_eq!(ctx.errors.len(), 1);
        assert!(ctx.errors[0].starts_with("Failed to download b.pdf (role=endorsement_pdf)"));
        assert_eq!(result.metadata["files"][1]["ok"], false);
    }

    #[tokio::test]
    async fn fails_when_nothing_downloaded() {
        let staging = tempfile::tempdir().unwrap();
        let mut ctx = ctx(vec![FileDescriptor::new("f1", "a.xlsx", "primary")]);
        let err = step(InMemoryStorage::new(), staging.path())
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "No files could be downloaded");
    }

    #[tokio::test]
    async fn local_path_is_used_in_place_and_survives_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.csv");
        std::fs::write(&local, "n\n1\n").unwrap();
        let staging = tempfile::tempdir().unwrap();
        let mut ctx = ctx(vec![FileDescriptor::new("f1", "local.csv", "primary")
            .with_locator(local.to_str().unwrap())]);

        let step = step(InMemoryStorage::new(), staging.path());
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.files[0].local_path.as_deref(), Some(local.as_path()));
        assert!(!ctx.files[0].staged);

        step.rollback(&mut ctx).await.unwrap();
        assert!(local.exists());
    }

    #[tokio::test]
    async fn rollback_removes_staged_files() {
        let staging = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new().with_object("raw/ins-1/f1/a.csv", "x");
        let mut ctx = ctx(vec![FileDescriptor::new("f1", "a.csv", "primary")]);
        let step = step(storage, staging.path());
        step.execute(&mut ctx).await.unwrap();
        let staged = ctx.files[0].local_path.clone().unwrap();
        assert!(staged.exists());

        step.rollback(&mut ctx).await.unwrap();
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn cleanup_removes_run_staging_dir_but_not_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.csv");
        std::fs::write(&local, "n\n1\n").unwrap();
        let staging = tempfile::tempdir().unwrap();
        let storage = InMemoryStorage::new().with_object("raw/ins-1/f2/a.csv", "x");
        let mut ctx = ctx(vec![
            FileDescriptor::new("f1", "local.csv", "primary").with_locator(local.to_str().unwrap()),
            FileDescriptor::new("f2", "a.csv", "secondary"),
        ]);
        let step = step(storage, staging.path());
        step.execute(&mut ctx).await.unwrap();
        let run_dir = staging.path().join(&ctx.execution_id);
        assert!(run_dir.exists());

        step.cleanup(&mut ctx).await.unwrap();
        assert!(!run_dir.exists());
        assert!(local.exists());
        // Idempotent.
        step.cleanup(&mut ctx).await.unwrap();
    }

    #[test]
    fn file_names_cannot_escape_staging() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name(""), "file");
    }
}
