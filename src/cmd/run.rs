//! `prwright run`: one pipeline run from the terminal, without the HTTP gate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use prwright::config::ServiceConfig;
use prwright::logging;
use prwright::models::{Attachment, ChangeRequest};
use prwright::pipeline::PipelineRunner;
use prwright::repo::bootstrap;

pub async fn cmd_run(
    config_path: Option<&Path>,
    text: &str,
    attachment_paths: &[PathBuf],
    repo_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = ServiceConfig::resolve(config_path)?;
    if let Some(path) = repo_path {
        config.repo.path = path;
    }
    let _log_guard = logging::init(&config.logging)?;

    let attachments = attachment_paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read attachment {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "attachment".to_string());
            Ok(Attachment { name, bytes })
        })
        .collect::<Result<Vec<_>>>()?;
    let request = ChangeRequest::with_attachments(text, attachments)?;

    let runner = PipelineRunner::from_config(&config)?;
    if !runner.is_ready()
        && let Some(url) = config.repo.clone_url.as_deref()
    {
        bootstrap::ensure_checkout(runner.workdir(), url, &config.repo.base_branch).await?;
    }

    let result = match runner.run(request).await {
        Ok(result) => result,
        Err(err) => {
            if let Some(branch) = err.orphaned_branch() {
                eprintln!("Branch {} was pushed but has no pull request.", branch);
            }
            return Err(err.into());
        }
    };
    println!("Pull request: {}", result.url);
    println!("Branch:       {}", result.branch);
    Ok(())
}
