use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::{Forge, PullRequestDraft};

/// Opens pull requests with the GitHub CLI. Authentication is whatever `gh`
/// is configured with (usually `GITHUB_TOKEN`).
#[derive(Debug, Clone)]
pub struct GhCliForge {
    command: String,
    workdir: PathBuf,
}

impl GhCliForge {
    pub fn new(command: impl Into<String>, workdir: &Path) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.to_path_buf(),
        }
    }
}

#[async_trait]
impl Forge for GhCliForge {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String> {
        let output = tokio::process::Command::new(&self.command)
            .args([
                "pr",
                "create",
                "--base",
                &draft.target_branch,
                "--head",
                &draft.source_branch,
                "--title",
                &draft.title,
                "--body",
                &draft.body,
            ])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run gh pr create")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("gh pr create failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout).context("Invalid UTF-8 in gh output")?;
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .map(str::to_string)
            .with_context(|| format!("gh pr create printed no URL: {}", stdout.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_gh(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("gh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn draft() -> PullRequestDraft {
        PullRequestDraft::for_request("add a health icon", "claude/add-1", "master")
    }

    #[tokio::test]
    async fn test_returns_last_url_line_and_passes_branches() {
        let bin = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let gh = fake_gh(
            &bin,
            "printf '%s\\n' \"$@\" > args.txt\n\
             echo 'Creating pull request for claude/add-1 into master'\n\
             echo 'https://github.com/org/repo/pull/12'",
        );

        let url = GhCliForge::new(gh, workdir.path())
            .open_pull_request(&draft())
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/org/repo/pull/12");

        let args = std::fs::read_to_string(workdir.path().join("args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(&args[..6], ["pr", "create", "--base", "master", "--head", "claude/add-1"]);
        assert_eq!(args[7], "add a health icon");
    }

    #[tokio::test]
    async fn test_failure_surfaces_stderr() {
        let bin = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let gh = fake_gh(&bin, "echo 'GraphQL: No commits between master and claude/add-1' >&2; exit 1");

        let err = GhCliForge::new(gh, workdir.path())
            .open_pull_request(&draft())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No commits between"));
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let bin = TempDir::new().unwrap();
        let workdir = TempDir::new().unwrap();
        let gh = fake_gh(&bin, "echo done");

        let err = GhCliForge::new(gh, workdir.path())
            .open_pull_request(&draft())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no URL"));
    }
}
