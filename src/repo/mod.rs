//! The managed working directory.
//!
//! `GitWorkdir` wraps the single checkout the service operates on. State
//! transitions (fetch, checkout, reset, branch, push) go through the `git`
//! CLI so credentials helpers and hooks behave exactly as they would for an
//! operator; read-only inspection goes through `git2` (see `inspect`).

pub mod bootstrap;
pub mod inspect;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::errors::GitError;

/// Handle to the shared checkout. Cheap to clone; holds no open resources.
#[derive(Debug, Clone)]
pub struct GitWorkdir {
    path: PathBuf,
    remote: String,
}

impl GitWorkdir {
    pub fn new(path: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote: remote.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// The initial checkout has completed once `.git` exists. Bootstrap
    /// clones elsewhere and renames into place, so this never observes a
    /// half-written clone.
    pub fn is_ready(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Run `git <args>` inside the working directory, returning stdout.
    pub async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        run_git(&self.path, args).await
    }

    /// Fetch the remote, switch to `base` and hard-reset it to the remote tip.
    ///
    /// The checkout is forced: edits left behind by an earlier run are
    /// discarded rather than blocking every later request.
    pub async fn sync_to_baseline(&self, base: &str) -> Result<(), GitError> {
        let upstream = format!("{}/{}", self.remote, base);
        self.git(&["fetch", "--prune", &self.remote]).await?;
        self.git(&["checkout", "-f", base]).await?;
        self.git(&["reset", "--hard", &upstream]).await?;
        tracing::info!(base, upstream = %upstream, "working copy reset to baseline");
        Ok(())
    }

    /// Create and switch to `branch` from the current HEAD.
    pub async fn create_branch(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["checkout", "-b", branch]).await?;
        Ok(())
    }

    /// Push `branch` to the remote and set its upstream.
    pub async fn push(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["push", "-u", &self.remote, branch]).await?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String, GitError> {
        inspect::current_branch(&self.path)
    }

    pub fn commits_ahead_of(&self, base: &str) -> Result<usize, GitError> {
        inspect::commits_ahead_of(&self.path, base, &self.remote)
    }
}

/// Run git in `cwd` without ever prompting for credentials.
pub(crate) async fn run_git(cwd: &Path, args: &[&str]) -> Result<String, GitError> {
    let joined = args.join(" ");
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| GitError::Spawn {
            args: joined.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError::CommandFailed {
            args: joined,
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
