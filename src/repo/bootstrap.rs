//! First-start clone of the managed repository.
//!
//! The clone is made into a hidden sibling directory and renamed into place
//! once complete, so `GitWorkdir::is_ready` flips from false to true exactly
//! once and never sees a partial checkout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::{GitWorkdir, run_git};

/// Clone `clone_url` into the working directory unless a checkout is already
/// there. Returns `true` when a clone was made.
pub async fn ensure_checkout(workdir: &GitWorkdir, clone_url: &str, base: &str) -> Result<bool> {
    if workdir.is_ready() {
        tracing::debug!(path = %workdir.path().display(), "repository already present");
        return Ok(false);
    }

    let target = workdir.path();
    if target.exists() && !is_empty_dir(target)? {
        bail!(
            "{} exists, is not a git checkout, and is not empty; refusing to clone over it",
            target.display()
        );
    }

    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let staging = staging_path(target);
    let staging_str = staging.to_string_lossy().to_string();

    tracing::info!(url = %redact_url(clone_url), base, "cloning repository");
    let cloned = run_git(
        parent,
        &[
            "clone",
            "--origin",
            workdir.remote(),
            "--branch",
            base,
            clone_url,
            &staging_str,
        ],
    )
    .await;

    if let Err(e) = cloned {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e).context("Initial clone failed");
    }

    if target.exists() {
        std::fs::remove_dir(target)
            .with_context(|| format!("Failed to remove empty {}", target.display()))?;
    }
    std::fs::rename(&staging, target).with_context(|| {
        format!(
            "Failed to move clone from {} to {}",
            staging.display(),
            target.display()
        )
    })?;

    tracing::info!(path = %target.display(), "repository ready");
    Ok(true)
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());
    target.with_file_name(format!(".{}.cloning-{}", name, uuid::Uuid::new_v4()))
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries =
        std::fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(entries.next().is_none())
}

/// Hide any `user:password@` credentials embedded in a clone URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => url.to_string(),
    }
}
