//! Publishing a verified branch: push, then open a pull request.
//!
//! The forge is pluggable (`Forge` trait). A failure after the push leaves the
//! branch on the remote; it is reported as `PublishError::PullRequestFailed`
//! so callers can tell it apart from a failure that never left the machine.

mod bitbucket;
mod github;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use bitbucket::BitbucketForge;
pub use github::GhCliForge;

use crate::config::{ForgeProvider, ForgeSection};
use crate::errors::PublishError;
use crate::repo::GitWorkdir;

/// Longest pull request title before truncation.
pub const MAX_TITLE_LEN: usize = 72;

const ATTRIBUTION: &str = "_Opened automatically by prwright from a change request._";

/// Everything a forge needs to open one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub source_branch: String,
    pub target_branch: String,
}

impl PullRequestDraft {
    pub fn for_request(text: &str, source_branch: &str, target_branch: &str) -> Self {
        Self {
            title: pr_title(text),
            body: pr_body(text),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
        }
    }
}

/// A hosted git service that can open pull requests.
#[async_trait]
pub trait Forge: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a pull request and return its user-facing URL.
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String>;
}

/// First non-empty line of the request, bounded to `MAX_TITLE_LEN`.
pub fn pr_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Automated change");
    if line.chars().count() <= MAX_TITLE_LEN {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_TITLE_LEN - 3).collect();
    format!("{}...", cut.trim_end())
}

pub fn pr_body(text: &str) -> String {
    format!("## Request\n\n{}\n\n---\n{}", text.trim(), ATTRIBUTION)
}

pub struct Publisher {
    forge: Arc<dyn Forge>,
    base_branch: String,
}

impl Publisher {
    pub fn new(forge: Arc<dyn Forge>, base_branch: impl Into<String>) -> Self {
        Self {
            forge,
            base_branch: base_branch.into(),
        }
    }

    /// Push `branch` and open a pull request into the baseline.
    pub async fn publish(
        &self,
        workdir: &GitWorkdir,
        branch: &str,
        request_text: &str,
    ) -> Result<String, PublishError> {
        workdir
            .push(branch)
            .await
            .map_err(|source| PublishError::Push {
                branch: branch.to_string(),
                source,
            })?;
        tracing::info!(branch, "branch pushed");

        let draft = PullRequestDraft::for_request(request_text, branch, &self.base_branch);
        match self.forge.open_pull_request(&draft).await {
            Ok(url) => {
                tracing::info!(branch, forge = self.forge.name(), url = %url, "pull request opened");
                Ok(url)
            }
            Err(e) => {
                tracing::warn!(
                    branch,
                    forge = self.forge.name(),
                    error = %format!("{:#}", e),
                    "pull request creation failed; branch left on remote"
                );
                Err(PublishError::PullRequestFailed {
                    branch: branch.to_string(),
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

/// Build the configured forge for a checkout at `workdir`.
pub fn forge_from_config(section: &ForgeSection, workdir: &Path) -> Result<Arc<dyn Forge>> {
    let forge: Arc<dyn Forge> = match section.provider {
        ForgeProvider::Github => Arc::new(GhCliForge::new(&section.gh_command, workdir)),
        ForgeProvider::Bitbucket => Arc::new(BitbucketForge::from_section(&section.bitbucket)?),
    };
    Ok(forge)
}
