//! Typed error hierarchy for the change-request pipeline.
//!
//! One enum per stage, wrapped by `PipelineError`:
//! - `GitError`: git subprocess and repository inspection failures
//! - `AgentError`: coding agent spawn / exit failures
//! - `AttachmentError`: decoding and writing request attachments
//! - `PublishError`: push and pull-request creation failures
//!
//! `PipelineError::status()` maps every failure onto the HTTP status the
//! caller receives.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// Errors from git subprocesses and `git2` inspection.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("Failed to inspect repository: {0}")]
    Inspect(#[from] git2::Error),
}

/// Errors from a single coding-agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Failed to read agent output: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Errors while materializing attachments for one request.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment {index} is not valid base64: {source}")]
    InvalidEncoding {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Failed to write attachment {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from pushing the verified branch and opening the pull request.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to push branch {branch}: {source}")]
    Push {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Branch {branch} was pushed but pull request creation failed: {message}")]
    PullRequestFailed { branch: String, message: String },
}

/// Every way a pipeline run can end without a pull request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Repository is not ready yet: the initial checkout has not completed")]
    NotReady,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("Failed to synchronize repository with the baseline: {0}")]
    Sync(#[source] GitError),

    #[error("Failed to create branch {branch}: {source}")]
    BranchCreate {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("Agent run failed: {0}")]
    Agent(#[from] AgentError),

    #[error(
        "Safety check failed: the working copy is on '{branch}', not a claude/ branch; refusing to publish"
    )]
    SafetyCheck { branch: String },

    #[error("Failed to verify agent output: {0}")]
    Verify(#[source] GitError),

    #[error("No changes were committed. The agent finished without creating any commits on {branch}")]
    NoCommits { branch: String },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl PipelineError {
    /// HTTP status class for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::InvalidRequest(_)
            | PipelineError::NoCommits { .. }
            | PipelineError::Attachment(AttachmentError::InvalidEncoding { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Branch left on the remote when publication stopped half way.
    pub fn orphaned_branch(&self) -> Option<&str> {
        match self {
            PipelineError::Publish(PublishError::PullRequestFailed { branch, .. }) => {
                Some(branch.as_str())
            }
            _ => None,
        }
    }
}
