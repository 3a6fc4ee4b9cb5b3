//! Coding agent invocation.
//!
//! The pipeline only sees the `CodingAgent` trait; `ClaudeCli` is the
//! production implementation that shells out to a Claude-compatible CLI.

mod claude;
pub mod stream;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use claude::{ClaudeCli, DEFAULT_ALLOWED_TOOLS};

use crate::errors::AgentError;

/// What the agent is asked to do for one run.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub request: String,
    /// Absolute paths of files written by the attachment manager.
    pub attachments: Vec<PathBuf>,
}

impl AgentTask {
    pub fn new(request: impl Into<String>, attachments: Vec<PathBuf>) -> Self {
        Self {
            request: request.into(),
            attachments,
        }
    }

    /// Full prompt handed to the agent.
    pub fn prompt(&self) -> String {
        let mut prompt = self.request.trim().to_string();

        if !self.attachments.is_empty() {
            prompt.push_str("\n\nReference files attached to this request (read them before starting):\n");
            for path in &self.attachments {
                prompt.push_str(&format!("- {}\n", path.display()));
            }
        }

        prompt.push_str(
            "\n\nWhen the change is complete, stage and commit it on the current branch. \
             Do not switch, create, or delete branches.",
        );
        prompt
    }
}

/// Buffered output of a successful agent run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A black-box process that edits and commits files in `workdir`.
///
/// Implementations must resolve `Ok` only when the agent reported success.
/// There is no timeout at this layer.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    async fn run(&self, workdir: &Path, task: &AgentTask) -> Result<AgentOutput, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_attachments() {
        let task = AgentTask::new("  add a health icon  ", vec![]);
        let prompt = task.prompt();
        assert!(prompt.starts_with("add a health icon\n\n"));
        assert!(!prompt.contains("Reference files"));
        assert!(prompt.contains("commit it on the current branch"));
    }

    #[test]
    fn prompt_lists_attachment_paths_in_order() {
        let task = AgentTask::new(
            "match this mockup",
            vec![
                PathBuf::from("/work/.prwright-attachments/r/01-a.png"),
                PathBuf::from("/work/.prwright-attachments/r/02-b.png"),
            ],
        );
        let prompt = task.prompt();
        let first = prompt.find("01-a.png").unwrap();
        let second = prompt.find("02-b.png").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Reference files"));
        assert!(prompt.contains("Do not switch"));
    }
}
