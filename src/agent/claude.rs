use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::stream::{Pipe, tail, tee_lines};
use super::{AgentOutput, AgentTask, CodingAgent};
use crate::errors::AgentError;

/// Capabilities granted to the agent: file edits, git staging/commits and
/// read-only inspection. `Read` is needed for attachment paths in the prompt.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &[
    "Edit",
    "Write",
    "Read",
    "Glob",
    "Grep",
    "Bash(git add:*)",
    "Bash(git commit:*)",
    "Bash(git status:*)",
    "Bash(git diff:*)",
];

/// Characters of diagnostic output attached to a failure.
const ERROR_TAIL_CHARS: usize = 4000;

/// Runs a Claude-compatible CLI in non-interactive (`--print`) mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    allowed_tools: Vec<String>,
    extra_args: Vec<String>,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        if !tools.is_empty() {
            self.allowed_tools = tools;
        }
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            prompt.to_string(),
            "--allowedTools".to_string(),
            self.allowed_tools.join(","),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl CodingAgent for ClaudeCli {
    async fn run(&self, workdir: &Path, task: &AgentTask) -> Result<AgentOutput, AgentError> {
        let prompt = task.prompt();
        tracing::info!(
            command = %self.command,
            attachments = task.attachments.len(),
            "starting agent"
        );

        // No kill_on_drop: a client disconnect must not interrupt the agent.
        let mut child = Command::new(&self.command)
            .args(self.args(&prompt))
            .current_dir(workdir)
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AgentError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        let (stdout, stderr) = tokio::join!(
            tee_lines(child.stdout.take(), Pipe::Stdout),
            tee_lines(child.stderr.take(), Pipe::Stderr),
        );
        // The exit status alone decides the outcome.
        let status = child.wait().await?;

        if !status.success() {
            let diagnostics = if stderr.trim().is_empty() {
                tail(&stdout, ERROR_TAIL_CHARS)
            } else {
                tail(&stderr, ERROR_TAIL_CHARS)
            };
            tracing::error!(code = ?status.code(), "agent exited unsuccessfully");
            return Err(AgentError::NonZeroExit {
                code: status.code(),
                stderr: diagnostics,
            });
        }

        tracing::info!("agent finished");
        Ok(AgentOutput { stdout, stderr })
    }
}
