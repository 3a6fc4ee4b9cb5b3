//! One change request, end to end.
//!
//! ```text
//! sync baseline -> name branch -> create branch -> write attachments
//!   -> run agent -> verify -> push + open PR
//! ```
//!
//! Runs are serialized on a per-working-directory mutex; the attachment guard
//! is dropped before the lock is released, on every exit path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{AgentTask, ClaudeCli, CodingAgent};
use crate::attachments::AttachmentSet;
use crate::config::ServiceConfig;
use crate::errors::PipelineError;
use crate::models::{BranchName, ChangeRequest, PullRequestResult};
use crate::naming::{BranchNamer, NamingStrategy};
use crate::publish::{Forge, Publisher, forge_from_config};
use crate::repo::GitWorkdir;
use crate::verify::verify_agent_branch;

pub struct PipelineRunner {
    workdir: GitWorkdir,
    base_branch: String,
    namer: BranchNamer,
    agent: Arc<dyn CodingAgent>,
    publisher: Publisher,
    lock: Mutex<()>,
}

impl PipelineRunner {
    pub fn new(
        workdir: GitWorkdir,
        base_branch: impl Into<String>,
        namer: BranchNamer,
        agent: Arc<dyn CodingAgent>,
        forge: Arc<dyn Forge>,
    ) -> Self {
        let base_branch = base_branch.into();
        Self {
            publisher: Publisher::new(forge, base_branch.clone()),
            workdir,
            base_branch,
            namer,
            agent,
            lock: Mutex::new(()),
        }
    }

    /// Wire the production agent, namer and forge from configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let workdir = GitWorkdir::new(&config.repo.path, &config.repo.remote);

        let namer = match config.naming.strategy {
            NamingStrategy::Deterministic => BranchNamer::deterministic(),
            NamingStrategy::Assisted => BranchNamer::assisted(
                &config.agent.command,
                &config.naming.model,
                Duration::from_secs(config.naming.timeout_secs),
            ),
        }
        .with_max_slug_len(config.naming.max_slug_len);

        let agent = ClaudeCli::new(&config.agent.command)
            .with_allowed_tools(config.agent.allowed_tools.clone())
            .with_extra_args(config.agent.extra_args.clone());

        let forge = forge_from_config(&config.forge, &config.repo.path)?;

        Ok(Self::new(
            workdir,
            &config.repo.base_branch,
            namer,
            Arc::new(agent),
            forge,
        ))
    }

    pub fn workdir(&self) -> &GitWorkdir {
        &self.workdir
    }

    pub fn is_ready(&self) -> bool {
        self.workdir.is_ready()
    }

    /// Process one change request. Queues behind any run already in flight.
    pub async fn run(&self, request: ChangeRequest) -> Result<PullRequestResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", %run_id);
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        request: ChangeRequest,
    ) -> Result<PullRequestResult, PipelineError> {
        if !self.is_ready() {
            return Err(PipelineError::NotReady);
        }

        let _exclusive = self.lock.lock().await;
        tracing::info!(
            attachments = request.attachments().len(),
            "pipeline started"
        );

        self.workdir
            .sync_to_baseline(&self.base_branch)
            .await
            .map_err(PipelineError::Sync)?;

        let named = self.namer.derive(request.text()).await;
        let branch = BranchName::from_id(&named.id);
        self.workdir
            .create_branch(branch.as_str())
            .await
            .map_err(|source| PipelineError::BranchCreate {
                branch: branch.to_string(),
                source,
            })?;
        tracing::info!(branch = %branch, source = ?named.source, "branch created");

        // Declared after the lock guard, so it is dropped first.
        let attachments =
            AttachmentSet::materialize(self.workdir.path(), run_id, request.attachments())?;

        let task = AgentTask::new(request.text(), attachments.paths().to_vec());
        self.agent.run(self.workdir.path(), &task).await?;

        let verified = verify_agent_branch(&self.workdir, &self.base_branch, &branch)?;

        let url = self
            .publisher
            .publish(&self.workdir, &verified.branch, request.text())
            .await?;

        tracing::info!(branch = %verified.branch, commits = verified.commits, pr = %url, "pipeline finished");
        Ok(PullRequestResult {
            url,
            branch: verified.branch,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use regex::Regex;

    use super::test_support::{Behaviour, ScriptedAgent};
    use super::*;
    use crate::attachments::ATTACHMENT_ROOT;
    use crate::models::Attachment;
    use crate::publish::test_support::RecordingForge;
    use crate::repo::test_support::GitFixture;

    struct Harness {
        fixture: GitFixture,
        agent: Arc<ScriptedAgent>,
        forge: Arc<RecordingForge>,
        runner: Arc<PipelineRunner>,
    }

    fn harness_with(behaviour: Behaviour, forge: Arc<RecordingForge>) -> Harness {
        let fixture = GitFixture::new();
        let agent = Arc::new(ScriptedAgent::new(behaviour));
        let runner = Arc::new(PipelineRunner::new(
            GitWorkdir::new(&fixture.workdir, "origin"),
            "master",
            BranchNamer::deterministic(),
            agent.clone(),
            forge.clone(),
        ));
        Harness {
            fixture,
            agent,
            forge,
            runner,
        }
    }

    fn harness(behaviour: Behaviour) -> Harness {
        harness_with(behaviour, RecordingForge::ok("https://forge.test/pr/1"))
    }

    fn pushed_claude_branches(h: &Harness) -> Vec<String> {
        h.fixture
            .remote_branches()
            .into_iter()
            .filter(|b| b.starts_with("claude/"))
            .collect()
    }

    fn image(name: &str) -> Attachment {
        Attachment {
            name: name.to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[tokio::test]
    async fn test_successful_run_publishes_branch() {
        let h = harness(Behaviour::Commit);
        let result = h
            .runner
            .run(ChangeRequest::new("add a health icon").unwrap())
            .await
            .unwrap();

        assert_eq!(result.url, "https://forge.test/pr/1");
        assert!(
            Regex::new(r"^claude/add-a-health-icon-\d+$")
                .unwrap()
                .is_match(&result.branch)
        );
        assert!(h.fixture.remote_has_branch(&result.branch));
        assert_eq!(h.forge.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_commits_is_reported_and_nothing_pushed() {
        let h = harness(Behaviour::Noop);
        let err = h
            .runner
            .run(ChangeRequest::new("noop").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoCommits { .. }));
        assert!(pushed_claude_branches(&h).is_empty());
        assert_eq!(h.forge.call_count(), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_never_pushes() {
        let h = harness(Behaviour::Fail);
        let err = h
            .runner
            .run(ChangeRequest::new("break things").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Agent(_)));
        assert!(err.to_string().contains("agent crashed"));
        assert!(pushed_claude_branches(&h).is_empty());
        assert_eq!(h.forge.call_count(), 0);
    }

    #[tokio::test]
    async fn test_branch_switch_blocks_publication_despite_commits() {
        let h = harness(Behaviour::SwitchToBaseline);
        let err = h
            .runner
            .run(ChangeRequest::new("sneak onto master").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SafetyCheck { .. }));
        assert!(pushed_claude_branches(&h).is_empty());
        assert_eq!(h.forge.call_count(), 0);
        // The baseline on the remote is untouched.
        let remote = git2::Repository::open_bare(&h.fixture.remote).unwrap();
        let master = remote.find_branch("master", git2::BranchType::Local).unwrap();
        let tip = master.get().peel_to_commit().unwrap();
        assert_eq!(tip.summary(), Some("initial"));
    }

    #[tokio::test]
    async fn test_attachments_exist_only_during_the_run() {
        let h = harness(Behaviour::Commit);
        let root = h.fixture.workdir.join(ATTACHMENT_ROOT);
        assert!(!root.exists());

        let request = ChangeRequest::with_attachments(
            "match the mockup",
            vec![image("mock.png"), image("detail.png")],
        )
        .unwrap();
        let result = h.runner.run(request).await.unwrap();

        let seen = h.agent.seen_attachments.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(path, existed)| *existed && path.is_absolute()));
        assert!(!root.exists());

        // Attachments never end up in the published branch.
        let files = crate::repo::test_support::git(
            &h.fixture.workdir,
            &["ls-tree", "-r", "--name-only", &result.branch],
        );
        assert!(!files.contains(ATTACHMENT_ROOT));
    }

    #[tokio::test]
    async fn test_attachments_removed_after_failure() {
        let h = harness(Behaviour::Fail);
        let root = h.fixture.workdir.join(ATTACHMENT_ROOT);

        let request =
            ChangeRequest::with_attachments("x", vec![image("mock.png")]).unwrap();
        assert!(h.runner.run(request).await.is_err());

        assert!(h.agent.seen_attachments.lock().unwrap()[0].1);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_not_ready_without_checkout() {
        let dir = tempfile::TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(Behaviour::Commit));
        let runner = PipelineRunner::new(
            GitWorkdir::new(dir.path().join("missing"), "origin"),
            "master",
            BranchNamer::deterministic(),
            agent.clone(),
            RecordingForge::ok("https://forge.test/pr/1"),
        );

        assert!(!runner.is_ready());
        let err = runner.run(ChangeRequest::new("x").unwrap()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotReady));
        assert_eq!(agent.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_failure_stops_before_agent() {
        let h = harness(Behaviour::Commit);
        std::fs::remove_dir_all(&h.fixture.remote).unwrap();

        let err = h
            .runner
            .run(ChangeRequest::new("x").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sync(_)));
        assert_eq!(h.agent.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forge_failure_reports_orphaned_branch() {
        let h = harness_with(Behaviour::Commit, RecordingForge::failing("HTTP 500"));
        let err = h
            .runner
            .run(ChangeRequest::new("add icon").unwrap())
            .await
            .unwrap_err();

        let branch = err.orphaned_branch().expect("branch was pushed").to_string();
        assert!(h.fixture.remote_has_branch(&branch));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_are_serialized() {
        let h = harness(Behaviour::Commit);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let runner = h.runner.clone();
                tokio::spawn(async move {
                    runner
                        .run(ChangeRequest::new(format!("change number {}", i)).unwrap())
                        .await
                })
            })
            .collect();

        let mut branches = Vec::new();
        for handle in handles {
            branches.push(handle.await.unwrap().unwrap().branch);
        }

        assert_eq!(h.agent.max_in_flight.load(Ordering::SeqCst), 1);
        branches.sort();
        branches.dedup();
        assert_eq!(branches.len(), 3);
        assert_eq!(pushed_claude_branches(&h).len(), 3);
    }

    #[tokio::test]
    async fn test_each_run_starts_from_baseline() {
        let h = harness(Behaviour::Commit);
        let first = h.runner.run(ChangeRequest::new("first").unwrap()).await.unwrap();
        let second = h.runner.run(ChangeRequest::new("second").unwrap()).await.unwrap();

        // The second branch contains only its own commit, not the first run's.
        let count = crate::repo::test_support::git(
            &h.fixture.workdir,
            &["rev-list", "--count", &format!("master..{}", second.branch)],
        );
        assert_eq!(count, "1");
        assert_ne!(first.branch, second.branch);
    }
}
