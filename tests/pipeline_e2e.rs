//! End-to-end tests: HTTP request in, branch pushed and pull request opened.
//!
//! A bare repository stands in for the hosting service, a scripted agent
//! stands in for the coding CLI and a recording forge stands in for the PR API.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use prwright::agent::{AgentOutput, AgentTask, CodingAgent};
use prwright::attachments::ATTACHMENT_ROOT;
use prwright::config::ServiceConfig;
use prwright::errors::AgentError;
use prwright::gate::{BearerAuth, Gate, RateLimiter};
use prwright::naming::BranchNamer;
use prwright::pipeline::PipelineRunner;
use prwright::publish::{Forge, PullRequestDraft};
use prwright::repo::GitWorkdir;
use prwright::server::{AppState, build_router};

const TOKEN: &str = "e2e-shared-secret-0001";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "e2e@example.com"]);
    git(dir, &["config", "user.name", "e2e"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Bare remote plus a managed clone of it on `master`.
struct Upstream {
    _dir: TempDir,
    remote: PathBuf,
    workdir: PathBuf,
}

impl Upstream {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let remote = dir.path().join("remote.git");
        let seed = dir.path().join("seed");
        let workdir = dir.path().join("work");

        git(dir.path(), &["init", "--bare", remote.to_str().unwrap()]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        configure_identity(&seed);
        std::fs::write(seed.join("index.html"), "<h1>status</h1>\n").unwrap();
        git(&seed, &["add", "index.html"]);
        git(&seed, &["commit", "-m", "initial"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "origin", "master"]);

        git(
            dir.path(),
            &["clone", remote.to_str().unwrap(), workdir.to_str().unwrap()],
        );
        configure_identity(&workdir);

        Self {
            _dir: dir,
            remote,
            workdir,
        }
    }

    fn remote_branches(&self) -> Vec<String> {
        git(
            &self.remote,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )
        .lines()
        .map(str::to_string)
        .collect()
    }
}

/// Commits one file per run, or nothing when `commit` is false.
struct StubAgent {
    commit: bool,
    /// Attachment paths and whether each existed while the agent ran.
    seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl StubAgent {
    fn new(commit: bool) -> Arc<Self> {
        Arc::new(Self {
            commit,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CodingAgent for StubAgent {
    async fn run(&self, workdir: &Path, task: &AgentTask) -> Result<AgentOutput, AgentError> {
        {
            let mut seen = self.seen.lock().unwrap();
            for path in &task.attachments {
                seen.push((path.clone(), path.exists()));
            }
        }
        if self.commit {
            std::fs::write(workdir.join("icon.svg"), "<svg/>\n").unwrap();
            git(workdir, &["add", "icon.svg"]);
            git(workdir, &["commit", "-m", "Add health icon"]);
        }
        Ok(AgentOutput::default())
    }
}

struct StubForge {
    drafts: Mutex<Vec<PullRequestDraft>>,
}

#[async_trait]
impl Forge for StubForge {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String> {
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push(draft.clone());
        Ok(format!("https://forge.example.com/pr/{}", drafts.len()))
    }
}

struct Service {
    router: Router,
    upstream: Upstream,
    agent: Arc<StubAgent>,
    forge: Arc<StubForge>,
}

fn service(agent_commits: bool) -> Service {
    let upstream = Upstream::new();
    let agent = StubAgent::new(agent_commits);
    let forge = Arc::new(StubForge {
        drafts: Mutex::new(Vec::new()),
    });

    let pipeline = Arc::new(PipelineRunner::new(
        GitWorkdir::new(&upstream.workdir, "origin"),
        "master",
        BranchNamer::deterministic(),
        agent.clone(),
        forge.clone(),
    ));

    let mut config = ServiceConfig::default();
    config.auth.token = Some(TOKEN.to_string());
    let gate = Gate::new(
        BearerAuth::new(config.auth.token.as_deref()),
        RateLimiter::new(5, Duration::from_secs(86_400)),
    );
    let state = Arc::new(AppState {
        pipeline,
        gate: Arc::new(gate),
    });

    Service {
        router: build_router(state, &config),
        upstream,
        agent,
        forge,
    }
}

fn submit(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_request_becomes_pull_request() {
    let svc = service(true);

    let response = svc
        .router
        .clone()
        .oneshot(submit(serde_json::json!({ "request": "add a health icon" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["pr"], "https://forge.example.com/pr/1");
    let branch = body["branch"].as_str().unwrap();
    assert!(branch.starts_with("claude/add-a-health-icon-"), "got {}", branch);

    assert!(svc.upstream.remote_branches().iter().any(|b| b == branch));

    let drafts = svc.forge.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].title, "add a health icon");
    assert_eq!(drafts[0].source_branch, branch);
    assert_eq!(drafts[0].target_branch, "master");
}

#[tokio::test]
async fn test_agent_without_commits_is_rejected() {
    let svc = service(false);

    let response = svc
        .router
        .clone()
        .oneshot(submit(serde_json::json!({ "request": "do nothing" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("No changes were committed")
    );
    assert_eq!(svc.upstream.remote_branches(), vec!["master".to_string()]);
    assert!(svc.forge.drafts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_attachments_exist_only_during_the_run() {
    let svc = service(true);
    let attachment_root = svc.upstream.workdir.join(ATTACHMENT_ROOT);
    assert!(!attachment_root.exists());

    // "aGVsbG8=" is "hello".
    let response = svc
        .router
        .clone()
        .oneshot(submit(serde_json::json!({
            "request": "match this mockup",
            "images": [{ "name": "mockup.png", "data": "data:image/png;base64,aGVsbG8=" }]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = svc.agent.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1, "attachment missing while the agent ran");
    assert!(!seen[0].0.exists());
    assert!(!attachment_root.exists() || std::fs::read_dir(&attachment_root).unwrap().next().is_none());
}

#[tokio::test]
async fn test_consecutive_requests_start_from_baseline() {
    let svc = service(true);

    for expected in 1..=2 {
        let response = svc
            .router
            .clone()
            .oneshot(submit(serde_json::json!({ "request": "add a health icon" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["pr"],
            format!("https://forge.example.com/pr/{}", expected)
        );
    }

    // Each branch carries exactly one commit on top of master.
    let branches = svc.upstream.remote_branches();
    assert_eq!(branches.len(), 3);
    for branch in branches.iter().filter(|b| b.starts_with("claude/")) {
        let count = git(
            &svc.upstream.remote,
            &["rev-list", "--count", &format!("master..{}", branch)],
        );
        assert_eq!(count, "1", "branch {} diverged", branch);
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected_before_the_pipeline() {
    let svc = service(true);

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"request": "add a health icon"}"#))
        .unwrap();
    let response = svc.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(svc.agent.seen.lock().unwrap().is_empty());
    assert_eq!(svc.upstream.remote_branches(), vec!["master".to_string()]);
}
