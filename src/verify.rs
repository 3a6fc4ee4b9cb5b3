//! Post-agent safety checks.
//!
//! Nothing is published unless the checkout is still on a pipeline-created
//! branch and that branch carries at least one commit the baseline lacks.

use crate::errors::PipelineError;
use crate::models::BranchName;
use crate::naming::BRANCH_PREFIX;
use crate::repo::GitWorkdir;

/// A branch that passed both checks and may be pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBranch {
    pub branch: String,
    pub commits: usize,
}

/// Check the working copy after the agent exits successfully.
///
/// The branch that is verified (and later published) is the one actually
/// checked out, which may differ from `expected` if the agent created another
/// prefixed branch.
pub fn verify_agent_branch(
    workdir: &GitWorkdir,
    base: &str,
    expected: &BranchName,
) -> Result<VerifiedBranch, PipelineError> {
    let branch = workdir.current_branch().map_err(PipelineError::Verify)?;

    if !branch.starts_with(BRANCH_PREFIX) {
        tracing::error!(
            branch = %branch,
            expected = %expected,
            "agent left the working copy on a non-pipeline branch"
        );
        return Err(PipelineError::SafetyCheck { branch });
    }

    if branch != expected.as_str() {
        tracing::warn!(
            branch = %branch,
            expected = %expected,
            "agent switched to a different pipeline branch; publishing the checked-out one"
        );
    }

    let commits = workdir
        .commits_ahead_of(base)
        .map_err(PipelineError::Verify)?;
    if commits == 0 {
        return Err(PipelineError::NoCommits { branch });
    }

    tracing::info!(branch = %branch, commits, "agent output verified");
    Ok(VerifiedBranch { branch, commits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::{GitFixture, git};

    fn setup() -> (GitFixture, GitWorkdir, BranchName) {
        let fixture = GitFixture::new();
        let workdir = GitWorkdir::new(&fixture.workdir, "origin");
        let branch = BranchName::from_id("add-icon-1700000000000");
        git(&fixture.workdir, &["checkout", "-b", branch.as_str()]);
        (fixture, workdir, branch)
    }

    #[test]
    fn test_passes_with_commits_on_pipeline_branch() {
        let (fixture, workdir, branch) = setup();
        fixture.commit_in_workdir("icon.svg", "<svg/>");

        let verified = verify_agent_branch(&workdir, "master", &branch).unwrap();
        assert_eq!(verified.branch, branch.as_str());
        assert_eq!(verified.commits, 1);
    }

    #[test]
    fn test_zero_commits_is_reported_not_fatal() {
        let (_fixture, workdir, branch) = setup();
        let err = verify_agent_branch(&workdir, "master", &branch).unwrap_err();
        assert!(matches!(err, PipelineError::NoCommits { .. }));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_baseline_branch_fails_even_with_commits() {
        let (fixture, workdir, branch) = setup();
        git(&fixture.workdir, &["checkout", "master"]);
        fixture.commit_in_workdir("oops.txt", "committed to master");

        let err = verify_agent_branch(&workdir, "master", &branch).unwrap_err();
        match err {
            PipelineError::SafetyCheck { branch } => assert_eq!(branch, "master"),
            other => panic!("expected SafetyCheck, got {:?}", other),
        }
    }

    #[test]
    fn test_other_unprefixed_branch_fails() {
        let (fixture, workdir, branch) = setup();
        git(&fixture.workdir, &["checkout", "-b", "feature/sneaky"]);
        fixture.commit_in_workdir("x.txt", "x");

        let err = verify_agent_branch(&workdir, "master", &branch).unwrap_err();
        assert!(matches!(err, PipelineError::SafetyCheck { .. }));
    }

    #[test]
    fn test_detached_head_fails() {
        let (fixture, workdir, branch) = setup();
        fixture.commit_in_workdir("x.txt", "x");
        let sha = git(&fixture.workdir, &["rev-parse", "HEAD"]);
        git(&fixture.workdir, &["checkout", "--detach", &sha]);

        let err = verify_agent_branch(&workdir, "master", &branch).unwrap_err();
        assert!(matches!(err, PipelineError::SafetyCheck { .. }));
    }

    #[test]
    fn test_different_prefixed_branch_is_published_as_is() {
        let (fixture, workdir, branch) = setup();
        git(&fixture.workdir, &["checkout", "-b", "claude/agent-chosen"]);
        fixture.commit_in_workdir("x.txt", "x");

        let verified = verify_agent_branch(&workdir, "master", &branch).unwrap();
        assert_eq!(verified.branch, "claude/agent-chosen");
    }
}
