//! Read-only repository inspection through `git2`.

use std::path::Path;

use git2::Repository;

use crate::errors::GitError;

/// Short name of the checked-out branch, or `HEAD` when detached.
pub fn current_branch(path: &Path) -> Result<String, GitError> {
    let repo = Repository::open(path)?;
    let head = repo.head()?;
    if !head.is_branch() {
        return Ok("HEAD".to_string());
    }
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Number of commits reachable from HEAD but not from `base`.
///
/// `base` is resolved as a local branch first, then as `<remote>/<base>`.
pub fn commits_ahead_of(path: &Path, base: &str, remote: &str) -> Result<usize, GitError> {
    let repo = Repository::open(path)?;
    let base_commit = repo
        .revparse_single(base)
        .or_else(|_| repo.revparse_single(&format!("{}/{}", remote, base)))?
        .peel_to_commit()?;

    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.hide(base_commit.id())?;

    let mut count = 0;
    for oid in walk {
        oid?;
        count += 1;
    }
    Ok(count)
}
