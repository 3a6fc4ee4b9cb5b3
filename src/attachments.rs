//! Request-scoped attachment storage.
//!
//! `AttachmentSet::materialize` writes decoded attachments under
//! `<workdir>/.prwright-attachments/<run-id>/` and the returned guard removes
//! them when dropped, whichever way the pipeline exits.

use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::AttachmentError;
use crate::models::Attachment;

/// Directory (relative to the working tree) holding per-run attachment dirs.
pub const ATTACHMENT_ROOT: &str = ".prwright-attachments";

/// Owns the files written for one run. Removal happens in `Drop`.
#[derive(Debug)]
pub struct AttachmentSet {
    root: PathBuf,
    dir: Option<PathBuf>,
    paths: Vec<PathBuf>,
}

impl AttachmentSet {
    /// Write `attachments` for run `run_id`. With no attachments nothing is
    /// created on disk.
    pub fn materialize(
        workdir: &Path,
        run_id: Uuid,
        attachments: &[Attachment],
    ) -> Result<Self, AttachmentError> {
        let root = workdir.join(ATTACHMENT_ROOT);
        let mut set = Self {
            root,
            dir: None,
            paths: Vec::new(),
        };
        if attachments.is_empty() {
            return Ok(set);
        }

        exclude_from_git(workdir);

        let dir = set.root.join(run_id.to_string());
        std::fs::create_dir_all(&dir).map_err(|source| AttachmentError::Write {
            path: dir.clone(),
            source,
        })?;
        // From here on the guard owns the directory, so a failed write below
        // still cleans up.
        set.dir = Some(dir.clone());

        for (index, attachment) in attachments.iter().enumerate() {
            let file_name = format!("{:02}-{}", index + 1, safe_file_name(&attachment.name));
            let path = dir.join(file_name);
            std::fs::write(&path, &attachment.bytes)
                .map_err(|source| AttachmentError::Write {
                    path: path.clone(),
                    source,
                })?;
            let path = std::fs::canonicalize(&path).unwrap_or(path);
            set.paths.push(path);
        }

        tracing::debug!(count = set.paths.len(), dir = %dir.display(), "attachments written");
        Ok(set)
    }

    /// Absolute paths of the written files, in request order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for AttachmentSet {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove attachment directory");
        }
        // Fails harmlessly while another run still has files in the root.
        let _ = std::fs::remove_dir(&self.root);
    }
}

/// Reduce a client-supplied name to a single safe path component.
pub fn safe_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Make sure the agent cannot stage attachment files.
fn exclude_from_git(workdir: &Path) {
    let info_dir = workdir.join(".git").join("info");
    if !info_dir.parent().is_some_and(Path::is_dir) {
        return;
    }
    let exclude = info_dir.join("exclude");
    let entry = format!("/{}/", ATTACHMENT_ROOT);

    let existing = std::fs::read_to_string(&exclude).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == entry) {
        return;
    }

    let result = std::fs::create_dir_all(&info_dir).and_then(|_| {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{}", entry)
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "could not add attachment root to .git/info/exclude");
    }
}
