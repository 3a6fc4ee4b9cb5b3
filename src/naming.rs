//! Branch naming.
//!
//! The namer turns free request text into a `<slug>-<millis>` identifier.
//! Two strategies exist:
//!
//! | Strategy        | Source of the slug                                   |
//! |-----------------|------------------------------------------------------|
//! | `Deterministic` | `slugify()` over the request text                    |
//! | `Assisted`      | a fast model asked for a 2-4 word name, then slugified; any failure falls back to `Deterministic` |
//!
//! The `claude/` prefix is applied by the caller (see `BranchName::from_id`).

use std::process::Stdio;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

/// Prefix every pipeline-created branch carries.
pub const BRANCH_PREFIX: &str = "claude/";

/// Upper bound on slug length.
pub const MAX_SLUG_LEN: usize = 50;

const FALLBACK_SLUG: &str = "change";

static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\s-]").unwrap());

static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_-]+").unwrap());

/// How the slug part of a branch name is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
    #[default]
    Deterministic,
    Assisted,
}

impl std::fmt::Display for NamingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingStrategy::Deterministic => write!(f, "deterministic"),
            NamingStrategy::Assisted => write!(f, "assisted"),
        }
    }
}

impl std::str::FromStr for NamingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" => Ok(NamingStrategy::Deterministic),
            "assisted" => Ok(NamingStrategy::Assisted),
            _ => anyhow::bail!(
                "Invalid branch naming strategy '{}'. Valid values: deterministic, assisted",
                s
            ),
        }
    }
}

/// Convert free text into a lowercase, hyphen-separated slug of at most
/// `max_len` characters. Never returns an empty string.
pub fn slugify(text: &str, max_len: usize) -> String {
    let lowered = text.to_lowercase();
    let stripped = DISALLOWED_CHARS.replace_all(&lowered, "");
    let collapsed = SEPARATOR_RUNS.replace_all(&stripped, "-");
    let slug = collapsed.trim_matches('-');

    // Only ASCII survives the filter above, so byte slicing is safe.
    let slug = if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-')
    } else {
        slug
    };

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug.to_string()
    }
}

/// Millisecond timestamps that strictly increase within this process.
///
/// When two calls land in the same wall-clock millisecond the second one
/// is bumped to `last + 1`.
pub fn unique_epoch_millis() -> i64 {
    static LAST: AtomicI64 = AtomicI64::new(0);

    let now = Utc::now().timestamp_millis();
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Where a slug came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugSource {
    Assisted,
    /// Deterministic naming, either configured or as the assisted fallback.
    Deterministic,
}

/// Output of the namer: the unprefixed `<slug>-<millis>` id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBranch {
    pub id: String,
    pub source: SlugSource,
}

/// Why an assisted naming attempt was abandoned.
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("failed to spawn naming model: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("naming model exited with code {0:?}")]
    Exit(Option<i32>),

    #[error("naming model timed out after {0:?}")]
    TimedOut(Duration),

    #[error("naming model returned no usable name")]
    Empty,
}

/// Derives branch ids from request text.
#[derive(Debug, Clone)]
pub struct BranchNamer {
    strategy: NamingStrategy,
    command: String,
    model: String,
    timeout: Duration,
    max_slug_len: usize,
}

impl BranchNamer {
    /// A namer that only ever uses `slugify()`.
    pub fn deterministic() -> Self {
        Self {
            strategy: NamingStrategy::Deterministic,
            command: "claude".to_string(),
            model: "haiku".to_string(),
            timeout: Duration::from_secs(15),
            max_slug_len: MAX_SLUG_LEN,
        }
    }

    /// A namer that asks `command` (a Claude-compatible CLI) for a name first.
    pub fn assisted(command: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            strategy: NamingStrategy::Assisted,
            command: command.into(),
            model: model.into(),
            timeout,
            max_slug_len: MAX_SLUG_LEN,
        }
    }

    pub fn with_max_slug_len(mut self, max_slug_len: usize) -> Self {
        self.max_slug_len = max_slug_len.clamp(1, MAX_SLUG_LEN);
        self
    }

    /// Produce `<slug>-<millis>`. Never fails.
    pub async fn derive(&self, text: &str) -> NamedBranch {
        let (slug, source) = match self.strategy {
            NamingStrategy::Deterministic => {
                (slugify(text, self.max_slug_len), SlugSource::Deterministic)
            }
            NamingStrategy::Assisted => match self.suggest(text).await {
                Ok(slug) => (slug, SlugSource::Assisted),
                Err(e) => {
                    tracing::warn!(error = %e, "assisted branch naming failed, using deterministic slug");
                    (slugify(text, self.max_slug_len), SlugSource::Deterministic)
                }
            },
        };

        NamedBranch {
            id: format!("{}-{}", slug, unique_epoch_millis()),
            source,
        }
    }

    /// Ask the naming model for a short name, bounded by `self.timeout`.
    pub async fn suggest(&self, text: &str) -> Result<String, SuggestError> {
        let prompt = format!(
            "Suggest a git branch name for the change request below. \
             Reply with 2-4 lowercase words separated by hyphens and nothing else.\n\n\
             Change request: {}",
            text
        );

        let output = Command::new(&self.command)
            .args(["--print", &prompt, "--model", &self.model])
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| SuggestError::TimedOut(self.timeout))?
            .map_err(SuggestError::Spawn)?;

        if !output.status.success() {
            return Err(SuggestError::Exit(output.status.code()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let candidate = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or(SuggestError::Empty)?;

        let slug = slugify(candidate, self.max_slug_len);
        if slug == FALLBACK_SLUG && !candidate.to_lowercase().contains(FALLBACK_SLUG) {
            return Err(SuggestError::Empty);
        }
        Ok(slug)
    }
}
