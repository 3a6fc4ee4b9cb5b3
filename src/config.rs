//! Service configuration.
//!
//! Layers, lowest precedence first:
//! 1. built-in defaults
//! 2. a TOML file (`--config <path>`, or `prwright.toml` in the current directory)
//! 3. environment variables (a `.env` file is loaded into the environment first)
//! 4. CLI flags, applied by the `serve` command
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [repo]
//! path = "/srv/checkout"
//! base_branch = "master"
//! clone_url = "https://bitbucket.org/team/app.git"
//!
//! [auth]
//! token = "change-me"
//!
//! [rate_limit]
//! max_requests = 5
//! window_secs = 86400
//!
//! [cors]
//! allowed_origins = ["https://app.example.com"]
//!
//! [naming]
//! strategy = "assisted"
//! model = "haiku"
//!
//! [forge]
//! provider = "bitbucket"
//!
//! [forge.bitbucket]
//! workspace = "team"
//! repo_slug = "app"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_ALLOWED_TOOLS;
use crate::naming::{MAX_SLUG_LEN, NamingStrategy};

/// Looked up in the current directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "prwright.toml";

const REDACTED: &str = "***";

/// Which forge opens pull requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeProvider {
    /// `gh pr create`
    #[default]
    Github,
    /// Bitbucket Cloud REST API
    Bitbucket,
}

impl std::fmt::Display for ForgeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForgeProvider::Github => write!(f, "github"),
            ForgeProvider::Bitbucket => write!(f, "bitbucket"),
        }
    }
}

impl std::str::FromStr for ForgeProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" | "gh" => Ok(ForgeProvider::Github),
            "bitbucket" => Ok(ForgeProvider::Bitbucket),
            _ => anyhow::bail!(
                "Invalid forge provider '{}'. Valid values: github, bitbucket",
                s
            ),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a request body, base64 attachments included.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSection {
    /// The managed checkout.
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Cloned into `path` on first start when set.
    #[serde(default)]
    pub clone_url: Option<String>,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_base_branch() -> String {
    "master".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for RepoSection {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            base_branch: default_base_branch(),
            remote: default_remote(),
            clone_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
    /// Bearer token required on `POST /`. Unset disables authentication.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    /// Requests allowed per client per window. 0 disables limiting.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    24 * 60 * 60
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsSection {
    /// Empty, or containing `*`, means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl CorsSection {
    pub fn is_permissive(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o.trim() == "*")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    /// Appended verbatim after the generated arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_allowed_tools() -> Vec<String> {
    DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            allowed_tools: default_allowed_tools(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingSection {
    #[serde(default)]
    pub strategy: NamingStrategy,
    #[serde(default = "default_naming_model")]
    pub model: String,
    #[serde(default = "default_naming_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_slug_len")]
    pub max_slug_len: usize,
}

fn default_naming_model() -> String {
    "haiku".to_string()
}

fn default_naming_timeout_secs() -> u64 {
    15
}

fn default_max_slug_len() -> usize {
    MAX_SLUG_LEN
}

impl Default for NamingSection {
    fn default() -> Self {
        Self {
            strategy: NamingStrategy::default(),
            model: default_naming_model(),
            timeout_secs: default_naming_timeout_secs(),
            max_slug_len: default_max_slug_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitbucketSection {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub app_password: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub repo_slug: Option<String>,
    #[serde(default = "default_bitbucket_api_base")]
    pub api_base: String,
}

fn default_bitbucket_api_base() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}

impl Default for BitbucketSection {
    fn default() -> Self {
        Self {
            username: None,
            app_password: None,
            workspace: None,
            repo_slug: None,
            api_base: default_bitbucket_api_base(),
        }
    }
}

impl BitbucketSection {
    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("BITBUCKET_USERNAME", &self.username),
            ("BITBUCKET_APP_PASSWORD", &self.app_password),
            ("BITBUCKET_WORKSPACE", &self.workspace),
            ("BITBUCKET_REPO_SLUG", &self.repo_slug),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeSection {
    #[serde(default)]
    pub provider: ForgeProvider,
    /// GitHub CLI binary; it reads `GITHUB_TOKEN` itself.
    #[serde(default = "default_gh_command")]
    pub gh_command: String,
    #[serde(default)]
    pub bitbucket: BitbucketSection,
}

fn default_gh_command() -> String {
    "gh".to_string()
}

impl Default for ForgeSection {
    fn default() -> Self {
        Self {
            provider: ForgeProvider::default(),
            gh_command: default_gh_command(),
            bitbucket: BitbucketSection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub repo: RepoSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub cors: CorsSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub naming: NamingSection,
    #[serde(default)]
    pub forge: ForgeSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ServiceConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// File layer plus process environment. An explicit path must exist;
    /// the implicit `prwright.toml` is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`. Empty values
    /// count as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = v.trim().parse().with_context(|| format!("Invalid PORT '{}'", v))?;
        }
        if let Some(v) = get("REPO_PATH") {
            self.repo.path = PathBuf::from(v);
        }
        if let Some(v) = get("BASE_BRANCH") {
            self.repo.base_branch = v;
        }
        if let Some(v) = get("REPO_URL") {
            self.repo.clone_url = Some(v);
        }
        if let Some(v) = get("AUTH_TOKEN") {
            self.auth.token = Some(v);
        }
        if let Some(v) = get("RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_MAX '{}'", v))?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_WINDOW_SECS '{}'", v))?;
        }
        if let Some(v) = get("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("CLAUDE_CMD") {
            self.agent.command = v;
        }
        if let Some(v) = get("BRANCH_NAMING") {
            self.naming.strategy = v.parse()?;
        }
        if let Some(v) = get("NAMING_MODEL") {
            self.naming.model = v;
        }
        if let Some(v) = get("FORGE_PROVIDER") {
            self.forge.provider = v.parse()?;
        }
        let bitbucket = &mut self.forge.bitbucket;
        if let Some(v) = get("BITBUCKET_USERNAME") {
            bitbucket.username = Some(v);
        }
        if let Some(v) = get("BITBUCKET_APP_PASSWORD") {
            bitbucket.app_password = Some(v);
        }
        if let Some(v) = get("BITBUCKET_WORKSPACE") {
            bitbucket.workspace = Some(v);
        }
        if let Some(v) = get("BITBUCKET_REPO_SLUG") {
            bitbucket.repo_slug = Some(v);
        }
        if let Some(v) = get("BITBUCKET_API_BASE") {
            bitbucket.api_base = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        if let Some(v) = get("LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.auth.token.as_deref() {
            None => warnings.push(
                "Authentication is disabled (AUTH_TOKEN not set): anyone who can reach the service can open pull requests"
                    .to_string(),
            ),
            Some(token) if token.len() < 16 => {
                warnings.push("AUTH_TOKEN is shorter than 16 characters".to_string())
            }
            Some(_) => {}
        }

        if self.cors.is_permissive() {
            warnings.push("CORS allows requests from any origin".to_string());
        }

        if self.rate_limit.max_requests == 0 {
            warnings.push("Rate limiting is disabled (max_requests = 0)".to_string());
        } else if self.rate_limit.window_secs == 0 {
            warnings.push(
                "Rate limit window is 0 seconds, so every request starts a new window".to_string(),
            );
        }

        if !self.repo.path.join(".git").exists() && self.repo.clone_url.is_none() {
            warnings.push(format!(
                "{} is not a git checkout and REPO_URL is not set; the service will stay not-ready",
                self.repo.path.display()
            ));
        }

        if self.forge.provider == ForgeProvider::Bitbucket {
            let missing = self.forge.bitbucket.missing_fields();
            if !missing.is_empty() {
                warnings.push(format!(
                    "Bitbucket forge selected but missing: {}",
                    missing.join(", ")
                ));
            }
        }

        if self.naming.strategy == NamingStrategy::Assisted && self.naming.timeout_secs == 0 {
            warnings.push(
                "Assisted branch naming has a 0s timeout and will always fall back".to_string(),
            );
        }

        if self.naming.max_slug_len == 0 || self.naming.max_slug_len > MAX_SLUG_LEN {
            warnings.push(format!(
                "naming.max_slug_len {} is outside 1..={} and will be clamped",
                self.naming.max_slug_len, MAX_SLUG_LEN
            ));
        }

        warnings
    }

    /// Copy with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth.token.is_some() {
            copy.auth.token = Some(REDACTED.to_string());
        }
        if copy.forge.bitbucket.app_password.is_some() {
            copy.forge.bitbucket.app_password = Some(REDACTED.to_string());
        }
        copy.repo.clone_url = copy
            .repo
            .clone_url
            .as_deref()
            .map(crate::repo::bootstrap::redact_url);
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
