use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use super::{Forge, PullRequestDraft};
use crate::config::BitbucketSection;

/// Opens pull requests through the Bitbucket Cloud REST API (2.0).
#[derive(Debug, Clone)]
pub struct BitbucketForge {
    http: reqwest::Client,
    api_base: String,
    workspace: String,
    repo_slug: String,
    username: String,
    app_password: String,
}

impl BitbucketForge {
    pub fn new(
        api_base: &str,
        workspace: &str,
        repo_slug: &str,
        username: &str,
        app_password: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("prwright"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build Bitbucket HTTP client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
            repo_slug: repo_slug.to_string(),
            username: username.to_string(),
            app_password: app_password.to_string(),
        })
    }

    pub fn from_section(section: &BitbucketSection) -> Result<Self> {
        fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Bitbucket forge requires {}", name))
        }

        Self::new(
            &section.api_base,
            required(&section.workspace, "BITBUCKET_WORKSPACE")?,
            required(&section.repo_slug, "BITBUCKET_REPO_SLUG")?,
            required(&section.username, "BITBUCKET_USERNAME")?,
            required(&section.app_password, "BITBUCKET_APP_PASSWORD")?,
        )
    }

    fn pull_requests_url(&self) -> String {
        format!(
            "{}/repositories/{}/{}/pullrequests",
            self.api_base, self.workspace, self.repo_slug
        )
    }
}

#[async_trait]
impl Forge for BitbucketForge {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String> {
        let payload = json!({
            "title": draft.title,
            "description": draft.body,
            "source": { "branch": { "name": draft.source_branch } },
            "destination": { "branch": { "name": draft.target_branch } },
            "close_source_branch": true,
        });

        let response = self
            .http
            .post(self.pull_requests_url())
            .basic_auth(&self.username, Some(&self.app_password))
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Bitbucket API")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Bitbucket API response")?;

        if !status.is_success() {
            bail!("Bitbucket API returned {}: {}", status, text);
        }

        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("Bitbucket API returned invalid JSON: {}", text))?;
        body.pointer("/links/html/href")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("Bitbucket response has no links.html.href: {}", text))
    }
}
