//! Request and result types shared by the HTTP layer and the pipeline.

use base64::Engine as _;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};

use crate::errors::{AttachmentError, PipelineError};
use crate::naming::BRANCH_PREFIX;

/// Wire shape of `POST /`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub images: Vec<ImagePayload>,
}

/// One base64 attachment as sent by the client.
#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    #[serde(default)]
    pub name: Option<String>,
    pub data: String,
}

/// A decoded attachment, ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One parsed, validated change request. Immutable once built.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    text: String,
    attachments: Vec<Attachment>,
}

impl ChangeRequest {
    /// Build a request with no attachments. Rejects blank text.
    pub fn new(text: impl Into<String>) -> Result<Self, PipelineError> {
        Self::with_attachments(text, Vec::new())
    }

    pub fn with_attachments(
        text: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Self, PipelineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "Missing or invalid 'request' field".to_string(),
            ));
        }
        Ok(Self { text, attachments })
    }

    /// Parse and validate a raw `POST /` body.
    pub fn from_json(body: &[u8]) -> Result<Self, PipelineError> {
        let submit: SubmitRequest = serde_json::from_slice(body)
            .map_err(|e| PipelineError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;

        let text = submit.request.unwrap_or_default();
        let attachments = submit
            .images
            .into_iter()
            .enumerate()
            .map(|(index, image)| image.decode(index))
            .collect::<Result<Vec<_>, _>>()?;

        Self::with_attachments(text, attachments)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

impl ImagePayload {
    /// Decode the payload, accepting both bare base64 and `data:` URLs.
    pub fn decode(self, index: usize) -> Result<Attachment, AttachmentError> {
        let encoded = match self.data.strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
            None => self.data.as_str(),
        };
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|source| AttachmentError::InvalidEncoding { index, source })?;

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("image-{}.png", index + 1));

        Ok(Attachment { name, bytes })
    }
}

/// A `claude/`-prefixed branch created by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName(String);

impl BranchName {
    /// Apply the pipeline prefix to a namer-produced `<slug>-<millis>` id.
    pub fn from_id(id: &str) -> Self {
        Self(format!("{}{}", BRANCH_PREFIX, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The only durable output of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestResult {
    #[serde(rename = "pr")]
    pub url: String,
    pub branch: String,
}
