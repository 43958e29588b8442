//! Source-control provider seam: webhook parsing/verification plus the
//! provider API calls the admission pipeline needs.

pub mod github;
pub mod signature;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::HeaderMap;
use thiserror::Error;

use crate::models::{Build, Repository, User, Webhook};

pub use github::GithubClient;
pub use signature::SignatureError;

/// Inbound request captured once at the boundary. The body is immutable;
/// the parser and the verifier each read their own handle to it.
#[derive(Debug, Clone)]
pub struct RawWebhook {
    headers: HeaderMap,
    body: Bytes,
}

impl RawWebhook {
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// An independent handle on the original bytes.
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("{0} events are not supported")]
    UnsupportedEvent(String),
}

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider token not configured")]
    NoToken,
}

/// Head of a pull request, used to complete comment-triggered builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullRequestHead {
    pub commit: String,
    pub branch: String,
    pub base_ref: String,
    pub head_ref: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Classify a raw delivery into a webhook envelope.
    fn process_webhook(&self, request: &RawWebhook) -> Result<Webhook, ParseError>;

    /// Check the delivery signature against `key`.
    fn verify_webhook(&self, request: &RawWebhook, key: &[u8]) -> Result<(), SignatureError>;

    /// Provider user id for `name`.
    async fn get_user_id(&self, name: &str, token: &str) -> Result<String, ScmError>;

    /// Publish the build's state as a commit status.
    async fn set_commit_status(&self, repo: &Repository, build: &Build) -> Result<(), ScmError>;

    /// Permission level (`admin`, `write`, `read`, ...) of `sender` on the repo.
    async fn repo_access(
        &self,
        sender: &str,
        token: &str,
        org: &str,
        name: &str,
    ) -> Result<String, ScmError>;

    /// Whether `sender` has contributed to the repo before.
    async fn repo_contributor(
        &self,
        owner: &User,
        sender: &str,
        org: &str,
        name: &str,
    ) -> Result<bool, ScmError>;

    async fn get_pull_request(
        &self,
        repo: &Repository,
        number: i64,
    ) -> Result<PullRequestHead, ScmError>;
}
