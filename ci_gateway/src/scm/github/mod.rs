//! GitHub integration: webhook parsing and validation, commit statuses,
//! collaborator lookups.

pub mod webhook;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{Build, BuildStatus, Repository, User, Webhook};
use crate::scm::signature::{verify_signature, SignatureError};
use crate::scm::{ParseError, PullRequestHead, RawWebhook, ScmError, SourceControl};

pub use webhook::parse_webhook;

/// Commit status payload for a build state.
fn commit_state(status: BuildStatus) -> (&'static str, &'static str) {
    match status {
        BuildStatus::Pending => ("pending", "the build is pending"),
        BuildStatus::PendingApproval => ("pending", "build needs approval from repo admin"),
        BuildStatus::Running => ("pending", "the build is running"),
        BuildStatus::Success => ("success", "the build was successful"),
        BuildStatus::Failure => ("failure", "the build has failed"),
        BuildStatus::Error => ("error", "the build has errored"),
        BuildStatus::Killed => ("error", "the build was killed"),
        BuildStatus::Canceled => ("error", "the build was canceled"),
        BuildStatus::Skipped => ("success", "build was skipped as no steps/stages found"),
    }
}

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    /// Fallback token when the repository owner has none.
    token: String,
    context: String,
}

impl GithubClient {
    pub fn new(api_url: &str, token: &str, context: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            context: context.to_string(),
        }
    }

    fn token_for<'a>(&'a self, token: &'a str) -> Result<&'a str, ScmError> {
        let token = if token.is_empty() { self.token.as_str() } else { token };
        if token.is_empty() {
            return Err(ScmError::NoToken);
        }
        Ok(token)
    }

    async fn get(&self, path: &str, token: &str) -> Result<reqwest::Response, ScmError> {
        let token = self.token_for(token)?;
        let resp = self
            .http
            .get(format!("{}{path}", self.api_url))
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "centrix-ci")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ScmError::Status { status, body });
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct UserResponse {
    id: i64,
}

#[derive(Deserialize)]
struct PermissionResponse {
    permission: String,
}

#[derive(Deserialize)]
struct PullBranch {
    #[serde(rename = "ref")]
    reference: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullResponse {
    head: PullBranch,
    base: PullBranch,
}

#[async_trait]
impl SourceControl for GithubClient {
    fn process_webhook(&self, request: &RawWebhook) -> Result<Webhook, ParseError> {
        parse_webhook(request)
    }

    fn verify_webhook(&self, request: &RawWebhook, key: &[u8]) -> Result<(), SignatureError> {
        verify_signature(
            key,
            &request.body(),
            request.header(webhook::HEADER_SIGNATURE),
        )
    }

    async fn get_user_id(&self, name: &str, token: &str) -> Result<String, ScmError> {
        let user: UserResponse = self.get(&format!("/users/{name}"), token).await?.json().await?;
        Ok(user.id.to_string())
    }

    async fn set_commit_status(&self, repo: &Repository, build: &Build) -> Result<(), ScmError> {
        if build.commit.is_empty() {
            tracing::debug!(build = build.number, "No commit on build, skipping status update");
            return Ok(());
        }
        let token = match self.token_for(&repo.owner.token) {
            Ok(t) => t,
            Err(_) => {
                tracing::debug!("GitHub token not set, skipping status update");
                return Ok(());
            }
        };

        let (state, description) = commit_state(build.status);
        let description = if build.status == BuildStatus::Canceled && !build.error.is_empty() {
            build.error.as_str()
        } else {
            description
        };
        let context = format!("{}/{}", self.context, build.event);

        let url = format!(
            "{}/repos/{}/statuses/{}",
            self.api_url, repo.full_name, build.commit
        );
        let body = serde_json::json!({
            "state": state,
            "description": description,
            "target_url": build.link,
            "context": context,
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "centrix-ci")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ScmError::Status { status, body });
        }

        Ok(())
    }

    async fn repo_access(
        &self,
        sender: &str,
        token: &str,
        org: &str,
        name: &str,
    ) -> Result<String, ScmError> {
        let perm: PermissionResponse = self
            .get(
                &format!("/repos/{org}/{name}/collaborators/{sender}/permission"),
                token,
            )
            .await?
            .json()
            .await?;
        Ok(perm.permission)
    }

    async fn repo_contributor(
        &self,
        owner: &User,
        sender: &str,
        org: &str,
        name: &str,
    ) -> Result<bool, ScmError> {
        // authored commits on the default branch count as a prior contribution
        let commits: Vec<serde_json::Value> = self
            .get(
                &format!("/repos/{org}/{name}/commits?author={sender}&per_page=1"),
                &owner.token,
            )
            .await?
            .json()
            .await?;
        Ok(!commits.is_empty())
    }

    async fn get_pull_request(
        &self,
        repo: &Repository,
        number: i64,
    ) -> Result<PullRequestHead, ScmError> {
        let pr: PullResponse = self
            .get(
                &format!("/repos/{}/pulls/{number}", repo.full_name),
                &repo.owner.token,
            )
            .await?
            .json()
            .await?;
        Ok(PullRequestHead {
            commit: pr.head.sha,
            branch: pr.base.reference.clone(),
            base_ref: pr.base.reference,
            head_ref: pr.head.reference,
        })
    }
}
