//! Repository enrollment seeder: loads enrolled repositories and their
//! secrets into the store at startup.
//!
//! ```json
//! { "repositories": [{
//!     "org": "octo", "name": "app", "hash": "webhook-secret",
//!     "owner": { "name": "octocat", "token": "ghp_..." },
//!     "approve_build": "fork-no-write",
//!     "pipeline": { "steps": [{ "name": "test", "command": "cargo test" }] },
//!     "secrets": [{ "name": "deploy_key", "value": "..." }]
//! }] }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::models::{AllowEvents, ApprovePolicy, Repository, Secret, User};
use crate::store::{Store, StoreError};

#[derive(Debug, Deserialize)]
pub struct EnrollmentFile {
    #[serde(default)]
    pub repositories: Vec<RepoSeed>,
}

#[derive(Debug, Deserialize)]
pub struct RepoSeed {
    pub org: String,
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub owner: Option<OwnerSeed>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub build_limit: Option<i64>,
    #[serde(default)]
    pub allow_events: Option<u64>,
    #[serde(default)]
    pub approve_build: Option<ApprovePolicy>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub pipeline: Option<serde_json::Value>,
    #[serde(default)]
    pub secrets: Vec<SecretSeed>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerSeed {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SecretSeed {
    pub name: String,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("unable to read enrollment file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid enrollment file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepoSeed {
    fn into_repository(self) -> (Repository, Vec<SecretSeed>) {
        let mut repo = Repository::new(&self.org, &self.name);
        repo.hash = self.hash;
        if let Some(owner) = self.owner {
            repo.owner = User {
                id: owner.id,
                name: owner.name,
                token: owner.token,
            };
        }
        if let Some(branch) = self.branch {
            repo.branch = branch;
        }
        if let Some(limit) = self.build_limit {
            repo.build_limit = limit;
        }
        if let Some(mask) = self.allow_events {
            repo.allow_events = AllowEvents::new(mask);
        }
        if let Some(policy) = self.approve_build {
            repo.approve_build = policy;
        }
        repo.private = self.private;
        repo.visibility = if self.private { "private" } else { "public" }.to_string();
        repo.pipeline_config = self.pipeline;
        (repo, self.secrets)
    }
}

/// Enroll every repository in `file`. Repositories already enrolled are
/// left untouched. Returns the number newly enrolled.
pub async fn seed_repositories(store: &dyn Store, file: EnrollmentFile) -> Result<usize, SeedError> {
    let mut enrolled = 0;
    for seed in file.repositories {
        let (repo, secrets) = seed.into_repository();
        let full_name = repo.full_name.clone();

        match store.create_repository(repo).await {
            Ok(created) => {
                for secret in secrets {
                    store
                        .create_secret(Secret::new(
                            &created.org,
                            &created.name,
                            &secret.name,
                            &secret.value,
                        ))
                        .await?;
                }
                tracing::info!(repo = %full_name, "Repository enrolled");
                enrolled += 1;
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(repo = %full_name, "Repository already enrolled");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(enrolled)
}

pub async fn seed_from_path(store: &dyn Store, path: &Path) -> Result<usize, SeedError> {
    let raw = tokio::fs::read(path).await?;
    let file: EnrollmentFile = serde_json::from_slice(&raw)?;
    seed_repositories(store, file).await
}
