//! Storage collaborator. All mutation is read-modify-write through this
//! trait; unique constraints in the backing store are the only concurrency
//! boundary.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Build, Deployment, Hook, Repository, Secret};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// A unique constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Read or write failure not attributable to a constraint.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // ── Repositories ──

    async fn get_repository(&self, org: &str, name: &str) -> StoreResult<Repository>;
    async fn get_repository_by_id(&self, id: i64) -> StoreResult<Repository>;
    async fn create_repository(&self, repo: Repository) -> StoreResult<Repository>;
    async fn update_repository(&self, repo: Repository) -> StoreResult<Repository>;

    // ── Hooks ──

    async fn get_hook_by_webhook_id(&self, webhook_id: i64) -> StoreResult<Hook>;
    async fn get_hook_by_source_id(&self, repo_id: i64, source_id: &str) -> StoreResult<Hook>;
    async fn last_hook_for_repository(&self, repo_id: i64) -> StoreResult<Option<Hook>>;
    async fn list_hooks_for_repository(&self, repo_id: i64) -> StoreResult<Vec<Hook>>;
    async fn create_hook(&self, hook: Hook) -> StoreResult<Hook>;
    async fn update_hook(&self, hook: Hook) -> StoreResult<Hook>;

    // ── Secrets ──

    async fn count_secrets_for_repository(&self, org: &str, repo: &str) -> StoreResult<i64>;
    async fn list_secrets_for_repository(
        &self,
        org: &str,
        repo: &str,
        page: i64,
        per_page: i64,
    ) -> StoreResult<Vec<Secret>>;
    async fn create_secret(&self, secret: Secret) -> StoreResult<Secret>;
    async fn update_secret(&self, secret: Secret) -> StoreResult<Secret>;

    // ── Builds ──

    async fn get_build(&self, id: i64) -> StoreResult<Build>;
    async fn last_build_for_repository(&self, repo_id: i64) -> StoreResult<Option<Build>>;
    async fn count_builds_for_repository(&self, repo_id: i64) -> StoreResult<i64>;
    async fn list_builds_for_repository(
        &self,
        repo_id: i64,
        page: i64,
        per_page: i64,
    ) -> StoreResult<Vec<Build>>;
    async fn list_pending_and_running_builds_for_repository(
        &self,
        repo_id: i64,
    ) -> StoreResult<Vec<Build>>;
    async fn create_build(&self, build: Build) -> StoreResult<Build>;
    async fn update_build(&self, build: Build) -> StoreResult<Build>;

    // ── Deployments ──

    async fn get_deployment_for_repository(
        &self,
        repo_id: i64,
        number: i64,
    ) -> StoreResult<Deployment>;
    async fn create_deployment(&self, deployment: Deployment) -> StoreResult<Deployment>;
    async fn update_deployment(&self, deployment: Deployment) -> StoreResult<Deployment>;
}
