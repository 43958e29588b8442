//! In-process store with the same unique constraints as the relational
//! schema: `(repo, number)` for hooks and builds, `(repo, number)` for
//! deployments, and `full_name` for repositories.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};
use crate::models::{Build, Deployment, Hook, Repository, Secret};

#[derive(Default)]
struct Tables {
    next_id: i64,
    repos: BTreeMap<i64, Repository>,
    hooks: BTreeMap<i64, Hook>,
    secrets: BTreeMap<i64, Secret>,
    builds: BTreeMap<i64, Build>,
    deployments: BTreeMap<i64, Deployment>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_of<T: Clone>(items: Vec<T>, page: i64, per_page: i64) -> Vec<T> {
    let per_page = per_page.max(1) as usize;
    let skip = (page.max(1) as usize - 1) * per_page;
    items.into_iter().skip(skip).take(per_page).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_repository(&self, org: &str, name: &str) -> StoreResult<Repository> {
        let tables = self.tables.read().await;
        tables
            .repos
            .values()
            .find(|r| r.org == org && r.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("repo {org}/{name}")))
    }

    async fn get_repository_by_id(&self, id: i64) -> StoreResult<Repository> {
        let tables = self.tables.read().await;
        tables
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("repo {id}")))
    }

    async fn create_repository(&self, mut repo: Repository) -> StoreResult<Repository> {
        let mut tables = self.tables.write().await;
        if tables.repos.values().any(|r| r.full_name == repo.full_name) {
            return Err(StoreError::Conflict(format!("repo {} exists", repo.full_name)));
        }
        repo.id = tables.allocate_id();
        tables.repos.insert(repo.id, repo.clone());
        Ok(repo)
    }

    async fn update_repository(&self, repo: Repository) -> StoreResult<Repository> {
        let mut tables = self.tables.write().await;
        if !tables.repos.contains_key(&repo.id) {
            return Err(StoreError::NotFound(format!("repo {}", repo.id)));
        }
        if tables
            .repos
            .values()
            .any(|r| r.id != repo.id && r.full_name == repo.full_name)
        {
            return Err(StoreError::Conflict(format!("repo {} exists", repo.full_name)));
        }
        tables.repos.insert(repo.id, repo.clone());
        Ok(repo)
    }

    async fn get_hook_by_webhook_id(&self, webhook_id: i64) -> StoreResult<Hook> {
        let tables = self.tables.read().await;
        tables
            .hooks
            .values()
            .rev()
            .find(|h| h.webhook_id == webhook_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("hook for webhook {webhook_id}")))
    }

    async fn get_hook_by_source_id(&self, repo_id: i64, source_id: &str) -> StoreResult<Hook> {
        let tables = self.tables.read().await;
        tables
            .hooks
            .values()
            .find(|h| h.repo_id == Some(repo_id) && h.source_id == source_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("hook {source_id}")))
    }

    async fn last_hook_for_repository(&self, repo_id: i64) -> StoreResult<Option<Hook>> {
        let tables = self.tables.read().await;
        Ok(tables
            .hooks
            .values()
            .filter(|h| h.repo_id == Some(repo_id))
            .max_by_key(|h| h.number)
            .cloned())
    }

    async fn list_hooks_for_repository(&self, repo_id: i64) -> StoreResult<Vec<Hook>> {
        let tables = self.tables.read().await;
        let mut hooks: Vec<Hook> = tables
            .hooks
            .values()
            .filter(|h| h.repo_id == Some(repo_id))
            .cloned()
            .collect();
        hooks.sort_by_key(|h| h.number);
        Ok(hooks)
    }

    async fn create_hook(&self, mut hook: Hook) -> StoreResult<Hook> {
        let mut tables = self.tables.write().await;
        if tables
            .hooks
            .values()
            .any(|h| h.repo_id == hook.repo_id && h.number == hook.number)
        {
            return Err(StoreError::Conflict(format!(
                "hook number {} already exists",
                hook.number
            )));
        }
        let id = tables.allocate_id();
        hook.id = Some(id);
        tables.hooks.insert(id, hook.clone());
        Ok(hook)
    }

    async fn update_hook(&self, hook: Hook) -> StoreResult<Hook> {
        let mut tables = self.tables.write().await;
        let id = hook
            .id
            .filter(|id| tables.hooks.contains_key(id))
            .ok_or_else(|| StoreError::NotFound(format!("hook {}", hook.number)))?;
        tables.hooks.insert(id, hook.clone());
        Ok(hook)
    }

    async fn count_secrets_for_repository(&self, org: &str, repo: &str) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .secrets
            .values()
            .filter(|s| s.org == org && s.repo == repo)
            .count() as i64)
    }

    async fn list_secrets_for_repository(
        &self,
        org: &str,
        repo: &str,
        page: i64,
        per_page: i64,
    ) -> StoreResult<Vec<Secret>> {
        let tables = self.tables.read().await;
        let secrets = tables
            .secrets
            .values()
            .filter(|s| s.org == org && s.repo == repo)
            .cloned()
            .collect();
        Ok(page_of(secrets, page, per_page))
    }

    async fn create_secret(&self, mut secret: Secret) -> StoreResult<Secret> {
        let mut tables = self.tables.write().await;
        secret.id = tables.allocate_id();
        tables.secrets.insert(secret.id, secret.clone());
        Ok(secret)
    }

    async fn update_secret(&self, secret: Secret) -> StoreResult<Secret> {
        let mut tables = self.tables.write().await;
        if !tables.secrets.contains_key(&secret.id) {
            return Err(StoreError::NotFound(format!("secret {}", secret.id)));
        }
        tables.secrets.insert(secret.id, secret.clone());
        Ok(secret)
    }

    async fn get_build(&self, id: i64) -> StoreResult<Build> {
        let tables = self.tables.read().await;
        tables
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("build {id}")))
    }

    async fn last_build_for_repository(&self, repo_id: i64) -> StoreResult<Option<Build>> {
        let tables = self.tables.read().await;
        Ok(tables
            .builds
            .values()
            .filter(|b| b.repo_id == repo_id)
            .max_by_key(|b| b.number)
            .cloned())
    }

    async fn count_builds_for_repository(&self, repo_id: i64) -> StoreResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables.builds.values().filter(|b| b.repo_id == repo_id).count() as i64)
    }

    async fn list_builds_for_repository(
        &self,
        repo_id: i64,
        page: i64,
        per_page: i64,
    ) -> StoreResult<Vec<Build>> {
        let tables = self.tables.read().await;
        let mut builds: Vec<Build> = tables
            .builds
            .values()
            .filter(|b| b.repo_id == repo_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.number.cmp(&a.number));
        Ok(page_of(builds, page, per_page))
    }

    async fn list_pending_and_running_builds_for_repository(
        &self,
        repo_id: i64,
    ) -> StoreResult<Vec<Build>> {
        let tables = self.tables.read().await;
        let mut builds: Vec<Build> = tables
            .builds
            .values()
            .filter(|b| b.repo_id == repo_id && b.status.is_active())
            .cloned()
            .collect();
        builds.sort_by_key(|b| b.number);
        Ok(builds)
    }

    async fn create_build(&self, mut build: Build) -> StoreResult<Build> {
        let mut tables = self.tables.write().await;
        if tables
            .builds
            .values()
            .any(|b| b.repo_id == build.repo_id && b.number == build.number)
        {
            return Err(StoreError::Conflict(format!(
                "build number {} already exists",
                build.number
            )));
        }
        build.id = tables.allocate_id();
        tables.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn update_build(&self, build: Build) -> StoreResult<Build> {
        let mut tables = self.tables.write().await;
        if !tables.builds.contains_key(&build.id) {
            return Err(StoreError::NotFound(format!("build {}", build.id)));
        }
        tables.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get_deployment_for_repository(
        &self,
        repo_id: i64,
        number: i64,
    ) -> StoreResult<Deployment> {
        let tables = self.tables.read().await;
        tables
            .deployments
            .values()
            .find(|d| d.repo_id == repo_id && d.number == number)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("deployment {number}")))
    }

    async fn create_deployment(&self, mut deployment: Deployment) -> StoreResult<Deployment> {
        let mut tables = self.tables.write().await;
        if tables
            .deployments
            .values()
            .any(|d| d.repo_id == deployment.repo_id && d.number == deployment.number)
        {
            return Err(StoreError::Conflict(format!(
                "deployment {} already exists",
                deployment.number
            )));
        }
        deployment.id = tables.allocate_id();
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn update_deployment(&self, deployment: Deployment) -> StoreResult<Deployment> {
        let mut tables = self.tables.write().await;
        if !tables.deployments.contains_key(&deployment.id) {
            return Err(StoreError::NotFound(format!("deployment {}", deployment.id)));
        }
        tables.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;

    fn hook_for(repo_id: i64, number: i64) -> Hook {
        let mut hook = Hook::new(EventType::Push, format!("delivery-{number}"));
        hook.repo_id = Some(repo_id);
        hook.number = number;
        hook
    }

    #[tokio::test]
    async fn hook_numbers_are_unique_per_repository() {
        let store = MemoryStore::new();
        store.create_hook(hook_for(1, 1)).await.unwrap();
        store.create_hook(hook_for(2, 1)).await.unwrap();

        let err = store.create_hook(hook_for(1, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let last = store.last_hook_for_repository(1).await.unwrap().unwrap();
        assert_eq!(last.number, 1);
        assert!(store.last_hook_for_repository(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repository_full_name_is_unique() {
        let store = MemoryStore::new();
        store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let err = store
            .create_repository(Repository::new("octo", "app"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn secrets_paginate() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .create_secret(Secret::new("octo", "app", &format!("s{i}"), "v"))
                .await
                .unwrap();
        }
        store.create_secret(Secret::new("octo", "other", "x", "v")).await.unwrap();

        assert_eq!(store.count_secrets_for_repository("octo", "app").await.unwrap(), 5);
        let first = store.list_secrets_for_repository("octo", "app", 1, 2).await.unwrap();
        let third = store.list_secrets_for_repository("octo", "app", 3, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_repository("a", "b").await.unwrap_err().is_not_found());
        assert!(store.get_deployment_for_repository(1, 1).await.unwrap_err().is_not_found());
        assert!(store.get_hook_by_webhook_id(9).await.unwrap_err().is_not_found());
    }
}
