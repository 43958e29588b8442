//! Hook sequencing and the terminal hook write.

use std::time::Duration;

use crate::models::{Hook, Repository};
use crate::store::{Store, StoreError, StoreResult};

/// Bounded read-then-write retry shared by hook and build numbering.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Assign the next per-repository number to `hook` and create it.
///
/// Any store error, constraint or otherwise, restarts the read-then-write
/// from a fresh read. On exhaustion the last error is returned and `hook`
/// carries the repository but no id.
pub async fn sequence_hook(
    store: &dyn Store,
    hook: &mut Hook,
    repo: &Repository,
    retry: RetryPolicy,
) -> StoreResult<()> {
    hook.repo_id = Some(repo.id);

    let mut last_err = StoreError::Unavailable("no sequencing attempt made".to_string());
    for attempt in 1..=retry.limit {
        match try_sequence(store, hook.clone(), repo.id).await {
            Ok(created) => {
                *hook = created;
                tracing::debug!(
                    repo = %repo.full_name,
                    hook = hook.number,
                    attempt,
                    "Hook sequenced"
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    repo = %repo.full_name,
                    attempt,
                    error = %e,
                    "Unable to sequence hook"
                );
                last_err = e;
            }
        }

        if attempt < retry.limit {
            tokio::time::sleep(retry.delay(attempt)).await;
        }
    }

    Err(last_err)
}

async fn try_sequence(store: &dyn Store, mut hook: Hook, repo_id: i64) -> StoreResult<Hook> {
    let last = store.last_hook_for_repository(repo_id).await?;
    hook.number = last.map_or(1, |h| h.number + 1);
    store.create_hook(hook).await
}

/// Persist the hook's terminal status. Runs once per delivery on every
/// exit path of the processing that took a repository.
///
/// Created hooks are updated; a hook that lost its sequencing race gets one
/// more create; a hook that never reached a repository is only logged.
pub async fn finalize_hook(store: &dyn Store, hook: &Hook) {
    crate::metrics::hook_finalized(hook.status);

    let result = match (hook.id, hook.repo_id) {
        (Some(_), _) => store.update_hook(hook.clone()).await.map(|_| ()),
        (None, Some(repo_id)) => try_sequence(store, hook.clone(), repo_id)
            .await
            .map(|_| ()),
        (None, None) => {
            tracing::info!(
                delivery = %hook.source_id,
                event = %hook.event,
                status = %hook.status,
                error = %hook.error,
                "Hook not recorded: no repository"
            );
            return;
        }
    };

    if let Err(e) = result {
        tracing::error!(
            delivery = %hook.source_id,
            hook = hook.number,
            error = %e,
            "Unable to persist hook"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{Build, Deployment, EventType, HookStatus, Secret};
    use crate::store::MemoryStore;

    /// Fails the first `fail_creates` hook creations with a conflict.
    struct FlakyStore {
        inner: MemoryStore,
        fail_creates: AtomicU32,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn get_repository(&self, org: &str, name: &str) -> StoreResult<Repository> {
            self.inner.get_repository(org, name).await
        }
        async fn get_repository_by_id(&self, id: i64) -> StoreResult<Repository> {
            self.inner.get_repository_by_id(id).await
        }
        async fn create_repository(&self, repo: Repository) -> StoreResult<Repository> {
            self.inner.create_repository(repo).await
        }
        async fn update_repository(&self, repo: Repository) -> StoreResult<Repository> {
            self.inner.update_repository(repo).await
        }
        async fn get_hook_by_webhook_id(&self, webhook_id: i64) -> StoreResult<Hook> {
            self.inner.get_hook_by_webhook_id(webhook_id).await
        }
        async fn get_hook_by_source_id(&self, repo_id: i64, source_id: &str) -> StoreResult<Hook> {
            self.inner.get_hook_by_source_id(repo_id, source_id).await
        }
        async fn last_hook_for_repository(&self, repo_id: i64) -> StoreResult<Option<Hook>> {
            self.inner.last_hook_for_repository(repo_id).await
        }
        async fn list_hooks_for_repository(&self, repo_id: i64) -> StoreResult<Vec<Hook>> {
            self.inner.list_hooks_for_repository(repo_id).await
        }
        async fn create_hook(&self, hook: Hook) -> StoreResult<Hook> {
            let remaining = self.fail_creates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_creates.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict("injected".into()));
            }
            self.inner.create_hook(hook).await
        }
        async fn update_hook(&self, hook: Hook) -> StoreResult<Hook> {
            self.inner.update_hook(hook).await
        }
        async fn count_secrets_for_repository(&self, org: &str, repo: &str) -> StoreResult<i64> {
            self.inner.count_secrets_for_repository(org, repo).await
        }
        async fn list_secrets_for_repository(
            &self,
            org: &str,
            repo: &str,
            page: i64,
            per_page: i64,
        ) -> StoreResult<Vec<Secret>> {
            self.inner
                .list_secrets_for_repository(org, repo, page, per_page)
                .await
        }
        async fn create_secret(&self, secret: Secret) -> StoreResult<Secret> {
            self.inner.create_secret(secret).await
        }
        async fn update_secret(&self, secret: Secret) -> StoreResult<Secret> {
            self.inner.update_secret(secret).await
        }
        async fn get_build(&self, id: i64) -> StoreResult<Build> {
            self.inner.get_build(id).await
        }
        async fn last_build_for_repository(&self, repo_id: i64) -> StoreResult<Option<Build>> {
            self.inner.last_build_for_repository(repo_id).await
        }
        async fn count_builds_for_repository(&self, repo_id: i64) -> StoreResult<i64> {
            self.inner.count_builds_for_repository(repo_id).await
        }
        async fn list_builds_for_repository(
            &self,
            repo_id: i64,
            page: i64,
            per_page: i64,
        ) -> StoreResult<Vec<Build>> {
            self.inner
                .list_builds_for_repository(repo_id, page, per_page)
                .await
        }
        async fn list_pending_and_running_builds_for_repository(
            &self,
            repo_id: i64,
        ) -> StoreResult<Vec<Build>> {
            self.inner
                .list_pending_and_running_builds_for_repository(repo_id)
                .await
        }
        async fn create_build(&self, build: Build) -> StoreResult<Build> {
            self.inner.create_build(build).await
        }
        async fn update_build(&self, build: Build) -> StoreResult<Build> {
            self.inner.update_build(build).await
        }
        async fn get_deployment_for_repository(
            &self,
            repo_id: i64,
            number: i64,
        ) -> StoreResult<Deployment> {
            self.inner
                .get_deployment_for_repository(repo_id, number)
                .await
        }
        async fn create_deployment(&self, deployment: Deployment) -> StoreResult<Deployment> {
            self.inner.create_deployment(deployment).await
        }
        async fn update_deployment(&self, deployment: Deployment) -> StoreResult<Deployment> {
            self.inner.update_deployment(deployment).await
        }
    }

    async fn enrolled(store: &dyn Store) -> Repository {
        store
            .create_repository(Repository::new("octo", "app"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_hook_is_numbered_one() {
        let store = MemoryStore::new();
        let repo = enrolled(&store).await;
        let mut hook = Hook::new(EventType::Push, "d1");

        sequence_hook(&store, &mut hook, &repo, RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(hook.number, 1);
        assert!(hook.id.is_some());
        assert_eq!(hook.repo_id, Some(repo.id));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_are_retried_with_a_fresh_read() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_creates: AtomicU32::new(2),
        };
        let repo = enrolled(&store).await;
        let mut hook = Hook::new(EventType::Push, "d1");

        sequence_hook(&store, &mut hook, &repo, RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(hook.number, 1);
        assert_eq!(store.fail_creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_the_last_error() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            fail_creates: AtomicU32::new(3),
        };
        let repo = enrolled(&store).await;
        let mut hook = Hook::new(EventType::Push, "d1");

        let err = sequence_hook(&store, &mut hook, &repo, RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(hook.id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_deliveries_get_contiguous_numbers() {
        let store = Arc::new(MemoryStore::new());
        let repo = enrolled(store.as_ref()).await;

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let store = store.clone();
                let repo = repo.clone();
                tokio::spawn(async move {
                    let mut hook = Hook::new(EventType::Push, format!("d{i}"));
                    sequence_hook(store.as_ref(), &mut hook, &repo, RetryPolicy::default())
                        .await
                        .map(|_| hook.number)
                })
            })
            .collect();

        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap().unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn finalize_updates_created_hooks() {
        let store = MemoryStore::new();
        let repo = enrolled(&store).await;
        let mut hook = Hook::new(EventType::Push, "d1");
        sequence_hook(&store, &mut hook, &repo, RetryPolicy::default())
            .await
            .unwrap();

        hook.fail(HookStatus::Failure, "boom");
        finalize_hook(&store, &hook).await;

        let stored = store.get_hook_by_source_id(repo.id, "d1").await.unwrap();
        assert_eq!(stored.status, HookStatus::Failure);
        assert_eq!(stored.error, "boom");
        assert_eq!(store.list_hooks_for_repository(repo.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalize_creates_hooks_that_lost_sequencing() {
        let store = MemoryStore::new();
        let repo = enrolled(&store).await;
        let mut hook = Hook::new(EventType::Push, "d1");
        hook.repo_id = Some(repo.id);
        hook.fail(HookStatus::Failure, "unable to sequence");

        finalize_hook(&store, &hook).await;

        let stored = store.get_hook_by_source_id(repo.id, "d1").await.unwrap();
        assert_eq!(stored.number, 1);
        assert_eq!(stored.status, HookStatus::Failure);
    }

    #[tokio::test]
    async fn finalize_without_repository_stores_nothing() {
        let store = MemoryStore::new();
        let repo = enrolled(&store).await;
        let hook = Hook::new(EventType::Push, "d1");

        finalize_hook(&store, &hook).await;

        assert!(store.list_hooks_for_repository(repo.id).await.unwrap().is_empty());
    }
}
