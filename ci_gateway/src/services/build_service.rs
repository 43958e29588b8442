//! Build numbering, links, and build-limit accounting.

use crate::models::{Build, BuildStatus, Repository};
use crate::store::{Store, StoreError, StoreResult};

use super::hook_service::RetryPolicy;

/// User-facing link for build `number` of `full_name`.
pub fn build_link(web_address: &str, full_name: &str, number: i64) -> String {
    format!("{}/{}/{}", web_address.trim_end_matches('/'), full_name, number)
}

/// Create a build with the next per-repository number.
///
/// Uses the same bounded read-then-write retry as hook sequencing.
pub async fn create_build(
    store: &dyn Store,
    mut build: Build,
    repo: &Repository,
    web_address: &str,
    retry: RetryPolicy,
) -> StoreResult<Build> {
    build.repo_id = repo.id;

    let mut last_err = StoreError::Unavailable("no build numbering attempt made".to_string());
    for attempt in 1..=retry.limit {
        let next = match store.last_build_for_repository(repo.id).await {
            Ok(last) => last.map_or(1, |b| b.number + 1),
            Err(e) => {
                last_err = e;
                if attempt < retry.limit {
                    tokio::time::sleep(retry.delay(attempt)).await;
                }
                continue;
            }
        };
        build.number = next;
        build.link = build_link(web_address, &repo.full_name, next);

        match store.create_build(build.clone()).await {
            Ok(created) => {
                crate::metrics::build_status_changed(created.status);
                tracing::info!(
                    repo = %repo.full_name,
                    build = created.number,
                    branch = %created.branch,
                    status = %created.status,
                    "Build created"
                );
                return Ok(created);
            }
            Err(e) => {
                tracing::warn!(
                    repo = %repo.full_name,
                    attempt,
                    error = %e,
                    "Unable to number build"
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

/// Whether the repository already has `build_limit` pending or running builds.
pub async fn at_build_limit(store: &dyn Store, repo: &Repository) -> StoreResult<bool> {
    let active = store
        .list_pending_and_running_builds_for_repository(repo.id)
        .await?
        .len() as i64;
    Ok(active >= repo.build_limit)
}

/// Mark a build with a terminal status and message and persist it.
pub async fn update_status(
    store: &dyn Store,
    mut build: Build,
    status: BuildStatus,
    error: impl Into<String>,
) -> StoreResult<Build> {
    build.status = status;
    build.error = error.into();
    let updated = store.update_build(build).await?;
    crate::metrics::build_status_changed(status);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildDraft;
    use crate::store::MemoryStore;

    #[test]
    fn link_embeds_full_name_and_number() {
        assert_eq!(
            build_link("https://ci.example.com/", "octo/app", 7),
            "https://ci.example.com/octo/app/7"
        );
    }

    #[tokio::test]
    async fn builds_are_numbered_per_repository() {
        let store = MemoryStore::new();
        let app = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let lib = store.create_repository(Repository::new("octo", "lib")).await.unwrap();
        let draft = BuildDraft::default();
        let retry = RetryPolicy::default();

        let first = create_build(&store, Build::from_draft(&draft, 0), &app, "http://ci", retry)
            .await
            .unwrap();
        let second = create_build(&store, Build::from_draft(&draft, 0), &app, "http://ci", retry)
            .await
            .unwrap();
        let other = create_build(&store, Build::from_draft(&draft, 0), &lib, "http://ci", retry)
            .await
            .unwrap();

        assert_eq!((first.number, second.number, other.number), (1, 2, 1));
        assert_eq!(second.link, "http://ci/octo/app/2");
        assert_eq!(other.repo_id, lib.id);
    }

    #[tokio::test]
    async fn build_limit_counts_active_builds() {
        let store = MemoryStore::new();
        let mut repo = Repository::new("octo", "app");
        repo.build_limit = 1;
        let repo = store.create_repository(repo).await.unwrap();
        assert!(!at_build_limit(&store, &repo).await.unwrap());

        let build = create_build(
            &store,
            Build::from_draft(&BuildDraft::default(), 0),
            &repo,
            "http://ci",
            RetryPolicy::default(),
        )
        .await
        .unwrap();
        assert!(at_build_limit(&store, &repo).await.unwrap());

        update_status(&store, build, BuildStatus::Success, "").await.unwrap();
        assert!(!at_build_limit(&store, &repo).await.unwrap());
    }
}
