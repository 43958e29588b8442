//! Deployment find-or-create and build linkage.

use crate::models::{Build, Deployment, Repository};
use crate::store::{Store, StoreError, StoreResult};

/// Append `build` to the deployment numbered like `draft`, creating the
/// deployment on first sight.
pub async fn link_build(
    store: &dyn Store,
    repo: &Repository,
    draft: &Deployment,
    build: &Build,
) -> StoreResult<Deployment> {
    let number = build.deploy_number.unwrap_or(draft.number);

    match store.get_deployment_for_repository(repo.id, number).await {
        Ok(existing) => append(store, existing, build).await,
        Err(StoreError::NotFound(_)) => {
            let mut deployment = draft.clone();
            deployment.number = number;
            deployment.repo_id = repo.id;
            deployment.builds = vec![build.id];

            match store.create_deployment(deployment).await {
                Ok(created) => {
                    tracing::info!(
                        repo = %repo.full_name,
                        deployment = created.number,
                        build = build.number,
                        "Deployment created"
                    );
                    Ok(created)
                }
                // a concurrent delivery created it first
                Err(StoreError::Conflict(_)) => {
                    let existing = store.get_deployment_for_repository(repo.id, number).await?;
                    append(store, existing, build).await
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn append(
    store: &dyn Store,
    mut deployment: Deployment,
    build: &Build,
) -> StoreResult<Deployment> {
    if !deployment.builds.contains(&build.id) {
        deployment.builds.push(build.id);
    }
    let updated = store.update_deployment(deployment).await?;
    tracing::info!(
        deployment = updated.number,
        build = build.number,
        builds = updated.builds.len(),
        "Build linked to deployment"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildDraft, EventType};
    use crate::services::build_service::create_build;
    use crate::services::hook_service::RetryPolicy;
    use crate::store::MemoryStore;

    async fn deploy_build(store: &MemoryStore, repo: &Repository, number: i64) -> Build {
        let draft = BuildDraft {
            event: Some(EventType::Deployment),
            deploy_number: Some(number),
            ..BuildDraft::default()
        };
        create_build(
            store,
            Build::from_draft(&draft, repo.id),
            repo,
            "http://ci",
            RetryPolicy::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn builds_accumulate_on_one_deployment_in_order() {
        let store = MemoryStore::new();
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let draft = Deployment {
            number: 55,
            target: "production".to_string(),
            ..Deployment::default()
        };

        let first = deploy_build(&store, &repo, 55).await;
        let second = deploy_build(&store, &repo, 55).await;
        link_build(&store, &repo, &draft, &first).await.unwrap();
        let linked = link_build(&store, &repo, &draft, &second).await.unwrap();

        assert_eq!(linked.builds, vec![first.id, second.id]);
        assert_eq!(linked.target, "production");
        let stored = store.get_deployment_for_repository(repo.id, 55).await.unwrap();
        assert_eq!(stored.builds, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn relinking_a_build_does_not_duplicate_it() {
        let store = MemoryStore::new();
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let draft = Deployment {
            number: 3,
            ..Deployment::default()
        };
        let build = deploy_build(&store, &repo, 3).await;

        link_build(&store, &repo, &draft, &build).await.unwrap();
        let linked = link_build(&store, &repo, &draft, &build).await.unwrap();

        assert_eq!(linked.builds, vec![build.id]);
    }
}
