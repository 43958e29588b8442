//! Hand-off of admitted builds to the execution queue.

use chrono::Utc;

use crate::queue::{Queue, QueueItem};
use crate::store::Store;

/// Publish `item` and stamp the build's `enqueued` time.
///
/// Runs after the response has been sent; failures are logged and counted.
pub async fn enqueue(store: &dyn Store, queue: &dyn Queue, item: QueueItem) -> bool {
    let mut build = item.build.clone();
    let repo = item.repo.full_name.clone();

    if let Err(e) = queue.publish(item).await {
        tracing::error!(repo = %repo, build = build.number, error = %e, "Unable to publish build to queue");
        crate::metrics::queue_publish("failed");
        return false;
    }

    build.enqueued = Some(Utc::now());
    if let Err(e) = store.update_build(build.clone()).await {
        tracing::error!(
            repo = %repo,
            build = build.number,
            error = %e,
            "Build published but enqueue time not saved"
        );
    }

    crate::metrics::queue_publish("published");
    tracing::info!(repo = %repo, build = build.number, "Build published to queue");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompiledPipeline;
    use crate::models::{Build, BuildDraft, Repository};
    use crate::queue::MemoryQueue;
    use crate::services::build_service::create_build;
    use crate::services::hook_service::RetryPolicy;
    use crate::store::MemoryStore;

    async fn item(store: &MemoryStore) -> QueueItem {
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let build = create_build(
            store,
            Build::from_draft(&BuildDraft::default(), repo.id),
            &repo,
            "http://ci",
            RetryPolicy::default(),
        )
        .await
        .unwrap();
        QueueItem {
            build,
            repo,
            pipeline: CompiledPipeline {
                steps: Vec::new(),
                timeout_secs: 60,
                auto_cancel: None,
            },
        }
    }

    #[tokio::test]
    async fn published_builds_record_enqueue_time() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::default();
        let item = item(&store).await;
        let id = item.build.id;

        assert!(enqueue(&store, &queue, item).await);

        assert_eq!(queue.build_ids().await, vec![id]);
        assert!(store.get_build(id).await.unwrap().enqueued.is_some());
    }

    #[tokio::test]
    async fn publish_failure_leaves_build_unqueued() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new(0);
        let item = item(&store).await;
        let id = item.build.id;

        assert!(!enqueue(&store, &queue, item).await);

        assert!(queue.is_empty().await);
        assert!(store.get_build(id).await.unwrap().enqueued.is_none());
    }
}
