//! Auto-cancel of builds superseded by a newer build on the same branch.

use crate::compiler::AutoCancel;
use crate::models::{Build, BuildStatus, EventAction, EventType};
use crate::queue::BuildCanceller;
use crate::store::Store;

use super::build_service;

/// Whether `build` may cancel older builds under `opts`.
pub fn should_auto_cancel(opts: Option<&AutoCancel>, build: &Build, default_branch: &str) -> bool {
    let Some(opts) = opts else {
        return false;
    };
    if !opts.pending && !opts.running {
        return false;
    }

    if build.status == BuildStatus::PendingApproval {
        return true;
    }

    match build.event {
        EventType::Push => opts.default_branch || build.branch != default_branch,
        EventType::Tag => true,
        EventType::PullRequest => build.event_action == Some(EventAction::Synchronize),
        EventType::Comment
        | EventType::Deployment
        | EventType::Delete
        | EventType::Schedule
        | EventType::Repository
        | EventType::Installation
        | EventType::Ping => false,
    }
}

/// `candidate` is an older build of the same kind on the same branch.
pub fn is_superseded_by(candidate: &Build, build: &Build) -> bool {
    candidate.id != build.id
        && candidate.number < build.number
        && candidate.event == build.event
        && candidate.branch == build.branch
        && (build.event != EventType::PullRequest || candidate.head_ref == build.head_ref)
}

/// Cancel every pending/running build superseded by `build`.
///
/// A failure on one build is logged and the sweep continues. Returns the
/// number of builds canceled.
pub async fn auto_cancel(
    store: &dyn Store,
    canceller: &dyn BuildCanceller,
    build: &Build,
    opts: AutoCancel,
) -> usize {
    let active = match store
        .list_pending_and_running_builds_for_repository(build.repo_id)
        .await
    {
        Ok(builds) => builds,
        Err(e) => {
            tracing::error!(build = build.number, error = %e, "Unable to list builds for auto-cancel");
            crate::metrics::auto_cancel("list_failed");
            return 0;
        }
    };

    let message = format!("build was auto canceled in favor of build {}", build.number);
    let mut canceled = 0;

    for candidate in active.into_iter().filter(|c| is_superseded_by(c, build)) {
        match candidate.status {
            BuildStatus::Pending | BuildStatus::PendingApproval if opts.pending => {}
            BuildStatus::Running if opts.running => {
                if let Err(e) = canceller.cancel_running(&candidate).await {
                    tracing::error!(
                        build = candidate.number,
                        error = %e,
                        "Failed to cancel running build"
                    );
                    crate::metrics::auto_cancel("cancel_failed");
                    continue;
                }
            }
            _ => continue,
        }

        let number = candidate.number;
        match build_service::update_status(store, candidate, BuildStatus::Canceled, message.as_str())
            .await
        {
            Ok(_) => {
                tracing::info!(build = number, superseded_by = build.number, "Build auto canceled");
                crate::metrics::auto_cancel("canceled");
                canceled += 1;
            }
            Err(e) => {
                tracing::error!(
                    build = number,
                    error = %e,
                    "Build canceled but failed to persist the cancellation"
                );
                crate::metrics::auto_cancel("persist_failed");
            }
        }
    }

    canceled
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{BuildDraft, Repository};
    use crate::queue::QueueError;
    use crate::services::build_service::create_build;
    use crate::services::hook_service::RetryPolicy;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct RecordingCanceller {
        canceled: Mutex<Vec<i64>>,
        fail: bool,
    }

    #[async_trait]
    impl BuildCanceller for RecordingCanceller {
        async fn cancel_running(&self, build: &Build) -> Result<(), QueueError> {
            if self.fail {
                return Err(QueueError::Cancel(build.id, "worker unreachable".into()));
            }
            self.canceled.lock().unwrap().push(build.number);
            Ok(())
        }
    }

    fn build(event: EventType, branch: &str, status: BuildStatus) -> Build {
        let draft = BuildDraft {
            event: Some(event),
            branch: branch.to_string(),
            status: Some(status),
            ..BuildDraft::default()
        };
        Build::from_draft(&draft, 1)
    }

    async fn persisted(store: &MemoryStore, repo: &Repository, b: Build) -> Build {
        create_build(store, b, repo, "http://ci", RetryPolicy::default())
            .await
            .unwrap()
    }

    const BOTH: AutoCancel = AutoCancel {
        pending: true,
        running: true,
        default_branch: true,
    };

    #[test]
    fn policy_requires_options() {
        let b = build(EventType::Push, "feature", BuildStatus::Pending);
        assert!(!should_auto_cancel(None, &b, "main"));
        assert!(!should_auto_cancel(Some(&AutoCancel::default()), &b, "main"));
        assert!(should_auto_cancel(Some(&BOTH), &b, "main"));
    }

    #[test]
    fn default_branch_needs_opt_in() {
        let b = build(EventType::Push, "main", BuildStatus::Pending);
        let opts = AutoCancel {
            default_branch: false,
            ..BOTH
        };
        assert!(!should_auto_cancel(Some(&opts), &b, "main"));
        assert!(should_auto_cancel(Some(&BOTH), &b, "main"));
    }

    #[test]
    fn pull_requests_only_cancel_on_synchronize() {
        let mut b = build(EventType::PullRequest, "main", BuildStatus::Pending);
        b.event_action = Some(EventAction::Opened);
        assert!(!should_auto_cancel(Some(&BOTH), &b, "main"));
        b.event_action = Some(EventAction::Synchronize);
        assert!(should_auto_cancel(Some(&BOTH), &b, "main"));
    }

    #[test]
    fn candidates_match_branch_event_and_head() {
        let mut newer = build(EventType::PullRequest, "main", BuildStatus::Pending);
        newer.id = 10;
        newer.number = 7;
        newer.head_ref = "fix".to_string();

        let mut older = newer.clone();
        older.id = 9;
        older.number = 6;
        assert!(is_superseded_by(&older, &newer));

        older.head_ref = "other".to_string();
        assert!(!is_superseded_by(&older, &newer));

        let mut later = newer.clone();
        later.id = 11;
        later.number = 8;
        assert!(!is_superseded_by(&later, &newer));
        assert!(!is_superseded_by(&newer, &newer));
    }

    #[tokio::test]
    async fn sweep_cancels_older_builds_on_the_same_branch() {
        let store = MemoryStore::new();
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let canceller = RecordingCanceller::default();

        let feature = persisted(&store, &repo, build(EventType::Push, "feature", BuildStatus::Pending)).await;
        let pending = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Pending)).await;
        let running = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Running)).await;
        let newest = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Pending)).await;

        let canceled = auto_cancel(&store, &canceller, &newest, BOTH).await;

        assert_eq!(canceled, 2);
        assert_eq!(*canceller.canceled.lock().unwrap(), vec![running.number]);
        for id in [pending.id, running.id] {
            let b = store.get_build(id).await.unwrap();
            assert_eq!(b.status, BuildStatus::Canceled);
            assert_eq!(b.error, "build was auto canceled in favor of build 4");
        }
        assert_eq!(store.get_build(feature.id).await.unwrap().status, BuildStatus::Pending);
        assert_eq!(store.get_build(newest.id).await.unwrap().status, BuildStatus::Pending);
    }

    #[tokio::test]
    async fn failed_cancellation_does_not_stop_the_sweep() {
        let store = MemoryStore::new();
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let canceller = RecordingCanceller {
            fail: true,
            ..RecordingCanceller::default()
        };

        let running = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Running)).await;
        let pending = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Pending)).await;
        let newest = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Pending)).await;

        let canceled = auto_cancel(&store, &canceller, &newest, BOTH).await;

        assert_eq!(canceled, 1);
        assert_eq!(store.get_build(running.id).await.unwrap().status, BuildStatus::Running);
        assert_eq!(store.get_build(pending.id).await.unwrap().status, BuildStatus::Canceled);
    }

    #[tokio::test]
    async fn running_builds_are_kept_unless_enabled() {
        let store = MemoryStore::new();
        let repo = store.create_repository(Repository::new("octo", "app")).await.unwrap();
        let canceller = RecordingCanceller::default();
        let opts = AutoCancel {
            running: false,
            ..BOTH
        };

        let running = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Running)).await;
        let newest = persisted(&store, &repo, build(EventType::Push, "main", BuildStatus::Pending)).await;

        assert_eq!(auto_cancel(&store, &canceller, &newest, opts).await, 0);
        assert_eq!(store.get_build(running.id).await.unwrap().status, BuildStatus::Running);
    }
}
