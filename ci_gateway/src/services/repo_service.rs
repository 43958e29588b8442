//! Repository lifecycle events: rename/transfer cascades and the
//! archive/unarchive/edit field sync.

use crate::error::WebhookError;
use crate::models::{EventAction, Hook, Repository};
use crate::store::{Store, StoreError};

use super::build_service::build_link;
use super::hook_service::{sequence_hook, RetryPolicy};

const PAGE_SIZE: i64 = 100;

/// Resolve the enrolled repository a lifecycle event refers to.
///
/// Renames and transfers arrive under the new name, so they are resolved
/// through the subscription's last hook, falling back to the previous name.
pub async fn lookup_repository(
    store: &dyn Store,
    hook: &Hook,
    incoming: &Repository,
) -> Result<Repository, WebhookError> {
    if matches!(
        hook.event_action,
        Some(EventAction::Renamed | EventAction::Transferred)
    ) {
        return lookup_renamed(store, hook, incoming).await;
    }

    store
        .get_repository(&incoming.org, &incoming.name)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => WebhookError::Validation(format!(
                "unable to get repo {}: not enrolled",
                incoming.full_name
            )),
            e => e.into(),
        })
}

async fn lookup_renamed(
    store: &dyn Store,
    hook: &Hook,
    incoming: &Repository,
) -> Result<Repository, WebhookError> {
    let by_hook = match store.get_hook_by_webhook_id(hook.webhook_id).await {
        Ok(last) => match last.repo_id {
            Some(repo_id) => Some(store.get_repository_by_id(repo_id).await),
            None => None,
        },
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    match by_hook {
        Some(Ok(repo)) => return Ok(repo),
        Some(Err(StoreError::NotFound(_))) | None => {}
        Some(Err(e)) => return Err(e.into()),
    }

    if let Some((org, name)) = incoming
        .previous_name
        .as_deref()
        .and_then(|previous| previous.split_once('/'))
    {
        match store.get_repository(org, name).await {
            Ok(repo) => return Ok(repo),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Err(WebhookError::NotFound(format!(
        "unable to find repo for webhook {} ({})",
        hook.webhook_id, incoming.full_name
    )))
}

/// Apply a repository lifecycle event to `current`.
///
/// Returns the persisted repository when the event changed it, or `None`
/// for actions that are acknowledged without mutation.
pub async fn reconcile(
    store: &dyn Store,
    hook: &mut Hook,
    current: Repository,
    incoming: &Repository,
    retry: RetryPolicy,
    web_address: &str,
) -> Result<Option<Repository>, WebhookError> {
    match hook.event_action {
        Some(EventAction::Renamed | EventAction::Transferred) => {
            rename_repository(store, hook, current, incoming, retry, web_address)
                .await
                .map(Some)
        }
        Some(EventAction::Archived | EventAction::Unarchived | EventAction::Edited) => {
            sequence_hook(store, hook, &current, retry).await?;

            let mut repo = current;
            repo.branch = incoming.branch.clone();
            repo.active = incoming.active;
            repo.topics = incoming.topics.clone();

            let repo = store.update_repository(repo).await?;
            tracing::info!(
                repo = %repo.full_name,
                active = repo.active,
                branch = %repo.branch,
                "Repository synced"
            );
            Ok(Some(repo))
        }
        Some(
            EventAction::Opened
            | EventAction::Synchronize
            | EventAction::Reopened
            | EventAction::Labeled
            | EventAction::Unlabeled
            | EventAction::Closed
            | EventAction::Created
            | EventAction::Deleted
            | EventAction::Branch
            | EventAction::Tag
            | EventAction::Added
            | EventAction::Removed,
        )
        | None => {
            sequence_hook(store, hook, &current, retry).await?;
            tracing::debug!(
                repo = %current.full_name,
                action = ?hook.event_action,
                "Repository event ignored"
            );
            Ok(None)
        }
    }
}

/// Move `current` to the identity carried by `incoming`.
///
/// Secrets and build links are rewritten one at a time; a failure part-way
/// leaves the already-written records on the new identity.
pub async fn rename_repository(
    store: &dyn Store,
    hook: &mut Hook,
    current: Repository,
    incoming: &Repository,
    retry: RetryPolicy,
    web_address: &str,
) -> Result<Repository, WebhookError> {
    // the rename is recorded against the identity being renamed
    sequence_hook(store, hook, &current, retry).await?;

    let old_org = current.org.clone();
    let old_name = current.name.clone();

    let secrets = collect_pages(
        store
            .count_secrets_for_repository(&old_org, &old_name)
            .await?,
        |page| store.list_secrets_for_repository(&old_org, &old_name, page, PAGE_SIZE),
    )
    .await?;
    for mut secret in secrets {
        secret.org = incoming.org.clone();
        secret.repo = incoming.name.clone();
        store.update_secret(secret).await?;
    }

    let builds = collect_pages(
        store.count_builds_for_repository(current.id).await?,
        |page| store.list_builds_for_repository(current.id, page, PAGE_SIZE),
    )
    .await?;
    let build_count = builds.len();
    for mut build in builds {
        build.link = build_link(web_address, &incoming.full_name, build.number);
        store.update_build(build).await?;
    }

    let mut repo = current;
    repo.name = incoming.name.clone();
    repo.org = incoming.org.clone();
    repo.full_name = incoming.full_name.clone();
    repo.clone = incoming.clone.clone();
    repo.link = incoming.link.clone();
    repo.previous_name = Some(
        incoming
            .previous_name
            .clone()
            .unwrap_or_else(|| format!("{old_org}/{old_name}")),
    );

    let repo = store.update_repository(repo).await?;
    tracing::info!(
        from = %format!("{old_org}/{old_name}"),
        to = %repo.full_name,
        builds = build_count,
        "Repository renamed"
    );
    Ok(repo)
}

/// Read every page up front; rewriting while paging would shift the pages
/// that key on the old identity.
async fn collect_pages<T, F, Fut>(total: i64, mut fetch: F) -> Result<Vec<T>, StoreError>
where
    F: FnMut(i64) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>, StoreError>>,
{
    let mut items = Vec::with_capacity(total.max(0) as usize);
    let pages = (total + PAGE_SIZE - 1) / PAGE_SIZE;
    for page in 1..=pages {
        let batch = fetch(page).await?;
        if batch.is_empty() {
            break;
        }
        items.extend(batch);
    }
    Ok(items)
}
