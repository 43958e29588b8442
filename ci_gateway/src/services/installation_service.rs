//! App installation changes applied to enrolled repositories.

use crate::models::{EventAction, Installation};
use crate::store::{Store, StoreError, StoreResult};

/// Set or clear `install_id` on the enrolled repositories the installation
/// names. Returns how many repositories changed; unknown names are skipped.
pub async fn process_installation(
    store: &dyn Store,
    installation: &Installation,
) -> StoreResult<usize> {
    let (install, uninstall): (&[String], &[String]) = match installation.action {
        Some(EventAction::Created | EventAction::Added) => (
            installation.repositories_added.as_slice(),
            installation.repositories_removed.as_slice(),
        ),
        Some(EventAction::Deleted | EventAction::Removed) => {
            (&[], installation.repositories_removed.as_slice())
        }
        _ => {
            tracing::debug!(
                installation = installation.id,
                action = ?installation.action,
                "Installation action ignored"
            );
            return Ok(0);
        }
    };

    let mut changed = 0;
    for (full_name, install_id) in install
        .iter()
        .map(|n| (n, Some(installation.id)))
        .chain(uninstall.iter().map(|n| (n, None)))
    {
        let Some((org, name)) = full_name.split_once('/') else {
            tracing::warn!(repo = %full_name, "Installation names an invalid repository");
            continue;
        };

        let mut repo = match store.get_repository(org, name).await {
            Ok(repo) => repo,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(repo = %full_name, "Installation repository not enrolled");
                continue;
            }
            Err(e) => return Err(e),
        };

        if repo.install_id == install_id {
            continue;
        }
        repo.install_id = install_id;
        store.update_repository(repo).await?;
        changed += 1;
    }

    tracing::info!(
        installation = installation.id,
        org = %installation.org,
        changed,
        "Installation processed"
    );
    Ok(changed)
}
