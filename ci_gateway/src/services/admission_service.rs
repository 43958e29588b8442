//! Admission checks for build drafts: repository state, event policy,
//! build-limit backpressure, and fork approval gating.

use crate::error::WebhookError;
use crate::models::{ApprovePolicy, Build, BuildDraft, EventType, PullRequestExtras, Repository};
use crate::scm::SourceControl;
use crate::store::Store;

use super::build_service;

pub fn check_active(repo: &Repository) -> Result<(), WebhookError> {
    if repo.active {
        return Ok(());
    }
    crate::metrics::build_rejected("inactive");
    Err(WebhookError::Validation(format!(
        "{} is not an active repo",
        repo.full_name
    )))
}

pub fn check_event_allowed(repo: &Repository, draft: &BuildDraft) -> Result<(), WebhookError> {
    if repo.allow_events.allowed(draft.event(), draft.event_action) {
        return Ok(());
    }
    crate::metrics::build_rejected("event_not_allowed");
    let event = match draft.event_action {
        Some(action) => format!("{}:{}", draft.event(), action),
        None => draft.event().to_string(),
    };
    Err(WebhookError::Validation(format!(
        "skipping build: event {event} not allowed for repo {}",
        repo.full_name
    )))
}

pub async fn check_build_limit(store: &dyn Store, repo: &Repository) -> Result<(), WebhookError> {
    if !build_service::at_build_limit(store, repo).await? {
        return Ok(());
    }
    crate::metrics::build_rejected("build_limit");
    Err(WebhookError::BuildLimit(format!(
        "unable to create build: repo {} has reached the concurrent build limit of {}",
        repo.full_name, repo.build_limit
    )))
}

/// Fill in the sender's provider id when the payload did not carry one.
pub async fn resolve_sender(scm: &dyn SourceControl, repo: &Repository, draft: &mut BuildDraft) {
    if !draft.sender_scm_id.is_empty() || draft.sender.is_empty() {
        return;
    }
    match scm.get_user_id(&draft.sender, &repo.owner.token).await {
        Ok(id) => draft.sender_scm_id = id,
        Err(e) => tracing::warn!(sender = %draft.sender, error = %e, "Unable to resolve sender id"),
    }
}

/// Comment payloads do not carry the pull request head; fetch it.
pub async fn complete_comment(
    scm: &dyn SourceControl,
    repo: &Repository,
    draft: &mut BuildDraft,
    pr: &PullRequestExtras,
) -> Result<(), WebhookError> {
    if draft.event() != EventType::Comment || !draft.commit.is_empty() {
        return Ok(());
    }
    let head = scm.get_pull_request(repo, pr.number).await?;
    draft.commit = head.commit;
    draft.branch = head.branch;
    draft.base_ref = head.base_ref;
    draft.head_ref = head.head_ref;
    Ok(())
}

/// Whether the build must wait for manual approval before it is queued.
///
/// Only fork pull requests are gated. Provider errors gate the build.
pub async fn needs_approval(
    scm: &dyn SourceControl,
    repo: &Repository,
    draft: &BuildDraft,
    pr: &PullRequestExtras,
) -> bool {
    if !pr.is_from_fork {
        return false;
    }

    match repo.approve_build {
        ApprovePolicy::Never => false,
        ApprovePolicy::ForkAlways => true,
        ApprovePolicy::ForkNoWrite => {
            match scm
                .repo_access(&draft.sender, &repo.owner.token, &repo.org, &repo.name)
                .await
            {
                Ok(level) => !matches!(level.as_str(), "admin" | "maintain" | "write"),
                Err(e) => {
                    tracing::warn!(sender = %draft.sender, error = %e, "Unable to check repo access, gating build");
                    true
                }
            }
        }
        ApprovePolicy::Once => {
            match scm
                .repo_contributor(&repo.owner, &draft.sender, &repo.org, &repo.name)
                .await
            {
                Ok(contributor) => !contributor,
                Err(e) => {
                    tracing::warn!(sender = %draft.sender, error = %e, "Unable to check contributor, gating build");
                    true
                }
            }
        }
    }
}

/// Publish the build's state to the provider. Failures are logged only.
pub async fn report_status(scm: &dyn SourceControl, repo: &Repository, build: &Build) {
    if let Err(e) = scm.set_commit_status(repo, build).await {
        tracing::warn!(
            repo = %repo.full_name,
            build = build.number,
            status = %build.status,
            error = %e,
            "Unable to set commit status"
        );
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::models::{AllowEvents, EventAction, User, Webhook};
    use crate::scm::{ParseError, PullRequestHead, RawWebhook, ScmError, SignatureError};

    /// Provider fake answering access checks from fixed values.
    struct FixedScm {
        access: Option<&'static str>,
        contributor: Option<bool>,
    }

    #[async_trait]
    impl SourceControl for FixedScm {
        fn process_webhook(&self, _: &RawWebhook) -> Result<Webhook, ParseError> {
            Err(ParseError::UnsupportedEvent("test".into()))
        }
        fn verify_webhook(&self, _: &RawWebhook, _: &[u8]) -> Result<(), SignatureError> {
            Ok(())
        }
        async fn get_user_id(&self, name: &str, _: &str) -> Result<String, ScmError> {
            Ok(format!("id-{name}"))
        }
        async fn set_commit_status(&self, _: &Repository, _: &Build) -> Result<(), ScmError> {
            Err(ScmError::NoToken)
        }
        async fn repo_access(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, ScmError> {
            self.access.map(str::to_string).ok_or(ScmError::NoToken)
        }
        async fn repo_contributor(&self, _: &User, _: &str, _: &str, _: &str) -> Result<bool, ScmError> {
            self.contributor.ok_or(ScmError::NoToken)
        }
        async fn get_pull_request(&self, _: &Repository, number: i64) -> Result<PullRequestHead, ScmError> {
            Ok(PullRequestHead {
                commit: format!("sha-{number}"),
                branch: "main".into(),
                base_ref: "main".into(),
                head_ref: "fix".into(),
            })
        }
    }

    fn fork() -> PullRequestExtras {
        PullRequestExtras {
            number: 4,
            is_from_fork: true,
            ..PullRequestExtras::default()
        }
    }

    fn repo_with(policy: ApprovePolicy) -> Repository {
        let mut repo = Repository::new("octo", "app");
        repo.approve_build = policy;
        repo
    }

    fn pull_draft(action: EventAction) -> BuildDraft {
        BuildDraft {
            event: Some(EventType::PullRequest),
            event_action: Some(action),
            sender: "contributor".into(),
            ..BuildDraft::default()
        }
    }

    #[test]
    fn inactive_repos_are_rejected() {
        let mut repo = Repository::new("octo", "app");
        repo.active = false;
        assert!(matches!(check_active(&repo), Err(WebhookError::Validation(_))));
    }

    #[test]
    fn event_policy_is_enforced() {
        let mut repo = Repository::new("octo", "app");
        repo.allow_events = AllowEvents::new(AllowEvents::PULL_OPENED);
        assert!(check_event_allowed(&repo, &pull_draft(EventAction::Opened)).is_ok());
        let err = check_event_allowed(&repo, &pull_draft(EventAction::Synchronize)).unwrap_err();
        assert!(err.to_string().contains("pull_request:synchronize"));
    }

    #[tokio::test]
    async fn same_repo_pull_requests_are_never_gated() {
        let scm = FixedScm { access: None, contributor: None };
        let pr = PullRequestExtras::default();
        let repo = repo_with(ApprovePolicy::ForkAlways);
        assert!(!needs_approval(&scm, &repo, &pull_draft(EventAction::Opened), &pr).await);
    }

    #[tokio::test]
    async fn fork_policies_gate_as_configured() {
        let draft = pull_draft(EventAction::Opened);
        let reader = FixedScm { access: Some("read"), contributor: Some(false) };
        let writer = FixedScm { access: Some("write"), contributor: Some(true) };

        assert!(!needs_approval(&reader, &repo_with(ApprovePolicy::Never), &draft, &fork()).await);
        assert!(needs_approval(&writer, &repo_with(ApprovePolicy::ForkAlways), &draft, &fork()).await);
        assert!(needs_approval(&reader, &repo_with(ApprovePolicy::ForkNoWrite), &draft, &fork()).await);
        assert!(!needs_approval(&writer, &repo_with(ApprovePolicy::ForkNoWrite), &draft, &fork()).await);
        assert!(needs_approval(&reader, &repo_with(ApprovePolicy::Once), &draft, &fork()).await);
        assert!(!needs_approval(&writer, &repo_with(ApprovePolicy::Once), &draft, &fork()).await);
    }

    #[tokio::test]
    async fn provider_errors_fail_closed() {
        let broken = FixedScm { access: None, contributor: None };
        let draft = pull_draft(EventAction::Opened);
        assert!(needs_approval(&broken, &repo_with(ApprovePolicy::ForkNoWrite), &draft, &fork()).await);
        assert!(needs_approval(&broken, &repo_with(ApprovePolicy::Once), &draft, &fork()).await);
    }

    #[tokio::test]
    async fn comments_are_completed_from_the_pull_request() {
        let scm = FixedScm { access: None, contributor: None };
        let mut draft = BuildDraft {
            event: Some(EventType::Comment),
            ..BuildDraft::default()
        };
        complete_comment(&scm, &Repository::new("octo", "app"), &mut draft, &fork())
            .await
            .unwrap();
        assert_eq!(draft.commit, "sha-4");
        assert_eq!(draft.head_ref, "fix");
    }

    #[tokio::test]
    async fn sender_id_is_resolved_once() {
        let scm = FixedScm { access: None, contributor: None };
        let repo = Repository::new("octo", "app");
        let mut draft = pull_draft(EventAction::Opened);
        resolve_sender(&scm, &repo, &mut draft).await;
        assert_eq!(draft.sender_scm_id, "id-contributor");

        draft.sender_scm_id = "kept".into();
        resolve_sender(&scm, &repo, &mut draft).await;
        assert_eq!(draft.sender_scm_id, "kept");
    }
}
