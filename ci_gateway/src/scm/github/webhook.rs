//! GitHub webhook payload classification.
//!
//! Turns a delivery into a [`Webhook`] envelope: the hook metadata, the
//! repository snapshot, and, depending on the event, a build draft, a
//! deployment draft, pull-request extras, or an installation change.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{
    BuildDraft, Deployment, EventAction, EventType, Hook, Installation, Repository, Webhook,
};
use crate::scm::{ParseError, RawWebhook};

pub const HEADER_EVENT: &str = "x-github-event";
pub const HEADER_DELIVERY: &str = "x-github-delivery";
pub const HEADER_HOOK_ID: &str = "x-github-hook-id";
pub const HEADER_HOST: &str = "x-github-enterprise-host";
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

// ── Payload shapes ──

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
    #[serde(default)]
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    name: String,
    full_name: String,
    owner: GhUser,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    clone_url: String,
    #[serde(default)]
    default_branch: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GhRepoRef {
    full_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GhCommitAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    #[serde(default)]
    message: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: GhCommitAuthor,
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    before: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    base_ref: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    compare: String,
    #[serde(default)]
    head_commit: Option<GhCommit>,
    #[serde(default)]
    commits: Vec<GhCommit>,
    repository: Option<GhRepo>,
    sender: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhBranch {
    #[serde(rename = "ref")]
    reference: String,
    sha: String,
    #[serde(default)]
    repo: Option<GhRepoRef>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    #[serde(default)]
    title: String,
    #[serde(default)]
    html_url: String,
    user: GhUser,
    head: GhBranch,
    base: GhBranch,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    number: i64,
    pull_request: GhPull,
    #[serde(default)]
    label: Option<GhLabel>,
    repository: Option<GhRepo>,
    sender: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    #[serde(default)]
    body: String,
    #[serde(default)]
    html_url: String,
    user: GhUser,
}

#[derive(Debug, Deserialize)]
struct IssueCommentEvent {
    action: String,
    issue: GhIssue,
    comment: GhComment,
    repository: Option<GhRepo>,
    sender: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhDeployment {
    id: i64,
    #[serde(default)]
    url: String,
    sha: String,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    task: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    creator: Option<GhUser>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DeploymentEvent {
    #[serde(default)]
    action: Option<String>,
    deployment: GhDeployment,
    repository: Option<GhRepo>,
    sender: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhFrom<T> {
    from: T,
}

#[derive(Debug, Deserialize)]
struct GhRepoNameChange {
    #[serde(default)]
    name: Option<GhFrom<String>>,
}

#[derive(Debug, Deserialize)]
struct GhPreviousOwner {
    #[serde(default)]
    user: Option<GhUser>,
    #[serde(default)]
    organization: Option<GhUser>,
}

#[derive(Debug, Default, Deserialize)]
struct GhRepoChanges {
    #[serde(default)]
    repository: Option<GhRepoNameChange>,
    #[serde(default)]
    owner: Option<GhFrom<GhPreviousOwner>>,
}

#[derive(Debug, Deserialize)]
struct RepositoryEvent {
    action: String,
    repository: Option<GhRepo>,
    #[serde(default)]
    changes: Option<GhRepoChanges>,
}

#[derive(Debug, Deserialize)]
struct GhInstallation {
    id: i64,
    #[serde(default)]
    account: Option<GhUser>,
}

#[derive(Debug, Deserialize)]
struct InstallationEvent {
    action: String,
    installation: GhInstallation,
    #[serde(default)]
    repositories: Vec<GhRepoRef>,
    #[serde(default)]
    repositories_added: Vec<GhRepoRef>,
    #[serde(default)]
    repositories_removed: Vec<GhRepoRef>,
}

#[derive(Debug, Deserialize)]
struct PingEvent {
    #[serde(default)]
    repository: Option<GhRepo>,
}

// ── Classification ──

/// Parse a GitHub delivery into a webhook envelope.
pub fn parse_webhook(request: &RawWebhook) -> Result<Webhook, ParseError> {
    let event = request
        .header(HEADER_EVENT)
        .ok_or(ParseError::MissingHeader(HEADER_EVENT))?
        .to_string();
    let delivery = request
        .header(HEADER_DELIVERY)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let webhook_id = request
        .header(HEADER_HOOK_ID)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    let host = request.header(HEADER_HOST).unwrap_or("github.com").to_string();

    let body = request.body();
    let hook = |event_type: EventType| {
        let mut hook = Hook::new(event_type, delivery.clone());
        hook.webhook_id = webhook_id;
        hook.host = host.clone();
        hook
    };

    match event.as_str() {
        "push" => Ok(push(hook(EventType::Push), serde_json::from_slice(&body)?)),
        "pull_request" => Ok(pull_request(
            hook(EventType::PullRequest),
            serde_json::from_slice(&body)?,
        )),
        "issue_comment" => Ok(issue_comment(
            hook(EventType::Comment),
            serde_json::from_slice(&body)?,
        )),
        "deployment" => Ok(deployment(
            hook(EventType::Deployment),
            serde_json::from_slice(&body)?,
        )),
        "repository" => Ok(repository(
            hook(EventType::Repository),
            serde_json::from_slice(&body)?,
        )),
        "installation" | "installation_repositories" => Ok(installation(
            hook(EventType::Installation),
            serde_json::from_slice(&body)?,
        )),
        "ping" => {
            let payload: PingEvent = serde_json::from_slice(&body)?;
            let mut webhook = Webhook::new(hook(EventType::Ping));
            webhook.repo = payload.repository.map(snapshot);
            Ok(webhook)
        }
        other => Err(ParseError::UnsupportedEvent(other.to_string())),
    }
}

fn snapshot(repo: GhRepo) -> Repository {
    let mut snapshot = Repository::new(&repo.owner.login, &repo.name);
    snapshot.full_name = repo.full_name;
    snapshot.link = repo.html_url;
    snapshot.clone = repo.clone_url;
    if !repo.default_branch.is_empty() {
        snapshot.branch = repo.default_branch;
    }
    snapshot.private = repo.private;
    snapshot.visibility = repo
        .visibility
        .unwrap_or_else(|| if repo.private { "private" } else { "public" }.to_string());
    snapshot.active = !repo.archived;
    snapshot.topics = repo.topics;
    snapshot
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

fn sender_fields(draft: &mut BuildDraft, sender: Option<GhUser>) {
    if let Some(sender) = sender {
        draft.sender = sender.login;
        if sender.id != 0 {
            draft.sender_scm_id = sender.id.to_string();
        }
    }
}

fn push(mut hook: Hook, payload: PushEvent) -> Webhook {
    let is_tag = payload.reference.starts_with("refs/tags/");
    let name = payload
        .reference
        .trim_start_matches("refs/heads/")
        .trim_start_matches("refs/tags/")
        .to_string();

    let mut draft = BuildDraft {
        reference: payload.reference.clone(),
        commit: payload.after.clone(),
        source: payload.compare.clone(),
        ..BuildDraft::default()
    };

    if payload.deleted {
        let (action, label) = if is_tag {
            (EventAction::Tag, "Tag")
        } else {
            (EventAction::Branch, "Branch")
        };
        draft.event = Some(EventType::Delete);
        draft.event_action = Some(action);
        draft.commit = payload.before.clone();
        draft.branch = name.clone();
        draft.title = format!("{label} {name} deleted");
        draft.message = draft.title.clone();
    } else if is_tag {
        draft.event = Some(EventType::Tag);
        draft.branch = payload
            .base_ref
            .as_deref()
            .map(|r| r.trim_start_matches("refs/heads/").to_string())
            .unwrap_or_default();
    } else {
        draft.event = Some(EventType::Push);
        draft.branch = name;
    }

    if let Some(commit) = &payload.head_commit {
        if !payload.deleted {
            draft.title = first_line(&commit.message);
            draft.message = commit.message.clone();
        }
        draft.author = commit
            .author
            .username
            .clone()
            .unwrap_or_else(|| commit.author.name.clone());
        draft.email = commit.author.email.clone();
        if draft.source.is_empty() {
            draft.source = commit.url.clone();
        }
    }

    for commit in &payload.commits {
        for path in commit
            .added
            .iter()
            .chain(&commit.modified)
            .chain(&commit.removed)
        {
            if !draft.changed_files.contains(path) {
                draft.changed_files.push(path.clone());
            }
        }
    }

    sender_fields(&mut draft, payload.sender);

    let repo = payload.repository.map(snapshot);
    if let Some(repo) = &repo {
        draft.clone = repo.clone.clone();
        if draft.author.is_empty() {
            draft.author = draft.sender.clone();
        }
    }

    hook.event = draft.event();
    hook.event_action = draft.event_action;
    hook.branch = draft.branch.clone();
    hook.link = draft.source.clone();

    let mut webhook = Webhook::new(hook);
    webhook.repo = repo;
    webhook.build = Some(draft);
    webhook
}

fn pull_request(mut hook: Hook, payload: PullRequestEvent) -> Webhook {
    let action = EventAction::parse(&payload.action);
    hook.event_action = action;
    hook.branch = payload.pull_request.base.reference.clone();
    hook.link = payload.pull_request.html_url.clone();

    let mut webhook = Webhook::new(hook);
    webhook.repo = payload.repository.map(snapshot);

    let builds = matches!(
        action,
        Some(
            EventAction::Opened
                | EventAction::Synchronize
                | EventAction::Edited
                | EventAction::Reopened
                | EventAction::Labeled
                | EventAction::Unlabeled
        )
    );
    if !builds {
        return webhook;
    }

    let pr = payload.pull_request;
    let head_repo = pr.head.repo.as_ref().map(|r| r.full_name.as_str());
    let base_repo = pr.base.repo.as_ref().map(|r| r.full_name.as_str());
    let is_from_fork = head_repo.is_some() && head_repo != base_repo;

    let mut draft = BuildDraft {
        event: Some(EventType::PullRequest),
        event_action: action,
        branch: pr.base.reference.clone(),
        reference: format!("refs/pull/{}/head", payload.number),
        base_ref: pr.base.reference.clone(),
        head_ref: pr.head.reference.clone(),
        commit: pr.head.sha.clone(),
        author: pr.user.login.clone(),
        title: format!("pull_request received from {}", pr.html_url),
        message: pr.title.clone(),
        source: pr.html_url.clone(),
        ..BuildDraft::default()
    };
    sender_fields(&mut draft, payload.sender);
    if let Some(repo) = &webhook.repo {
        draft.clone = repo.clone.clone();
    }

    webhook.pull_request.number = payload.number;
    webhook.pull_request.is_from_fork = is_from_fork;
    webhook.pull_request.labels = match (action, payload.label) {
        (Some(EventAction::Labeled | EventAction::Unlabeled), Some(label)) => vec![label.name],
        _ => pr.labels.into_iter().map(|l| l.name).collect(),
    };
    webhook.build = Some(draft);
    webhook
}

fn issue_comment(mut hook: Hook, payload: IssueCommentEvent) -> Webhook {
    let action = EventAction::parse(&payload.action);
    hook.event_action = action;
    hook.link = payload.comment.html_url.clone();

    let mut webhook = Webhook::new(hook);
    webhook.repo = payload.repository.map(snapshot);

    let on_pull_request = payload.issue.pull_request.is_some();
    let builds = matches!(action, Some(EventAction::Created | EventAction::Edited));
    if !on_pull_request || !builds {
        return webhook;
    }

    let mut draft = BuildDraft {
        event: Some(EventType::Comment),
        event_action: action,
        reference: format!("refs/pull/{}/head", payload.issue.number),
        author: payload.comment.user.login.clone(),
        title: format!("comment received from {}", payload.comment.html_url),
        message: payload.issue.title.clone(),
        source: payload.comment.html_url.clone(),
        ..BuildDraft::default()
    };
    sender_fields(&mut draft, payload.sender);
    if let Some(repo) = &webhook.repo {
        draft.clone = repo.clone.clone();
    }

    webhook.pull_request.number = payload.issue.number;
    webhook.pull_request.comment = Some(payload.comment.body);
    webhook.build = Some(draft);
    webhook
}

fn deployment(mut hook: Hook, payload: DeploymentEvent) -> Webhook {
    let action = payload
        .action
        .as_deref()
        .and_then(EventAction::parse)
        .or(Some(EventAction::Created));
    let d = payload.deployment;

    let reference = if d.reference.starts_with("refs/") {
        d.reference.clone()
    } else {
        format!("refs/heads/{}", d.reference)
    };
    let branch = d
        .reference
        .trim_start_matches("refs/heads/")
        .trim_start_matches("refs/tags/")
        .to_string();

    hook.event_action = action;
    hook.branch = branch.clone();
    hook.link = d.url.clone();

    let mut draft = BuildDraft {
        event: Some(EventType::Deployment),
        event_action: action,
        branch,
        reference: reference.clone(),
        commit: d.sha.clone(),
        title: format!("deployment received from {}", d.url),
        message: d.description.clone().unwrap_or_default(),
        source: d.url.clone(),
        deploy: d.environment.clone(),
        deploy_number: Some(d.id),
        deploy_payload: d.payload.clone(),
        ..BuildDraft::default()
    };
    sender_fields(&mut draft, payload.sender);
    draft.author = draft.sender.clone();

    let deployment = Deployment {
        number: d.id,
        url: d.url,
        commit: d.sha,
        reference,
        task: d.task,
        target: d.environment,
        description: d.description.unwrap_or_default(),
        payload: d.payload,
        created_by: d.creator.map(|c| c.login).unwrap_or_default(),
        created_at: d.created_at,
        ..Deployment::default()
    };

    let mut webhook = Webhook::new(hook);
    webhook.repo = payload.repository.map(snapshot);
    if let Some(repo) = &webhook.repo {
        draft.clone = repo.clone.clone();
    }
    webhook.build = Some(draft);
    webhook.deployment = Some(deployment);
    webhook
}

fn repository(mut hook: Hook, payload: RepositoryEvent) -> Webhook {
    let action = EventAction::parse(&payload.action);
    hook.event_action = action;

    let mut repo = payload.repository.map(snapshot);
    let changes = payload.changes.unwrap_or_default();

    if let Some(repo) = repo.as_mut() {
        hook.branch = repo.branch.clone();
        hook.link = repo.link.clone();
        match action {
            Some(EventAction::Renamed) => {
                if let Some(from) = changes.repository.and_then(|r| r.name) {
                    repo.previous_name = Some(format!("{}/{}", repo.org, from.from));
                }
            }
            Some(EventAction::Transferred) => {
                if let Some(owner) = changes.owner {
                    let previous = owner.from.organization.or(owner.from.user);
                    if let Some(previous) = previous {
                        repo.previous_name = Some(format!("{}/{}", previous.login, repo.name));
                    }
                }
            }
            _ => {}
        }
    }

    let mut webhook = Webhook::new(hook);
    webhook.repo = repo;
    webhook
}

fn installation(mut hook: Hook, payload: InstallationEvent) -> Webhook {
    let action = EventAction::parse(&payload.action);
    hook.event_action = action;

    let names = |repos: Vec<GhRepoRef>| repos.into_iter().map(|r| r.full_name).collect::<Vec<_>>();
    let mut added = names(payload.repositories_added);
    let mut removed = names(payload.repositories_removed);
    match action {
        Some(EventAction::Created) => added.extend(names(payload.repositories)),
        Some(EventAction::Deleted) => removed.extend(names(payload.repositories)),
        _ => {}
    }

    let mut webhook = Webhook::new(hook);
    webhook.installation = Some(Installation {
        id: payload.installation.id,
        action,
        org: payload
            .installation
            .account
            .map(|a| a.login)
            .unwrap_or_default(),
        repositories_added: added,
        repositories_removed: removed,
    });
    webhook
}
