//! ci.build: A build draft parsed from a webhook and the persisted build.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{EventAction, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    PendingApproval,
    Running,
    Success,
    Failure,
    Error,
    Killed,
    Canceled,
    Skipped,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::PendingApproval => "pending_approval",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Error => "error",
            BuildStatus::Killed => "killed",
            BuildStatus::Canceled => "canceled",
            BuildStatus::Skipped => "skipped",
        }
    }

    /// Pending or running from the point of view of the build limit.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BuildStatus::Pending | BuildStatus::PendingApproval | BuildStatus::Running
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate build assembled from a webhook payload, before admission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDraft {
    pub event: Option<EventType>,
    pub event_action: Option<EventAction>,
    pub status: Option<BuildStatus>,
    pub error: String,
    pub branch: String,
    pub reference: String,
    pub base_ref: String,
    pub head_ref: String,
    pub commit: String,
    pub sender: String,
    pub sender_scm_id: String,
    pub author: String,
    pub email: String,
    pub title: String,
    pub message: String,
    pub source: String,
    pub clone: String,
    pub deploy: String,
    pub deploy_number: Option<i64>,
    pub deploy_payload: Option<serde_json::Value>,
    /// Paths touched by the triggering commits.
    #[serde(skip)]
    pub changed_files: Vec<String>,
}

impl BuildDraft {
    pub fn event(&self) -> EventType {
        self.event.unwrap_or(EventType::Push)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub event: EventType,
    pub event_action: Option<EventAction>,
    pub status: BuildStatus,
    pub error: String,
    pub link: String,
    pub branch: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub base_ref: String,
    pub head_ref: String,
    pub commit: String,
    pub sender: String,
    pub sender_scm_id: String,
    pub author: String,
    pub email: String,
    pub title: String,
    pub message: String,
    pub source: String,
    pub clone: String,
    pub deploy: String,
    pub deploy_number: Option<i64>,
    pub deploy_payload: Option<serde_json::Value>,
    pub fork: bool,
    pub created: DateTime<Utc>,
    pub enqueued: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

impl Build {
    /// Materializes a draft into a build belonging to `repo_id`.
    pub fn from_draft(draft: &BuildDraft, repo_id: i64) -> Self {
        Self {
            id: 0,
            repo_id,
            number: 0,
            event: draft.event(),
            event_action: draft.event_action,
            status: draft.status.unwrap_or(BuildStatus::Pending),
            error: draft.error.clone(),
            link: String::new(),
            branch: draft.branch.clone(),
            reference: draft.reference.clone(),
            base_ref: draft.base_ref.clone(),
            head_ref: draft.head_ref.clone(),
            commit: draft.commit.clone(),
            sender: draft.sender.clone(),
            sender_scm_id: draft.sender_scm_id.clone(),
            author: draft.author.clone(),
            email: draft.email.clone(),
            title: draft.title.clone(),
            message: draft.message.clone(),
            source: draft.source.clone(),
            clone: draft.clone.clone(),
            deploy: draft.deploy.clone(),
            deploy_number: draft.deploy_number,
            deploy_payload: draft.deploy_payload.clone(),
            fork: false,
            created: Utc::now(),
            enqueued: None,
            approved_by: None,
        }
    }
}
