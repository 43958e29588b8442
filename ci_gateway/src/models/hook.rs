//! ci.hook: One record per inbound webhook delivery.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{EventAction, EventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Running,
    Success,
    Failure,
    Skipped,
}

impl HookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HookStatus::Running => "running",
            HookStatus::Success => "success",
            HookStatus::Failure => "failure",
            HookStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for HookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Storage id; `None` until the hook has been created.
    pub id: Option<i64>,
    pub repo_id: Option<i64>,
    pub build_id: Option<i64>,
    /// Per-repository sequence number; zero until sequenced.
    pub number: i64,
    /// Provider delivery id.
    pub source_id: String,
    /// Provider subscription id.
    pub webhook_id: i64,
    pub event: EventType,
    pub event_action: Option<EventAction>,
    pub branch: String,
    pub created: DateTime<Utc>,
    pub host: String,
    pub status: HookStatus,
    pub error: String,
    pub link: String,
}

impl Hook {
    pub fn new(event: EventType, source_id: impl Into<String>) -> Self {
        Self {
            id: None,
            repo_id: None,
            build_id: None,
            number: 0,
            source_id: source_id.into(),
            webhook_id: 0,
            event,
            event_action: None,
            branch: String::new(),
            created: Utc::now(),
            host: String::new(),
            status: HookStatus::Success,
            error: String::new(),
            link: String::new(),
        }
    }

    /// Marks the hook with a terminal status and message.
    pub fn fail(&mut self, status: HookStatus, error: impl Into<String>) {
        self.status = status;
        self.error = error.into();
    }

    pub fn is_sequenced(&self) -> bool {
        self.repo_id.is_some() && self.number > 0
    }
}
