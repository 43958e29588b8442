//! Parsed webhook envelope. Never persisted as a unit; its parts are fanned
//! out into hooks, repositories, builds, and deployments.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::build::BuildDraft;
use super::deployment::Deployment;
use super::events::{EventAction, EventType};
use super::hook::Hook;
use super::repo::Repository;

static SKIP_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(skip ci|ci skip|skip vela|vela skip)\]|\*\*\*NO_CI\*\*\*")
        .expect("skip directive pattern is valid")
});

/// Pull-request details that do not belong on the build itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestExtras {
    pub number: i64,
    pub comment: Option<String>,
    pub labels: Vec<String>,
    pub is_from_fork: bool,
}

/// App installation change delivered to the application-level endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: i64,
    pub action: Option<EventAction>,
    pub org: String,
    pub repositories_added: Vec<String>,
    pub repositories_removed: Vec<String>,
}

/// Optional skip rules beyond commit directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipPolicy {
    pub bot_senders: bool,
    pub docs_only: bool,
}

#[derive(Debug, Clone)]
pub struct Webhook {
    pub hook: Hook,
    pub repo: Option<Repository>,
    pub build: Option<BuildDraft>,
    pub deployment: Option<Deployment>,
    pub pull_request: PullRequestExtras,
    pub installation: Option<Installation>,
}

impl Webhook {
    pub fn new(hook: Hook) -> Self {
        Self {
            hook,
            repo: None,
            build: None,
            deployment: None,
            pull_request: PullRequestExtras::default(),
            installation: None,
        }
    }

    /// Returns the reason this delivery should be acknowledged without a build.
    pub fn should_skip(&self, policy: SkipPolicy) -> Option<String> {
        if self.hook.event == EventType::Ping {
            return Some("ping event skipped".to_string());
        }

        let build = self.build.as_ref()?;

        // comments re-run the head commit; its message does not apply
        if build.event() != EventType::Comment {
            if SKIP_DIRECTIVE.is_match(&build.title) {
                return Some("skip ci directive found in commit title".to_string());
            }
            if SKIP_DIRECTIVE.is_match(&build.message) {
                return Some("skip ci directive found in commit message".to_string());
            }
        }

        if policy.bot_senders && build.sender.ends_with("[bot]") {
            return Some(format!("build from bot sender {} skipped", build.sender));
        }

        if policy.docs_only
            && build.event() == EventType::Push
            && !build.changed_files.is_empty()
            && build.changed_files.iter().all(|path| is_documentation(path))
        {
            return Some("documentation-only change skipped".to_string());
        }

        None
    }
}

fn is_documentation(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with("docs/")
        || lower.ends_with(".md")
        || lower.ends_with(".rst")
        || lower.ends_with(".txt")
}
