//! Event kinds, actions, and the per-repository allow-events policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of provider event carried by a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    Tag,
    PullRequest,
    Comment,
    Deployment,
    Delete,
    Schedule,
    Repository,
    Installation,
    Ping,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::Tag => "tag",
            EventType::PullRequest => "pull_request",
            EventType::Comment => "comment",
            EventType::Deployment => "deployment",
            EventType::Delete => "delete",
            EventType::Schedule => "schedule",
            EventType::Repository => "repository",
            EventType::Installation => "installation",
            EventType::Ping => "ping",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action qualifying an event. Provider actions outside this set are carried
/// as `None` on the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Opened,
    Synchronize,
    Edited,
    Reopened,
    Labeled,
    Unlabeled,
    Closed,
    Created,
    Deleted,
    Branch,
    Tag,
    Renamed,
    Transferred,
    Archived,
    Unarchived,
    Added,
    Removed,
}

impl EventAction {
    /// Parses a provider action string. Unknown actions yield `None`.
    pub fn parse(action: &str) -> Option<Self> {
        let action = match action {
            "opened" => EventAction::Opened,
            "synchronize" => EventAction::Synchronize,
            "edited" => EventAction::Edited,
            "reopened" => EventAction::Reopened,
            "labeled" => EventAction::Labeled,
            "unlabeled" => EventAction::Unlabeled,
            "closed" => EventAction::Closed,
            "created" => EventAction::Created,
            "deleted" => EventAction::Deleted,
            "branch" => EventAction::Branch,
            "tag" => EventAction::Tag,
            "renamed" => EventAction::Renamed,
            "transferred" => EventAction::Transferred,
            "archived" => EventAction::Archived,
            "unarchived" => EventAction::Unarchived,
            "added" => EventAction::Added,
            "removed" => EventAction::Removed,
            _ => return None,
        };
        Some(action)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventAction::Opened => "opened",
            EventAction::Synchronize => "synchronize",
            EventAction::Edited => "edited",
            EventAction::Reopened => "reopened",
            EventAction::Labeled => "labeled",
            EventAction::Unlabeled => "unlabeled",
            EventAction::Closed => "closed",
            EventAction::Created => "created",
            EventAction::Deleted => "deleted",
            EventAction::Branch => "branch",
            EventAction::Tag => "tag",
            EventAction::Renamed => "renamed",
            EventAction::Transferred => "transferred",
            EventAction::Archived => "archived",
            EventAction::Unarchived => "unarchived",
            EventAction::Added => "added",
            EventAction::Removed => "removed",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitmask over event type × action that a repository accepts builds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowEvents(u64);

impl AllowEvents {
    pub const PUSH_BRANCH: u64 = 1 << 0;
    pub const PUSH_TAG: u64 = 1 << 1;
    pub const PULL_OPENED: u64 = 1 << 2;
    pub const PULL_EDITED: u64 = 1 << 3;
    pub const PULL_SYNCHRONIZE: u64 = 1 << 4;
    // 1 << 5 is reserved (formerly pull closed).
    pub const DEPLOYMENT_CREATED: u64 = 1 << 6;
    pub const COMMENT_CREATED: u64 = 1 << 7;
    pub const COMMENT_EDITED: u64 = 1 << 8;
    pub const SCHEDULE: u64 = 1 << 9;
    pub const DELETE_BRANCH: u64 = 1 << 10;
    pub const DELETE_TAG: u64 = 1 << 11;
    pub const PULL_REOPENED: u64 = 1 << 12;
    pub const PULL_LABELED: u64 = 1 << 13;
    pub const PULL_UNLABELED: u64 = 1 << 14;

    pub const fn new(mask: u64) -> Self {
        Self(mask)
    }

    pub const fn none() -> Self {
        Self(0)
    }

    pub fn mask(self) -> u64 {
        self.0
    }

    pub fn with(self, bit: u64) -> Self {
        Self(self.0 | bit)
    }

    /// Whether a build for `event`/`action` is permitted.
    pub fn allowed(self, event: EventType, action: Option<EventAction>) -> bool {
        let bit = match event {
            EventType::Push => Self::PUSH_BRANCH,
            EventType::Tag => Self::PUSH_TAG,
            EventType::PullRequest => match action {
                Some(EventAction::Opened) => Self::PULL_OPENED,
                Some(EventAction::Edited) => Self::PULL_EDITED,
                Some(EventAction::Synchronize) => Self::PULL_SYNCHRONIZE,
                Some(EventAction::Reopened) => Self::PULL_REOPENED,
                Some(EventAction::Labeled) => Self::PULL_LABELED,
                Some(EventAction::Unlabeled) => Self::PULL_UNLABELED,
                _ => return false,
            },
            EventType::Comment => match action {
                Some(EventAction::Created) => Self::COMMENT_CREATED,
                Some(EventAction::Edited) => Self::COMMENT_EDITED,
                _ => return false,
            },
            EventType::Deployment => match action {
                Some(EventAction::Created) | None => Self::DEPLOYMENT_CREATED,
                _ => return false,
            },
            EventType::Delete => match action {
                Some(EventAction::Branch) => Self::DELETE_BRANCH,
                Some(EventAction::Tag) => Self::DELETE_TAG,
                _ => return false,
            },
            EventType::Schedule => Self::SCHEDULE,
            EventType::Repository | EventType::Installation | EventType::Ping => return false,
        };

        self.0 & bit != 0
    }
}

impl Default for AllowEvents {
    fn default() -> Self {
        Self(
            Self::PUSH_BRANCH
                | Self::PUSH_TAG
                | Self::PULL_OPENED
                | Self::PULL_SYNCHRONIZE
                | Self::PULL_REOPENED
                | Self::DEPLOYMENT_CREATED
                | Self::COMMENT_CREATED,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_common_triggers() {
        let allow = AllowEvents::default();
        assert!(allow.allowed(EventType::Push, None));
        assert!(allow.allowed(EventType::Tag, None));
        assert!(allow.allowed(EventType::PullRequest, Some(EventAction::Opened)));
        assert!(allow.allowed(EventType::PullRequest, Some(EventAction::Synchronize)));
        assert!(allow.allowed(EventType::Deployment, Some(EventAction::Created)));
        assert!(allow.allowed(EventType::Comment, Some(EventAction::Created)));
    }

    #[test]
    fn default_policy_rejects_opt_in_triggers() {
        let allow = AllowEvents::default();
        assert!(!allow.allowed(EventType::PullRequest, Some(EventAction::Edited)));
        assert!(!allow.allowed(EventType::PullRequest, Some(EventAction::Labeled)));
        assert!(!allow.allowed(EventType::Comment, Some(EventAction::Edited)));
        assert!(!allow.allowed(EventType::Delete, Some(EventAction::Branch)));
        assert!(!allow.allowed(EventType::Schedule, None));
    }

    #[test]
    fn pull_request_without_known_action_is_never_allowed() {
        let allow = AllowEvents::new(u64::MAX);
        assert!(!allow.allowed(EventType::PullRequest, None));
        assert!(!allow.allowed(EventType::PullRequest, Some(EventAction::Closed)));
    }

    #[test]
    fn non_build_events_are_never_allowed() {
        let allow = AllowEvents::new(u64::MAX);
        assert!(!allow.allowed(EventType::Repository, Some(EventAction::Renamed)));
        assert!(!allow.allowed(EventType::Installation, Some(EventAction::Created)));
        assert!(!allow.allowed(EventType::Ping, None));
    }

    #[test]
    fn bits_compose() {
        let allow = AllowEvents::none()
            .with(AllowEvents::DELETE_TAG)
            .with(AllowEvents::SCHEDULE);
        assert!(allow.allowed(EventType::Delete, Some(EventAction::Tag)));
        assert!(!allow.allowed(EventType::Delete, Some(EventAction::Branch)));
        assert!(allow.allowed(EventType::Schedule, None));
        assert_eq!(allow.mask(), 2048 | 512);
    }

    #[test]
    fn action_parse_round_trips_known_values() {
        assert_eq!(EventAction::parse("renamed"), Some(EventAction::Renamed));
        assert_eq!(EventAction::parse("publicized"), None);
        assert_eq!(EventAction::Synchronize.to_string(), "synchronize");
    }
}
