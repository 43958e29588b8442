//! ci.repo: An enrolled source repository and its build policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::events::AllowEvents;

/// Owner of an enrolled repository; the token is used for provider calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub token: String,
}

/// When builds from forks need a manual approval before execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovePolicy {
    #[serde(rename = "never")]
    Never,
    #[serde(rename = "once")]
    Once,
    #[default]
    #[serde(rename = "fork-always")]
    ForkAlways,
    #[serde(rename = "fork-no-write")]
    ForkNoWrite,
}

impl ApprovePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovePolicy::Never => "never",
            ApprovePolicy::Once => "once",
            ApprovePolicy::ForkAlways => "fork-always",
            ApprovePolicy::ForkNoWrite => "fork-no-write",
        }
    }
}

impl fmt::Display for ApprovePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(ApprovePolicy::Never),
            "once" => Ok(ApprovePolicy::Once),
            "fork-always" => Ok(ApprovePolicy::ForkAlways),
            "fork-no-write" => Ok(ApprovePolicy::ForkNoWrite),
            other => Err(format!("invalid approval policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: User,
    /// Shared secret used to verify webhooks for this repository.
    #[serde(skip_serializing, default)]
    pub hash: String,
    pub org: String,
    pub name: String,
    pub full_name: String,
    pub link: String,
    pub clone: String,
    pub branch: String,
    pub topics: Vec<String>,
    pub build_limit: i64,
    pub visibility: String,
    pub private: bool,
    pub active: bool,
    pub allow_events: AllowEvents,
    pub approve_build: ApprovePolicy,
    /// Former `org/name`, set while a rename is being applied.
    pub previous_name: Option<String>,
    pub install_id: Option<i64>,
    pub pipeline_config: Option<serde_json::Value>,
}

impl Repository {
    /// A new, active repository named `org/name` with default policy.
    pub fn new(org: &str, name: &str) -> Self {
        Self {
            id: 0,
            owner: User::default(),
            hash: String::new(),
            org: org.to_string(),
            name: name.to_string(),
            full_name: format!("{org}/{name}"),
            link: format!("https://github.com/{org}/{name}"),
            clone: format!("https://github.com/{org}/{name}.git"),
            branch: "main".to_string(),
            topics: Vec::new(),
            build_limit: 10,
            visibility: "public".to_string(),
            private: false,
            active: true,
            allow_events: AllowEvents::default(),
            approve_build: ApprovePolicy::default(),
            previous_name: None,
            install_id: None,
            pipeline_config: None,
        }
    }
}
