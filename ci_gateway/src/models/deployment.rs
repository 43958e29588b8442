//! ci.deployment: A provider deployment and the builds run for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    /// Provider-assigned deployment number.
    pub number: i64,
    pub repo_id: i64,
    pub url: String,
    pub commit: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub task: String,
    pub target: String,
    pub description: String,
    pub payload: Option<serde_json::Value>,
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Build ids in delivery order. Append-only.
    pub builds: Vec<i64>,
}
