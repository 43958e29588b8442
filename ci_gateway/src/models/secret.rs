//! ci.secret: Repository-scoped secrets that follow renames.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: i64,
    pub org: String,
    pub repo: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub value: String,
}

impl Secret {
    pub fn new(org: &str, repo: &str, name: &str, value: &str) -> Self {
        Self {
            id: 0,
            org: org.to_string(),
            repo: repo.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
