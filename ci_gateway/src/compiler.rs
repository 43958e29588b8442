//! Pipeline compiler seam. The default compiler reads the JSON pipeline
//! configuration stored on the repository.

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BuildDraft, Repository};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub command: String,
}

/// Which superseded builds a new build may cancel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCancel {
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub default_branch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPipeline {
    pub steps: Vec<Step>,
    pub timeout_secs: u64,
    pub auto_cancel: Option<AutoCancel>,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct CompileError {
    pub status: StatusCode,
    pub message: String,
}

impl CompileError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        draft: &BuildDraft,
        repo: &Repository,
    ) -> Result<CompiledPipeline, CompileError>;
}

const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Compiles `repo.pipeline_config`:
///
/// ```json
/// { "steps": [{ "name": "test", "command": "cargo test" }],
///   "timeout_secs": 900,
///   "auto_cancel": { "pending": true, "running": true } }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPipelineCompiler;

#[async_trait]
impl Compiler for JsonPipelineCompiler {
    async fn compile(
        &self,
        _draft: &BuildDraft,
        repo: &Repository,
    ) -> Result<CompiledPipeline, CompileError> {
        parse_pipeline(&repo.pipeline_config)
    }
}

fn parse_pipeline(config: &Option<serde_json::Value>) -> Result<CompiledPipeline, CompileError> {
    let config = match config {
        Some(v) => v,
        None => {
            return Ok(CompiledPipeline {
                steps: vec![Step {
                    name: "check".to_string(),
                    command: "echo 'No pipeline configured'".to_string(),
                }],
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                auto_cancel: None,
            });
        }
    };

    if !config.is_object() {
        return Err(CompileError::invalid("pipeline configuration must be an object"));
    }

    let steps = match config.get("steps") {
        None => Vec::new(),
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let name = step.get("name").and_then(|v| v.as_str());
                let command = step.get("command").and_then(|v| v.as_str());
                match (name, command) {
                    (Some(name), Some(command)) => Ok(Step {
                        name: name.to_string(),
                        command: command.to_string(),
                    }),
                    _ => Err(CompileError::invalid(format!(
                        "step {} is missing a name or command",
                        i + 1
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(CompileError::invalid("pipeline steps must be a list")),
    };

    let timeout_secs = config
        .get("timeout_secs")
        .and_then(|t| t.as_u64())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    let auto_cancel = match config.get("auto_cancel") {
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| CompileError::invalid(format!("invalid auto_cancel: {e}")))?,
        ),
        None => None,
    };

    Ok(CompiledPipeline {
        steps,
        timeout_secs,
        auto_cancel,
    })
}
