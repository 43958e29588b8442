//! Execution queue seam and the in-process queue used by default.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::compiler::CompiledPipeline;
use crate::models::{Build, Repository};

/// Work handed to the execution subsystem for one admitted build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub build: Build,
    pub repo: Repository,
    pub pipeline: CompiledPipeline,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue is full ({0} items)")]
    Full(usize),

    #[error("unable to cancel build {0}: {1}")]
    Cancel(i64, String),
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish(&self, item: QueueItem) -> Result<(), QueueError>;
}

/// Stops a build that is already executing.
#[async_trait]
pub trait BuildCanceller: Send + Sync {
    async fn cancel_running(&self, build: &Build) -> Result<(), QueueError>;
}

pub struct MemoryQueue {
    items: Mutex<VecDeque<QueueItem>>,
    capacity: usize,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Next item in publish order.
    pub async fn pop(&self) -> Option<QueueItem> {
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Build ids currently queued.
    pub async fn build_ids(&self) -> Vec<i64> {
        self.items.lock().await.iter().map(|i| i.build.id).collect()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, item: QueueItem) -> Result<(), QueueError> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return Err(QueueError::Full(items.len()));
        }
        items.push_back(item);
        Ok(())
    }
}

#[async_trait]
impl BuildCanceller for MemoryQueue {
    /// Drops the build from the queue if no worker has taken it yet.
    async fn cancel_running(&self, build: &Build) -> Result<(), QueueError> {
        self.items.lock().await.retain(|i| i.build.id != build.id);
        Ok(())
    }
}
