//! Work that outlives the request that started it.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::Instrument;

/// Tracks detached tasks so shutdown can wait for them.
///
/// Tasks are spawned on the runtime, not on the request future, so a client
/// disconnect never aborts them.
#[derive(Default)]
pub struct BackgroundWork {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, span: tracing::Span, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = tasks.try_join_next() {
            log_join(finished);
        }
        tasks.spawn(work.instrument(span));
    }

    /// Number of tasks not yet reaped.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every task spawned so far, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return;
            }
            while let Some(finished) = tasks.join_next().await {
                log_join(finished);
            }
        }
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Background task failed");
    }
}
