//! Fire-and-forget background work
//!
//! Work spawned here never reports back to the code that started it. A failure
//! is logged and dropped. Hosts that are about to exit call [`BackgroundTasks::drain`]
//! so writes already scheduled are not cut short.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` on the runtime; an `Err` is logged under `label`
    pub fn spawn<F, E>(&self, label: impl Into<String>, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let handle = tokio::spawn(async move {
            match work.await {
                Ok(()) => debug!(task = %label, "background task finished"),
                Err(e) => warn!(task = %label, error = %e, "background task failed"),
            }
        });

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks spawned and not yet finished
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for every task spawned so far, including ones spawned while waiting
    pub async fn drain(&self) {
        debug!(pending = self.pending(), "draining background tasks");
        loop {
            let batch: Vec<JoinHandle<()>> = {
                let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *handles)
            };
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task panicked");
                }
            }
        }
    }
}
