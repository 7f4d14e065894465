//! Open client pages and which worker controls them

use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: String,
    /// Generation of the worker controlling this page, if any
    pub controller: Option<String>,
}

/// Pages the host reports as open
#[derive(Debug, Clone, Default)]
pub struct Clients {
    inner: Arc<Mutex<Vec<Client>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Client>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an open page that no worker controls yet
    pub fn register(&self, id: impl Into<String>, url: impl Into<String>) {
        self.lock().push(Client {
            id: id.into(),
            url: url.into(),
            controller: None,
        });
    }

    /// Take control of every open page, returning how many changed controller
    pub fn claim(&self, generation: &str) -> usize {
        let mut clients = self.lock();
        let mut changed = 0;
        for client in clients.iter_mut() {
            if client.controller.as_deref() != Some(generation) {
                debug!(client = %client.id, url = %client.url, generation, "claimed page");
                client.controller = Some(generation.to_string());
                changed += 1;
            }
        }
        changed
    }

    pub fn controlled_count(&self, generation: &str) -> usize {
        self.lock()
            .iter()
            .filter(|c| c.controller.as_deref() == Some(generation))
            .count()
    }
}
