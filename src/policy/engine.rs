//! Cache policy engine
//!
//! Decides for every event what the worker does:
//! - install: open the current generation and pre-populate every
//!   non-audio manifest entry, each independently and best-effort
//! - activate: delete every generation except the current one, claim pages
//! - fetch: same-origin only; audio goes network-first with a cache
//!   fallback, everything else cache-first with opportunistic persistence
//! - message: `CLEAR_CACHE` deletes the current generation and acknowledges

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::host::http::{Request, Response};
use crate::host::{Cache, DynNetwork, DynStorage, StorageError};
use crate::policy::classify::{is_audio, precache_set, should_persist};
use crate::worker::lifecycle::{
    ActivateEvent, ActivateReport, FetchEvent, FetchOutcome, InstallEvent, InstallReport,
    PrecacheResult, PrecacheStatus, ResponseSource, WorkerHandlers,
};
use crate::worker::message::{ClearCacheReply, ControlMessage, MessageEvent};
use crate::worker::tasks::BackgroundTasks;

/// Only responses with exactly this status are persisted after a fetch
pub const CACHEABLE_STATUS: u16 = 200;

pub struct CachePolicy {
    config: Arc<WorkerConfig>,
    storage: DynStorage,
    network: DynNetwork,
    tasks: BackgroundTasks,
}

impl CachePolicy {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: DynStorage,
        network: DynNetwork,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            config,
            storage,
            network,
            tasks,
        }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    fn generation(&self) -> &str {
        &self.config.generation
    }

    /// Pre-populate the current generation from the manifest
    ///
    /// Never fails as a whole: a generation that cannot be opened or an entry
    /// that cannot be fetched or stored is logged and reported.
    pub async fn install(&self) -> InstallReport {
        let generation = self.generation().to_string();

        let cache = match self.storage.open(&generation).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(generation = %generation, error = %e, "could not open cache, skipping pre-population");
                None
            }
        };

        let precache = precache_set(&self.config.manifest);
        let attempts = precache.iter().map(|entry| {
            let cache = cache.clone();
            async move {
                let status = match cache {
                    Some(cache) => match self.add(cache.as_ref(), entry).await {
                        Ok(()) => PrecacheStatus::Cached,
                        Err(e) => {
                            warn!(url = %entry, error = %e, "pre-population failed");
                            PrecacheStatus::Failed(e.to_string())
                        }
                    },
                    None => PrecacheStatus::Failed("cache unavailable".to_string()),
                };
                PrecacheResult {
                    url: entry.clone(),
                    status,
                }
            }
        });
        let mut entries = join_all(attempts).await;
        entries.extend(
            self.config
                .manifest
                .iter()
                .filter(|entry| !precache.contains(entry))
                .map(|entry| PrecacheResult {
                    url: entry.clone(),
                    status: PrecacheStatus::SkippedAudio,
                }),
        );

        let cached = entries
            .iter()
            .filter(|r| r.status == PrecacheStatus::Cached)
            .count();
        info!(generation = %generation, cached, total = entries.len(), "pre-population finished");

        InstallReport {
            generation,
            opened: cache.is_some(),
            entries,
        }
    }

    /// Fetch a manifest entry and store it; a non-2xx status is a failure
    async fn add(&self, cache: &dyn Cache, entry: &str) -> Result<(), StorageError> {
        let url = self
            .config
            .resolve(entry)
            .map_err(|e| StorageError::AddFailed {
                url: entry.to_string(),
                reason: e.to_string(),
            })?;
        let request = Request::get(url);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| StorageError::AddFailed {
                url: entry.to_string(),
                reason: e.to_string(),
            })?;
        if !response.ok() {
            return Err(StorageError::AddFailed {
                url: entry.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        cache.put(&request, response).await
    }

    /// Delete every generation other than the current one
    pub async fn activate(&self) -> ActivateReport {
        let generation = self.generation().to_string();
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "could not list cache generations");
                Vec::new()
            }
        };

        let mut deleted = Vec::new();
        for name in names.into_iter().filter(|n| *n != generation) {
            match self.storage.delete(&name).await {
                Ok(_) => {
                    info!(generation = %name, "deleted old cache generation");
                    deleted.push(name);
                }
                Err(e) => warn!(generation = %name, error = %e, "could not delete old generation"),
            }
        }

        ActivateReport {
            generation,
            deleted,
            claimed: 0,
        }
    }

    /// Route one intercepted request
    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        if request.url.origin() != self.config.origin.origin() {
            debug!(url = %request.url, "cross-origin request, not intercepting");
            return FetchOutcome::Passthrough;
        }

        if is_audio(request.path()) {
            self.fetch_audio(request).await
        } else {
            self.fetch_cache_first(request).await
        }
    }

    /// Network first; a cached copy only stands in when the network fails
    async fn fetch_audio(&self, request: Request) -> FetchOutcome {
        match self.network.fetch(&request).await {
            Ok(response) => FetchOutcome::Respond {
                response,
                source: ResponseSource::Network,
            },
            Err(e) => match self.lookup(&request).await {
                Some(response) => {
                    debug!(url = %request.url, error = %e, "network failed, serving cached audio");
                    FetchOutcome::Respond {
                        response,
                        source: ResponseSource::StaleCache,
                    }
                }
                None => FetchOutcome::Failed(e),
            },
        }
    }

    async fn fetch_cache_first(&self, request: Request) -> FetchOutcome {
        if let Some(response) = self.lookup(&request).await {
            debug!(url = %request.url, "cache hit");
            return FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
            };
        }

        let response = match self.network.fetch(&request).await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::Failed(e),
        };

        if response.status == CACHEABLE_STATUS && should_persist(request.path()) {
            self.persist(request, response.clone());
        }

        FetchOutcome::Respond {
            response,
            source: ResponseSource::Network,
        }
    }

    /// Look a request up in the current generation without creating it
    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.try_lookup(request).await {
            Ok(found) => found,
            Err(e) => {
                warn!(url = %request.url, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn try_lookup(&self, request: &Request) -> Result<Option<Response>, StorageError> {
        let generation = self.generation();
        if !self.storage.has(generation).await? {
            return Ok(None);
        }
        self.storage.open(generation).await?.lookup(request).await
    }

    /// Write a response copy in the background; the caller never waits on it
    fn persist(&self, request: Request, response: Response) {
        let storage = self.storage.clone();
        let generation = self.generation().to_string();
        let label = format!("persist {}", request.url);
        self.tasks.spawn(label, async move {
            let cache = storage.open(&generation).await?;
            cache.put(&request, response).await
        });
    }

    /// Handle a control message
    pub async fn message(&self, event: MessageEvent) {
        let Some(ControlMessage::ClearCache) = ControlMessage::parse(&event.data) else {
            return;
        };

        let generation = self.generation();
        match self.storage.delete(generation).await {
            Ok(existed) => {
                info!(generation = %generation, existed, "cache cleared");
                if let Some(reply) = event.reply {
                    reply.post(&ClearCacheReply { success: true });
                }
            }
            Err(e) => warn!(generation = %generation, error = %e, "cache clear failed"),
        }
    }
}

#[async_trait]
impl WorkerHandlers for CachePolicy {
    async fn on_install(&self, event: &mut InstallEvent) -> InstallReport {
        let report = self.install().await;
        event.skip_waiting();
        report
    }

    async fn on_activate(&self, event: &mut ActivateEvent) -> ActivateReport {
        let report = self.activate().await;
        event.claim_clients();
        report
    }

    async fn on_fetch(&self, event: FetchEvent) -> FetchOutcome {
        if let Some(client) = &event.client_id {
            debug!(url = %event.request.url, client = %client, "fetch from client page");
        }
        self.fetch(event.request).await
    }

    async fn on_message(&self, event: MessageEvent) {
        self.message(event).await;
    }
}
