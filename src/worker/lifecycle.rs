//! Worker lifecycle
//!
//! One `WorkerLifecycle` is built per worker instance. It owns the handler
//! implementation and drives it through
//! `installing -> waiting -> activating -> active`, delivering fetch and
//! message events once the worker is in charge.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::host::http::{Request, Response};
use crate::host::NetworkError;
use crate::worker::clients::Clients;
use crate::worker::message::MessageEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Waiting,
    Activating,
    Active,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: WorkerState,
    },
}

/// Install signal
#[derive(Debug, Default)]
pub struct InstallEvent {
    skip_waiting: bool,
}

impl InstallEvent {
    /// Become active as soon as install finishes instead of waiting for
    /// existing pages to close
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    pub fn skips_waiting(&self) -> bool {
        self.skip_waiting
    }
}

/// Activate signal
#[derive(Debug, Default)]
pub struct ActivateEvent {
    claim: bool,
}

impl ActivateEvent {
    /// Take control of already-open pages once activation finishes
    pub fn claim_clients(&mut self) {
        self.claim = true;
    }

    pub fn claims_clients(&self) -> bool {
        self.claim
    }
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Page that issued the request, when known
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn with_client(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }
}

/// Where a response handed to the caller came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Cached copy substituted for a failed network request
    StaleCache,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::StaleCache => "stale-cache",
        }
    }
}

/// Result of handling a fetch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host applies its default handling
    Passthrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// The network failure is surfaced to the caller
    Failed(NetworkError),
}

/// Outcome of pre-populating one manifest entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecacheStatus {
    Cached,
    SkippedAudio,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheResult {
    pub url: String,
    pub status: PrecacheStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    /// Whether the generation could be opened at all
    pub opened: bool,
    pub entries: Vec<PrecacheResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub generation: String,
    pub deleted: Vec<String>,
    /// Pages newly controlled by this worker
    pub claimed: usize,
}

/// Handler slots for each event the host delivers
#[async_trait]
pub trait WorkerHandlers: Send + Sync {
    async fn on_install(&self, event: &mut InstallEvent) -> InstallReport;

    async fn on_activate(&self, event: &mut ActivateEvent) -> ActivateReport;

    async fn on_fetch(&self, event: FetchEvent) -> FetchOutcome;

    async fn on_message(&self, event: MessageEvent);
}

/// What `install` went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub install: InstallReport,
    /// Present when install skipped waiting and activation ran immediately
    pub activate: Option<ActivateReport>,
    pub state: WorkerState,
}

pub struct WorkerLifecycle<H> {
    handlers: Arc<H>,
    version: String,
    clients: Clients,
    state: Mutex<WorkerState>,
}

impl<H: WorkerHandlers> WorkerLifecycle<H> {
    /// A fresh worker instance for `version`, about to install
    pub fn new(handlers: Arc<H>, version: impl Into<String>, clients: Clients) -> Self {
        Self {
            handlers,
            version: version.into(),
            clients,
            state: Mutex::new(WorkerState::Installing),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        debug!(version = %self.version, %from, to = %next, "worker state change");
        *state = next;
    }

    fn expect_state(&self, action: &'static str, expected: WorkerState) -> Result<(), LifecycleError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition { action, state })
        }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Run the install handler; activation follows at once if it asked to
    /// skip waiting
    pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
        self.expect_state("install", WorkerState::Installing)?;
        info!(version = %self.version, "installing worker");

        let mut event = InstallEvent::default();
        let install = self.handlers.on_install(&mut event).await;

        if !event.skips_waiting() {
            self.set_state(WorkerState::Waiting);
            info!(version = %self.version, "worker installed, waiting for pages to close");
            return Ok(InstallOutcome {
                install,
                activate: None,
                state: WorkerState::Waiting,
            });
        }

        self.set_state(WorkerState::Waiting);
        let activate = self.run_activate().await;
        Ok(InstallOutcome {
            install,
            activate: Some(activate),
            state: self.state(),
        })
    }

    /// Move a waiting worker on to activation
    pub async fn activate(&self) -> Result<ActivateReport, LifecycleError> {
        self.expect_state("activate", WorkerState::Waiting)?;
        Ok(self.run_activate().await)
    }

    async fn run_activate(&self) -> ActivateReport {
        self.set_state(WorkerState::Activating);
        let mut event = ActivateEvent::default();
        let mut report = self.handlers.on_activate(&mut event).await;
        if event.claims_clients() {
            report.claimed = self.clients.claim(&self.version);
        }
        self.set_state(WorkerState::Active);
        info!(
            version = %self.version,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "worker active"
        );
        report
    }

    /// Restart an instance that was already activated in an earlier run
    pub fn resume(&self) -> Result<(), LifecycleError> {
        self.expect_state("resume", WorkerState::Installing)?;
        self.set_state(WorkerState::Active);
        Ok(())
    }

    /// Restart an instance installed in an earlier run that never activated
    pub fn resume_waiting(&self) -> Result<(), LifecycleError> {
        self.expect_state("resume", WorkerState::Installing)?;
        self.set_state(WorkerState::Waiting);
        Ok(())
    }

    /// Deliver a fetch; only an active worker intercepts requests
    pub async fn dispatch_fetch(&self, event: FetchEvent) -> FetchOutcome {
        let state = self.state();
        if state != WorkerState::Active {
            debug!(url = %event.request.url, %state, "worker not active, not intercepting");
            return FetchOutcome::Passthrough;
        }
        self.handlers.on_fetch(event).await
    }

    pub async fn dispatch_message(&self, event: MessageEvent) {
        self.handlers.on_message(event).await;
    }
}
