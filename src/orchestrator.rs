//! Fetch orchestration for request handlers.
//!
//! # Overview
//!
//! [`FetchOrchestrator::fetch`] runs one user request end to end:
//!
//! 1. extract the locator from the submitted text
//! 2. admission phase one (in-progress flag, slots, daily quota)
//! 3. cache-first resolution
//! 4. selector resolution and admission phase two (size, slot)
//! 5. the download session
//! 6. on success, announce and comment through the publish ledger
//! 7. return the slot, debiting daily quota only on success
//!
//! Progress events are rendered into the user's status message by a
//! [`StatusReporter`] task, and the terminal result replaces that text once.
//! Publish failures are logged and reported alongside a successful fetch,
//! never as a fetch failure.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::admission::{Admission, AdmissionController, AdmissionError};
use crate::config::{ConfigError, Settings};
use crate::engine::TransferEngine;
use crate::ledger::PublishLedger;
use crate::locator::{ResourceId, extract_locator};
use crate::manifest::{FileSelector, ResourceManifest, SelectorError};
use crate::quota::{Clock, Identity};
use crate::registry::{TaskKey, TaskRegistry};
use crate::report::{PROGRESS_CHANNEL_CAPACITY, ProgressSender, StatusReporter, format_bytes};
use crate::resolution::{ResolutionError, Resolver};
use crate::session::{SessionEngine, SessionError};
use crate::store::Store;
use crate::transport::{ChatId, ChatTransport, MessageId};

/// Why a fetch did not deliver its selection.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One user fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub identity: Identity,
    /// Chat the request came from.
    pub chat: ChatId,
    /// Message to edit with progress, if the handler posted one.
    pub status_message: Option<MessageId>,
    /// Free text containing the locator.
    pub locator_text: String,
    pub selector: FileSelector,
}

/// Summary of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub resource_id: ResourceId,
    pub label: String,
    pub bytes: u64,
    /// Channel announcement, when publishing got that far.
    pub channel_message: Option<MessageId>,
    /// Publish failure text; the fetch itself still succeeded.
    pub publish_warning: Option<String>,
}

/// Composes admission, resolution, sessions and publishing.
pub struct FetchOrchestrator {
    admission: AdmissionController,
    registry: TaskRegistry,
    resolver: Resolver,
    sessions: SessionEngine,
    ledger: Arc<PublishLedger>,
    transport: Arc<dyn ChatTransport>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("admission", &self.admission)
            .field("resolver", &self.resolver)
            .field("sessions", &self.sessions)
            .field("tasks", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl FetchOrchestrator {
    /// Creates an orchestrator. `registry` must be the one `resolver` and
    /// `sessions` register their tasks in.
    #[must_use]
    pub fn new(
        admission: AdmissionController,
        registry: TaskRegistry,
        resolver: Resolver,
        sessions: SessionEngine,
        ledger: Arc<PublishLedger>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            admission,
            registry,
            resolver,
            sessions,
            ledger,
            transport,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires every component from loaded settings over one store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] when no publish channel is set.
    pub fn from_settings(
        settings: &Settings,
        store: &Store,
        engine: Arc<dyn TransferEngine>,
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let ledger_settings = settings.ledger_settings()?;
        let registry = TaskRegistry::new();
        let admission = AdmissionController::new(Arc::new(store.clone()), settings.tiers, clock);
        let resolver = Resolver::new(
            Arc::clone(&engine),
            Arc::new(store.clone()),
            registry.clone(),
        )
        .with_timeout(settings.resolve_timeout)
        .with_tick(settings.resolve_tick);
        let sessions = SessionEngine::new(engine, registry.clone())
            .with_poll_interval(settings.poll_interval)
            .with_deadline_policy(settings.deadline);
        let ledger = Arc::new(PublishLedger::new(
            Arc::new(store.clone()),
            Arc::clone(&transport),
            ledger_settings,
        ));
        Ok(Self::new(admission, registry, resolver, sessions, ledger, transport))
    }

    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionEngine {
        &self.sessions
    }

    #[must_use]
    pub fn ledger(&self) -> &PublishLedger {
        &self.ledger
    }

    /// Resolves the locator in `text` without fetching, for listing files.
    ///
    /// Holds the identity's in-progress flag while resolving.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Admission`] or [`FetchError::Resolution`].
    #[instrument(skip(self, text), fields(identity = %identity))]
    pub async fn preview(
        &self,
        identity: Identity,
        text: &str,
    ) -> Result<ResourceManifest, FetchError> {
        let locator = extract_locator(text).map_err(ResolutionError::from)?;
        // Listing files consumes no quota; only the in-progress flag applies.
        let _ticket = self.admission.enter_flag_only(identity)?;
        let manifest = self
            .resolver
            .resolve(&self.shutdown, &locator, identity, None)
            .await?;
        Ok(manifest)
    }

    /// Runs one fetch request to completion.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage, see [`FetchError`].
    #[instrument(skip(self, request), fields(identity = %request.identity, selector = %request.selector))]
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchReport, FetchError> {
        let (progress, reporter) = self.spawn_reporter(&request);

        let result = self.run_fetch(&request, progress.as_ref()).await;

        drop(progress);
        if let Some((reporter, task)) = reporter {
            if let Err(error) = task.await {
                warn!(error = %error, "status reporter task failed");
            }
            reporter.update(&terminal_text(&result)).await;
        }

        match &result {
            Ok(report) => info!(
                resource_id = %report.resource_id,
                bytes = report.bytes,
                published = report.publish_warning.is_none(),
                "fetch completed"
            ),
            Err(error) => info!(error = %error, "fetch ended without delivery"),
        }
        result
    }

    /// Cancels a registered resolution or fetch. False means nothing to cancel.
    #[instrument(skip(self))]
    pub fn cancel(&self, key: &TaskKey) -> bool {
        let cancelled = self.registry.cancel(key);
        if cancelled {
            info!(key = %key, "task cancelled");
        } else {
            info!(key = %key, "nothing to cancel");
        }
        cancelled
    }

    /// Cancels every running task.
    pub fn shutdown(&self) {
        info!(tasks = self.registry.len(), "shutting down");
        self.shutdown.cancel();
    }

    async fn run_fetch(
        &self,
        request: &FetchRequest,
        progress: Option<&ProgressSender>,
    ) -> Result<FetchReport, FetchError> {
        let locator = extract_locator(&request.locator_text).map_err(ResolutionError::from)?;
        let ticket = self.admission.enter(request.identity).await?;

        let manifest = self
            .resolver
            .resolve(&self.shutdown, &locator, request.identity, progress)
            .await?;
        let selection = request.selector.resolve(&manifest)?;
        let admission = ticket.admit(&selection).await?;

        let outcome = self
            .sessions
            .run_session(&self.shutdown, &manifest, request.selector, progress)
            .await;
        let selection = match outcome.into_result() {
            Ok(selection) => selection,
            Err(error) => {
                settle(admission, false).await;
                return Err(error.into());
            }
        };

        let (channel_message, publish_warning) = self.publish(&manifest, request.selector).await;
        settle(admission, true).await;

        Ok(FetchReport {
            resource_id: manifest.resource_id.clone(),
            label: selection.label,
            bytes: selection.total_bytes,
            channel_message,
            publish_warning,
        })
    }

    async fn publish(
        &self,
        manifest: &ResourceManifest,
        selector: FileSelector,
    ) -> (Option<MessageId>, Option<String>) {
        let message_id = match self.ledger.ensure_announced(manifest).await {
            Ok(message_id) => message_id,
            Err(error) => {
                warn!(error = %error, "announcement failed; retried on next fetch");
                return (None, Some(error.to_string()));
            }
        };
        match self
            .ledger
            .ensure_commented(manifest, selector, message_id)
            .await
        {
            Ok(_) => (Some(message_id), None),
            Err(error) => {
                warn!(error = %error, "comment failed; retried on next fetch");
                (Some(message_id), Some(error.to_string()))
            }
        }
    }

    fn spawn_reporter(
        &self,
        request: &FetchRequest,
    ) -> (Option<ProgressSender>, Option<(StatusReporter, JoinHandle<()>)>) {
        let Some(message) = request.status_message else {
            return (None, None);
        };
        let (sender, receiver) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let reporter = StatusReporter::new(Arc::clone(&self.transport), request.chat, message);
        let task = tokio::spawn(reporter.clone().run(receiver));
        (Some(sender), Some((reporter, task)))
    }
}

async fn settle(admission: Admission, succeeded: bool) {
    if let Err(error) = admission.finish(succeeded).await {
        warn!(error = %error, "failed to settle quota; slot returned in background");
    }
}

/// Final status text for a fetch.
#[must_use]
pub fn terminal_text(result: &Result<FetchReport, FetchError>) -> String {
    match result {
        Ok(report) => format!("Done: {} ({})", report.label, format_bytes(report.bytes)),
        Err(
            FetchError::Session(SessionError::Cancelled)
            | FetchError::Resolution(ResolutionError::Cancelled),
        ) => "Cancelled".to_string(),
        Err(error) => format!("Failed: {error}"),
    }
}
