//! Download session engine.
//!
//! # Overview
//!
//! A session drives one selection of one resource to a terminal
//! [`SessionOutcome`]:
//!
//! 1. Resolve the selector (fails fast, before any engine call).
//! 2. Register a [`TaskKey::Fetch`] cancellation handle.
//! 3. Attach to the engine, mark the selected files active and all others
//!    inactive, start the transfer.
//! 4. Poll completed bytes at a fixed interval until they reach the
//!    selection's total, racing cancellation and a size-proportional
//!    deadline ([`DeadlinePolicy`]).
//!
//! Cancellation and timeout are separate branches of one `select!`, so a
//! session ends in exactly one of them. The engine handle is released and
//! the registry entry removed on every exit path.

mod deadline;

pub use deadline::{DEFAULT_FLOOR_BYTES_PER_SEC, DeadlinePolicy};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{ByteScope, EngineError, FilePriority, HandleGuard, TransferEngine};
use crate::manifest::{FileSelector, ResourceManifest, Selection, SelectorError};
use crate::registry::{TaskKey, TaskRegistry};
use crate::report::{Progress, ProgressSender, notify};

/// Default interval between completion polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Reasons a session does not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The selector does not fit the manifest.
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    /// The deadline passed before the selection completed.
    #[error(
        "download did not finish within {} minutes\n  Suggestion: The resource may have too few peers; try again later",
        deadline.as_secs() / 60
    )]
    TimedOut { deadline: Duration },

    /// The session was cancelled.
    #[error("download was cancelled")]
    Cancelled,

    /// The engine failed.
    #[error("download failed: {0}")]
    EngineFailure(#[from] EngineError),
}

/// Terminal result of one session. Exactly one is produced per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every selected byte is on disk.
    Succeeded {
        selection: Selection,
        elapsed: Duration,
    },
    /// Cancelled through the registry or the parent token.
    Cancelled,
    /// The size-based deadline expired.
    TimedOut { deadline: Duration },
    /// Precondition or engine failure.
    Failed(SessionError),
}

impl SessionOutcome {
    /// True for [`SessionOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Converts non-success outcomes into the matching [`SessionError`].
    ///
    /// # Errors
    ///
    /// Returns the error for every outcome but `Succeeded`.
    pub fn into_result(self) -> Result<Selection, SessionError> {
        match self {
            Self::Succeeded { selection, .. } => Ok(selection),
            Self::Cancelled => Err(SessionError::Cancelled),
            Self::TimedOut { deadline } => Err(SessionError::TimedOut { deadline }),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Why the wait loop stopped early.
enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Runs fetch sessions against the transfer engine.
#[derive(Clone)]
pub struct SessionEngine {
    engine: Arc<dyn TransferEngine>,
    registry: TaskRegistry,
    poll_interval: Duration,
    deadline: DeadlinePolicy,
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("poll_interval", &self.poll_interval)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl SessionEngine {
    #[must_use]
    pub fn new(engine: Arc<dyn TransferEngine>, registry: TaskRegistry) -> Self {
        Self {
            engine,
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DeadlinePolicy::default(),
        }
    }

    /// Overrides the completion poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Overrides the deadline policy.
    #[must_use]
    pub fn with_deadline_policy(mut self, deadline: DeadlinePolicy) -> Self {
        self.deadline = deadline;
        self
    }

    /// Configured deadline policy.
    #[must_use]
    pub fn deadline_policy(&self) -> DeadlinePolicy {
        self.deadline
    }

    /// Configured completion poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs one session to its terminal outcome.
    #[instrument(skip(self, parent, manifest, progress), fields(resource_id = %manifest.resource_id, selector = %selector))]
    pub async fn run_session(
        &self,
        parent: &CancellationToken,
        manifest: &ResourceManifest,
        selector: FileSelector,
        progress: Option<&ProgressSender>,
    ) -> SessionOutcome {
        let selection = match selector.resolve(manifest) {
            Ok(selection) => selection,
            Err(error) => {
                debug!(error = %error, "selector rejected");
                return SessionOutcome::Failed(error.into());
            }
        };

        let token = parent.child_token();
        let _registration = self.registry.register(
            TaskKey::Fetch {
                resource_id: manifest.resource_id.clone(),
                selector,
            },
            token.clone(),
        );

        let started = Instant::now();
        let budget = self.deadline.deadline_for(selection.total_bytes);
        let deadline = started + budget;
        debug!(
            bytes = selection.total_bytes,
            deadline_secs = budget.as_secs(),
            "session started"
        );

        let outcome = self
            .drive(&token, manifest, selection, started, deadline, progress)
            .await;

        match &outcome {
            SessionOutcome::Succeeded { elapsed, .. } => {
                info!(elapsed_secs = elapsed.as_secs(), "session succeeded");
            }
            SessionOutcome::Cancelled => info!("session cancelled"),
            SessionOutcome::TimedOut { .. } => {
                token.cancel();
                warn!(deadline_secs = budget.as_secs(), "session timed out");
            }
            SessionOutcome::Failed(error) => warn!(error = %error, "session failed"),
        }
        outcome
    }

    async fn drive(
        &self,
        token: &CancellationToken,
        manifest: &ResourceManifest,
        selection: Selection,
        started: Instant,
        deadline: Instant,
        progress: Option<&ProgressSender>,
    ) -> SessionOutcome {
        let attached = tokio::select! {
            biased;
            () = token.cancelled() => return SessionOutcome::Cancelled,
            () = tokio::time::sleep_until(deadline) => {
                return SessionOutcome::TimedOut { deadline: deadline - started };
            }
            attached = self.engine.attach(manifest) => attached,
        };
        let handle = match attached {
            Ok(handle) => HandleGuard::new(handle),
            Err(error) => return SessionOutcome::Failed(error.into()),
        };

        if let Err(error) = Self::start(&handle, manifest, &selection).await {
            return SessionOutcome::Failed(error.into());
        }

        loop {
            let completed = match Self::completed_bytes(&handle, manifest, &selection).await {
                Ok(completed) => completed,
                Err(error) => return SessionOutcome::Failed(error.into()),
            };
            notify(
                progress,
                Progress::Transferring {
                    label: selection.label.clone(),
                    completed: completed.min(selection.total_bytes),
                    total: selection.total_bytes,
                    elapsed: started.elapsed(),
                },
            );
            if completed >= selection.total_bytes {
                return SessionOutcome::Succeeded {
                    selection,
                    elapsed: started.elapsed(),
                };
            }

            if let Some(interrupt) = self.wait(token, deadline).await {
                return match interrupt {
                    Interrupt::Cancelled => SessionOutcome::Cancelled,
                    Interrupt::TimedOut => SessionOutcome::TimedOut {
                        deadline: deadline - started,
                    },
                };
            }
        }
    }

    async fn start(
        handle: &HandleGuard,
        manifest: &ResourceManifest,
        selection: &Selection,
    ) -> Result<(), EngineError> {
        for file in &manifest.files {
            let priority = if selection.contains(file.index) {
                FilePriority::Active
            } else {
                FilePriority::Inactive
            };
            handle.set_file_priority(file.index, priority).await?;
        }
        handle.start_transfer().await
    }

    async fn completed_bytes(
        handle: &HandleGuard,
        manifest: &ResourceManifest,
        selection: &Selection,
    ) -> Result<u64, EngineError> {
        if selection.indices.len() == manifest.len() {
            return handle.bytes_completed(ByteScope::Total).await;
        }
        let mut completed = 0u64;
        for &index in &selection.indices {
            let file_done = handle.bytes_completed(ByteScope::File(index)).await?;
            let file_len = manifest.file(index).map_or(0, |f| f.bytes);
            completed = completed.saturating_add(file_done.min(file_len));
        }
        Ok(completed)
    }

    async fn wait(&self, token: &CancellationToken, deadline: Instant) -> Option<Interrupt> {
        tokio::select! {
            biased;
            () = token.cancelled() => Some(Interrupt::Cancelled),
            () = tokio::time::sleep_until(deadline) => Some(Interrupt::TimedOut),
            () = tokio::time::sleep(self.poll_interval) => None,
        }
    }
}
