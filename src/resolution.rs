//! Cache-first resolution of a locator to a [`ResourceManifest`].
//!
//! # Overview
//!
//! 1. The locator's canonical [`ResourceId`](crate::locator::ResourceId) is
//!    looked up in the manifest store; a hit returns without engine work.
//! 2. On a miss the task registers a cancellation handle under
//!    [`TaskKey::Resolution`] and races the engine's resolve against the
//!    timeout and explicit cancellation. A progress tick reports elapsed
//!    time while it waits.
//! 3. A resolved manifest is persisted (insert-once) before being returned.
//!    If another task persisted it first, the stored copy wins.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{EngineError, HandleGuard, TransferEngine};
use crate::locator::{Locator, LocatorError};
use crate::manifest::ResourceManifest;
use crate::quota::Identity;
use crate::registry::{TaskKey, TaskRegistry};
use crate::report::{Progress, ProgressSender, notify};
use crate::store::{ManifestStore, StoreError};

/// Default bound on a single resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default interval between elapsed-time progress events.
pub const DEFAULT_RESOLVE_TICK: Duration = Duration::from_secs(1);

/// Reasons a resolution ends without a manifest.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// The submitted text did not hold a usable locator.
    #[error(transparent)]
    InvalidLocator(#[from] LocatorError),

    /// The engine did not produce metadata in time.
    #[error(
        "metadata resolution timed out after {} seconds\n  Suggestion: The link may have no reachable peers; try again later",
        timeout.as_secs()
    )]
    TimedOut { timeout: Duration },

    /// The task was cancelled.
    #[error("metadata resolution was cancelled")]
    Cancelled,

    /// The engine failed.
    #[error("metadata resolution failed: {0}")]
    EngineFailure(#[from] EngineError),

    /// Reading or persisting the manifest failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves locators, consulting the manifest cache first.
#[derive(Clone)]
pub struct Resolver {
    engine: Arc<dyn TransferEngine>,
    manifests: Arc<dyn ManifestStore>,
    registry: TaskRegistry,
    timeout: Duration,
    tick: Duration,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("timeout", &self.timeout)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    #[must_use]
    pub fn new(
        engine: Arc<dyn TransferEngine>,
        manifests: Arc<dyn ManifestStore>,
        registry: TaskRegistry,
    ) -> Self {
        Self {
            engine,
            manifests,
            registry,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
            tick: DEFAULT_RESOLVE_TICK,
        }
    }

    /// Overrides the resolution timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the progress tick interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured progress tick interval.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Resolves `locator` to a manifest.
    ///
    /// Cancelling `parent` (or cancelling the registered
    /// [`TaskKey::Resolution`] key) ends the task with
    /// [`ResolutionError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::TimedOut`], [`ResolutionError::Cancelled`],
    /// [`ResolutionError::EngineFailure`] or [`ResolutionError::Store`].
    #[instrument(skip(self, parent, locator, progress), fields(resource_id = %locator.resource_id(), requester = %requester))]
    pub async fn resolve(
        &self,
        parent: &CancellationToken,
        locator: &Locator,
        requester: Identity,
        progress: Option<&ProgressSender>,
    ) -> Result<ResourceManifest, ResolutionError> {
        let resource_id = locator.resource_id();
        if let Some(manifest) = self.manifests.get_manifest(resource_id).await? {
            debug!("manifest cache hit");
            return Ok(manifest);
        }

        let token = parent.child_token();
        let _registration = self.registry.register(
            TaskKey::Resolution {
                resource_id: resource_id.clone(),
                requester,
            },
            token.clone(),
        );

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut ticker = tokio::time::interval_at(started + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let resolving = self.engine.resolve(locator, token.clone());
        tokio::pin!(resolving);

        let handle = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    info!("resolution cancelled");
                    return Err(ResolutionError::Cancelled);
                }
                () = tokio::time::sleep_until(deadline) => {
                    token.cancel();
                    warn!(timeout_secs = self.timeout.as_secs(), "resolution timed out");
                    return Err(ResolutionError::TimedOut { timeout: self.timeout });
                }
                result = &mut resolving => break HandleGuard::new(result?),
                _ = ticker.tick() => {
                    notify(progress, Progress::Resolving { elapsed: started.elapsed() });
                }
            }
        };

        let metadata = handle.metadata();
        drop(handle);
        let manifest = ResourceManifest::from_resolved(locator, metadata);

        if self.manifests.insert_manifest(&manifest).await? {
            info!(
                files = manifest.len(),
                total_bytes = manifest.total_bytes,
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "manifest resolved"
            );
            return Ok(manifest);
        }

        debug!("manifest persisted concurrently; using stored copy");
        Ok(self
            .manifests
            .get_manifest(resource_id)
            .await?
            .unwrap_or(manifest))
    }
}
