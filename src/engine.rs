//! Transfer engine seam.
//!
//! The peer-to-peer engine that resolves metadata and moves bytes lives
//! outside this crate. Orchestration only needs a handful of point-in-time
//! operations, captured by [`TransferEngine`] and [`TransferHandle`].
//!
//! Handles own engine-side resources and must be released exactly once;
//! [`HandleGuard`] does that on drop so every exit path is covered.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::locator::Locator;
use crate::manifest::ResourceManifest;

/// Errors reported by the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine refused the locator.
    #[error("engine rejected locator: {0}")]
    Rejected(String),

    /// A per-file operation referenced an index the engine does not know.
    #[error("engine has no file at index {0}")]
    UnknownFile(usize),

    /// The engine gave up on an in-flight operation.
    #[error("engine operation aborted: {0}")]
    Aborted(String),

    /// Anything else the engine surfaces.
    #[error("engine failure: {0}")]
    Other(String),
}

/// One file as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Path relative to the resource root, `/`-separated.
    pub path: String,
    /// Length in bytes.
    pub bytes: u64,
}

/// Metadata the engine reports once a locator resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    /// Resource name.
    pub name: String,
    /// Total length in bytes.
    pub total_bytes: u64,
    /// File list; empty for a single-file resource.
    pub files: Vec<ResolvedFile>,
}

/// Download priority for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePriority {
    Active,
    Inactive,
}

/// What a completion counter is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteScope {
    File(usize),
    Total,
}

/// A live engine-side resource.
#[async_trait]
pub trait TransferHandle: Send + Sync {
    /// Metadata of the attached resource.
    fn metadata(&self) -> ResolvedMetadata;

    /// Marks one file for (or excludes it from) transfer.
    async fn set_file_priority(
        &self,
        index: usize,
        priority: FilePriority,
    ) -> Result<(), EngineError>;

    /// Starts moving bytes for every active file.
    async fn start_transfer(&self) -> Result<(), EngineError>;

    /// Point-in-time completed byte count.
    async fn bytes_completed(&self, scope: ByteScope) -> Result<u64, EngineError>;

    /// Frees engine-side resources. Called once.
    fn release(&self);
}

/// Entry point into the transfer engine.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Resolves a locator to its metadata.
    ///
    /// The engine should abandon work once `cancel` fires; the caller also
    /// drops the returned future on cancellation or timeout.
    async fn resolve(
        &self,
        locator: &Locator,
        cancel: CancellationToken,
    ) -> Result<Box<dyn TransferHandle>, EngineError>;

    /// Re-attaches to an already resolved resource for transfer.
    async fn attach(&self, manifest: &ResourceManifest)
    -> Result<Box<dyn TransferHandle>, EngineError>;
}

/// Releases the wrapped handle when dropped.
pub struct HandleGuard {
    handle: Box<dyn TransferHandle>,
}

impl HandleGuard {
    #[must_use]
    pub fn new(handle: Box<dyn TransferHandle>) -> Self {
        Self { handle }
    }
}

impl std::ops::Deref for HandleGuard {
    type Target = dyn TransferHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        debug!("releasing transfer handle");
        self.handle.release();
    }
}

impl std::fmt::Debug for HandleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleGuard").finish_non_exhaustive()
    }
}
