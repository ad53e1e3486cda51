//! Publish deduplication ledger.
//!
//! # Overview
//!
//! Fetched content is published to one shared channel:
//! - each resource is announced exactly once ([`PublishLedger::ensure_announced`])
//! - each `(resource, selector)` gets its file replies exactly once
//!   ([`PublishLedger::ensure_commented`])
//!
//! Both markers live in the store and are never cleared by normal operation.
//!
//! # Announcement claims
//!
//! Concurrent first announcements are ordered by the store's unique key on
//! the resource id. The caller whose claim insert succeeds transmits; every
//! other caller polls the row until the winner records the message id, then
//! returns the same id. A winner whose transmission fails deletes its claim
//! so the next fetch retries. A claim left empty for longer than the
//! stale-claim threshold belongs to a crashed process and may be taken over.
//!
//! # Comments
//!
//! File replies are posted first, then the flag is recorded, and only then
//! are the local copies deleted. A crash in between can leave an orphaned
//! local file but never causes a second post.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::locator::ResourceId;
use crate::manifest::{FileSelector, ResourceManifest, SelectorError, UnsafePath};
use crate::report::format_bytes;
use crate::store::{PublishStore, StoreError};
use crate::transport::{ChatId, ChatTransport, MessageId, ReplyContent, TransportError};

/// Maximum lines per file-listing reply.
pub const LISTING_CHUNK_LINES: usize = 48;

/// Default pause between consecutive replies.
pub const DEFAULT_REPLY_PACING: Duration = Duration::from_secs(2);

/// Default time a caller waits for another caller's announcement.
pub const DEFAULT_CLAIM_WAIT: Duration = Duration::from_secs(30);

/// Default age after which an empty claim is considered abandoned.
pub const DEFAULT_STALE_CLAIM: Duration = Duration::from_secs(10 * 60);

const CLAIM_POLL: Duration = Duration::from_millis(250);

/// Failures while publishing. Never fatal to the fetch that triggered them.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// Reading or writing a ledger record failed.
    #[error("publish ledger store failed: {0}")]
    StoreWriteFailed(#[from] StoreError),

    /// The transport refused a post.
    #[error("publishing failed: {0}")]
    TransportFailed(#[from] TransportError),

    /// A file to publish is not on disk.
    #[error("local file missing: {}", path.display())]
    MissingLocalFile { path: PathBuf },

    /// The selector does not fit the manifest.
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    /// A manifest name points outside the download root; nothing is posted or deleted.
    #[error("refusing to publish: {0}")]
    UnsafePath(#[from] UnsafePath),

    /// Another caller holds the announcement claim and did not finish in time.
    #[error("announcement of {resource_id} is still pending after {} seconds", waited.as_secs())]
    ClaimPending {
        resource_id: ResourceId,
        waited: Duration,
    },
}

/// Result of [`PublishLedger::ensure_commented`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOutcome {
    /// The flag was already set; nothing was posted.
    AlreadyCommented,
    /// This call posted `files` replies and set the flag.
    Posted { files: usize },
}

/// Tunables for [`PublishLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Shared channel that receives announcements.
    pub channel: ChatId,
    /// Directory the transfer engine writes into.
    pub download_root: PathBuf,
    /// Pause between consecutive replies.
    pub reply_pacing: Duration,
    /// How long to wait for another caller's announcement.
    pub claim_wait: Duration,
    /// Age after which an empty claim may be taken over.
    pub stale_claim: Duration,
}

impl LedgerSettings {
    #[must_use]
    pub fn new(channel: ChatId, download_root: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            download_root: download_root.into(),
            reply_pacing: DEFAULT_REPLY_PACING,
            claim_wait: DEFAULT_CLAIM_WAIT,
            stale_claim: DEFAULT_STALE_CLAIM,
        }
    }
}

/// Announcement text: `#<resource id>` then the resource name.
#[must_use]
pub fn announcement_text(manifest: &ResourceManifest) -> String {
    format!("#{}\n{}", manifest.resource_id, manifest.display_name)
}

/// File listing split into reply-sized chunks of `n. path (size)` lines.
#[must_use]
pub fn listing_chunks(manifest: &ResourceManifest) -> Vec<String> {
    let lines: Vec<String> = manifest
        .files
        .iter()
        .map(|f| format!("{}. {} ({})", f.index + 1, f.path, format_bytes(f.bytes)))
        .collect();
    lines
        .chunks(LISTING_CHUNK_LINES)
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// Removes directories under `resource_path` (itself included) that the
/// deleted files leave empty, deepest first.
async fn prune_empty_dirs<'a>(resource_path: &Path, deleted: impl Iterator<Item = &'a Path>) {
    let mut dirs: Vec<&Path> = deleted
        .flat_map(move |path| {
            path.ancestors()
                .skip(1)
                .take_while(move |dir| dir.starts_with(resource_path))
        })
        .collect();
    dirs.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    dirs.dedup();

    for dir in dirs {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => debug!(path = %dir.display(), "removed emptied directory"),
            // Other selections of the resource are still on disk.
            Err(error) if error.kind() == std::io::ErrorKind::DirectoryNotEmpty => {}
            Err(error) => {
                debug!(path = %dir.display(), error = %error, "failed to remove directory");
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Idempotent announce/comment publisher.
pub struct PublishLedger {
    store: Arc<dyn PublishStore>,
    transport: Arc<dyn ChatTransport>,
    settings: LedgerSettings,
    comment_locks: DashMap<(ResourceId, FileSelector), Arc<Mutex<()>>>,
}

impl std::fmt::Debug for PublishLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishLedger")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PublishLedger {
    #[must_use]
    pub fn new(
        store: Arc<dyn PublishStore>,
        transport: Arc<dyn ChatTransport>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
            comment_locks: DashMap::new(),
        }
    }

    /// Ledger tunables.
    #[must_use]
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Returns the channel message announcing `manifest`, publishing it first
    /// if this resource was never announced.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::TransportFailed`] if this caller won the claim
    /// and could not transmit, [`PublishError::ClaimPending`] if another
    /// caller's claim did not complete within the claim wait, or
    /// [`PublishError::StoreWriteFailed`].
    #[instrument(skip(self, manifest), fields(resource_id = %manifest.resource_id))]
    pub async fn ensure_announced(
        &self,
        manifest: &ResourceManifest,
    ) -> Result<MessageId, PublishError> {
        let resource_id = &manifest.resource_id;
        let waiting_since = Instant::now();

        loop {
            match self.store.announcement(resource_id).await? {
                Some(record) => {
                    if let Some(message_id) = record.message_id {
                        debug!(message_id = %message_id, "already announced");
                        return Ok(message_id);
                    }

                    let now = now_ms();
                    let stale_before = now.saturating_sub(duration_ms(self.settings.stale_claim));
                    if self
                        .store
                        .take_over_stale_claim(resource_id, stale_before, now)
                        .await?
                    {
                        warn!("taking over abandoned announcement claim");
                        return self.publish_announcement(manifest, now).await;
                    }

                    let waited = waiting_since.elapsed();
                    if waited >= self.settings.claim_wait {
                        return Err(PublishError::ClaimPending {
                            resource_id: resource_id.clone(),
                            waited,
                        });
                    }
                    tokio::time::sleep(CLAIM_POLL).await;
                }
                None => {
                    let claimed_at = now_ms();
                    if self
                        .store
                        .try_claim_announcement(resource_id, claimed_at)
                        .await?
                    {
                        return self.publish_announcement(manifest, claimed_at).await;
                    }
                }
            }
        }
    }

    /// Transmits the announcement for a claim this caller stamped `claimed_at`.
    async fn publish_announcement(
        &self,
        manifest: &ResourceManifest,
        claimed_at: i64,
    ) -> Result<MessageId, PublishError> {
        let resource_id = &manifest.resource_id;
        let message_id = match self
            .transport
            .send_message(self.settings.channel, &announcement_text(manifest))
            .await
        {
            Ok(message_id) => message_id,
            Err(error) => {
                match self.store.release_claim(resource_id, claimed_at).await {
                    Ok(true) => {}
                    Ok(false) => debug!("claim was taken over before it could be released"),
                    Err(release_error) => {
                        warn!(error = %release_error, "failed to release announcement claim");
                    }
                }
                return Err(error.into());
            }
        };

        if let Err(error) = self
            .store
            .complete_announcement(resource_id, claimed_at, message_id)
            .await
        {
            warn!(message_id = %message_id, error = %error, "announcement sent but not recorded");
            return Err(error.into());
        }
        info!(message_id = %message_id, "resource announced");

        for (n, chunk) in listing_chunks(manifest).into_iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.settings.reply_pacing).await;
            }
            if let Err(error) = self
                .transport
                .send_reply(self.settings.channel, message_id, ReplyContent::Text(chunk))
                .await
            {
                warn!(chunk = n, error = %error, "file listing reply failed");
                break;
            }
        }

        Ok(message_id)
    }

    /// Posts the selected files under `message_id` once per `(resource, selector)`.
    ///
    /// After the flag is recorded, the published local copies are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidSelector`],
    /// [`PublishError::UnsafePath`] or [`PublishError::MissingLocalFile`]
    /// (nothing posted),
    /// [`PublishError::TransportFailed`] (flag not recorded) or
    /// [`PublishError::StoreWriteFailed`].
    #[instrument(skip(self, manifest), fields(resource_id = %manifest.resource_id, selector = %selector, message_id = %message_id))]
    pub async fn ensure_commented(
        &self,
        manifest: &ResourceManifest,
        selector: FileSelector,
        message_id: MessageId,
    ) -> Result<CommentOutcome, PublishError> {
        let key = (manifest.resource_id.clone(), selector);
        let lock = Arc::clone(self.comment_locks.entry(key.clone()).or_default().value());
        let outcome = {
            let _guard = lock.lock().await;
            self.comment_locked(manifest, selector, message_id).await
        };
        drop(lock);
        self.comment_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn comment_locked(
        &self,
        manifest: &ResourceManifest,
        selector: FileSelector,
        message_id: MessageId,
    ) -> Result<CommentOutcome, PublishError> {
        let resource_id = &manifest.resource_id;
        if self.store.is_commented(resource_id, selector).await? {
            debug!("already commented");
            return Ok(CommentOutcome::AlreadyCommented);
        }

        let selection = selector.resolve(manifest)?;
        let resource_path = manifest.resource_path(&self.settings.download_root)?;
        let targets = selection
            .indices
            .iter()
            .filter_map(|&i| manifest.file(i))
            .map(|file| Ok((file, manifest.local_path(&self.settings.download_root, file)?)))
            .collect::<Result<Vec<_>, UnsafePath>>()?;
        for (_, path) in &targets {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(PublishError::MissingLocalFile { path: path.clone() });
            }
        }

        for (n, (file, path)) in targets.iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.settings.reply_pacing).await;
            }
            self.transport
                .send_reply(
                    self.settings.channel,
                    message_id,
                    ReplyContent::File {
                        path: path.clone(),
                        caption: Some(file.path.clone()),
                    },
                )
                .await?;
        }

        self.store.mark_commented(resource_id, selector).await?;
        info!(files = targets.len(), "selection published");

        for (_, path) in &targets {
            if let Err(error) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %error, "failed to delete published file");
            }
        }
        let deleted = targets.iter().map(|(_, path)| path.as_path());
        prune_empty_dirs(&resource_path, deleted).await;

        Ok(CommentOutcome::Posted {
            files: targets.len(),
        })
    }

    /// Wipes every announcement and comment record.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::StoreWriteFailed`] if the store fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64, PublishError> {
        let removed = self.store.clear_ledger().await?;
        info!(removed, "publish ledger cleared");
        Ok(removed)
    }
}
