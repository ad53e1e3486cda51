//! Scripted fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use magnet_relay::engine::{
    ByteScope, EngineError, FilePriority, ResolvedFile, ResolvedMetadata, TransferEngine,
    TransferHandle,
};
use magnet_relay::manifest::FileEntry;
use magnet_relay::store::{ManifestStore, StoreError};
use magnet_relay::transport::ReplyContent;
use magnet_relay::{
    ChatId, ChatTransport, Database, Locator, MessageId, ResourceId, ResourceManifest, Store,
    TransportError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const HEX: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
pub const BASE32: &str = "YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK";

pub fn locator_text() -> String {
    format!("/magnet magnet:?xt=urn:btih:{HEX}&dn=bundle")
}

pub fn locator() -> Locator {
    Locator::parse(&format!("magnet:?xt=urn:btih:{HEX}&dn=bundle")).unwrap()
}

pub fn resource_id() -> ResourceId {
    ResourceId::parse(HEX).unwrap()
}

/// Container metadata named "bundle" with the given files.
pub fn container(files: &[(&str, u64)]) -> ResolvedMetadata {
    ResolvedMetadata {
        name: "bundle".to_string(),
        total_bytes: files.iter().map(|(_, b)| b).sum(),
        files: files
            .iter()
            .map(|(path, bytes)| ResolvedFile {
                path: (*path).to_string(),
                bytes: *bytes,
            })
            .collect(),
    }
}

pub fn manifest(files: &[(&str, u64)]) -> ResourceManifest {
    ResourceManifest::from_resolved(&locator(), container(files))
}

pub async fn memory_store() -> Store {
    Store::new(Database::new_in_memory().await.unwrap())
}

/// How [`FakeEngine::resolve`] behaves.
#[derive(Debug, Clone)]
pub enum ResolveMode {
    Immediate,
    Delay(Duration),
    Hang,
    Fail(EngineError),
}

#[derive(Debug, Default)]
pub struct EngineLog {
    pub resolve_calls: AtomicUsize,
    pub attach_calls: AtomicUsize,
    pub releases: AtomicUsize,
    pub started: AtomicBool,
    pub priorities: Mutex<Vec<(usize, FilePriority)>>,
    pub resolve_tokens: Mutex<Vec<CancellationToken>>,
}

impl EngineLog {
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn priorities(&self) -> Vec<(usize, FilePriority)> {
        self.priorities.lock().unwrap().clone()
    }
}

/// Transfer engine driven by a script.
///
/// Transfer progress is a function of time since `start_transfer`:
/// `percent_per_sec` percent of every active file per second, or no
/// progress at all when `None`.
pub struct FakeEngine {
    metadata: ResolvedMetadata,
    mode: Mutex<ResolveMode>,
    percent_per_sec: Option<u64>,
    download_root: Option<PathBuf>,
    pub log: Arc<EngineLog>,
}

impl FakeEngine {
    pub fn new(metadata: ResolvedMetadata) -> Self {
        Self {
            metadata,
            mode: Mutex::new(ResolveMode::Immediate),
            percent_per_sec: Some(100),
            download_root: None,
            log: Arc::new(EngineLog::default()),
        }
    }

    pub fn with_mode(self, mode: ResolveMode) -> Self {
        *self.mode.lock().unwrap() = mode;
        self
    }

    pub fn set_mode(&self, mode: ResolveMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn with_rate(mut self, percent_per_sec: Option<u64>) -> Self {
        self.percent_per_sec = percent_per_sec;
        self
    }

    /// Writes every active file under `root` when the transfer starts.
    pub fn writing_into(mut self, root: impl Into<PathBuf>) -> Self {
        self.download_root = Some(root.into());
        self
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn resolve(
        &self,
        _locator: &Locator,
        cancel: CancellationToken,
    ) -> Result<Box<dyn TransferHandle>, EngineError> {
        self.log.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.log.resolve_tokens.lock().unwrap().push(cancel);
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            ResolveMode::Immediate => {}
            ResolveMode::Delay(delay) => tokio::time::sleep(delay).await,
            ResolveMode::Hang => std::future::pending::<()>().await,
            ResolveMode::Fail(error) => return Err(error),
        }
        Ok(Box::new(FakeHandle {
            metadata: self.metadata.clone(),
            files: Vec::new(),
            percent_per_sec: None,
            started_at: Mutex::new(None),
            download_root: None,
            active: Mutex::new(Vec::new()),
            log: Arc::clone(&self.log),
        }))
    }

    async fn attach(
        &self,
        manifest: &ResourceManifest,
    ) -> Result<Box<dyn TransferHandle>, EngineError> {
        self.log.attach_calls.fetch_add(1, Ordering::SeqCst);
        let root = self.download_root.clone().unwrap_or_default();
        let files = manifest
            .files
            .iter()
            .map(|f| (f.clone(), manifest.local_path(&root, f).unwrap()))
            .collect();
        Ok(Box::new(FakeHandle {
            metadata: self.metadata.clone(),
            files,
            percent_per_sec: self.percent_per_sec,
            started_at: Mutex::new(None),
            download_root: self.download_root.clone(),
            active: Mutex::new(Vec::new()),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeHandle {
    metadata: ResolvedMetadata,
    files: Vec<(FileEntry, PathBuf)>,
    percent_per_sec: Option<u64>,
    started_at: Mutex<Option<Instant>>,
    download_root: Option<PathBuf>,
    active: Mutex<Vec<usize>>,
    log: Arc<EngineLog>,
}

impl FakeHandle {
    fn percent(&self) -> u64 {
        let Some(rate) = self.percent_per_sec else {
            return 0;
        };
        let Some(started) = *self.started_at.lock().unwrap() else {
            return 0;
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        (elapsed_ms.saturating_mul(rate) / 1000).min(100)
    }
}

#[async_trait]
impl TransferHandle for FakeHandle {
    fn metadata(&self) -> ResolvedMetadata {
        self.metadata.clone()
    }

    async fn set_file_priority(
        &self,
        index: usize,
        priority: FilePriority,
    ) -> Result<(), EngineError> {
        if index >= self.files.len() {
            return Err(EngineError::UnknownFile(index));
        }
        self.log.priorities.lock().unwrap().push((index, priority));
        if priority == FilePriority::Active {
            self.active.lock().unwrap().push(index);
        }
        Ok(())
    }

    async fn start_transfer(&self) -> Result<(), EngineError> {
        self.log.started.store(true, Ordering::SeqCst);
        *self.started_at.lock().unwrap() = Some(Instant::now());
        if self.download_root.is_some() {
            let active = self.active.lock().unwrap().clone();
            for index in active {
                let (file, path) = &self.files[index];
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(path, vec![0u8; usize::try_from(file.bytes.min(64)).unwrap()])
                    .unwrap();
            }
        }
        Ok(())
    }

    async fn bytes_completed(&self, scope: ByteScope) -> Result<u64, EngineError> {
        let percent = self.percent();
        let active = self.active.lock().unwrap().clone();
        let bytes = match scope {
            ByteScope::Total => active
                .iter()
                .map(|&i| self.files[i].0.bytes)
                .sum::<u64>(),
            ByteScope::File(index) => {
                let Some((file, _)) = self.files.get(index) else {
                    return Err(EngineError::UnknownFile(index));
                };
                file.bytes
            }
        };
        Ok(bytes * percent / 100)
    }

    fn release(&self) {
        self.log.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Manifest cache kept in memory, for tests running on a paused clock.
#[derive(Default)]
pub struct MemoryManifests {
    manifests: Mutex<HashMap<ResourceId, ResourceManifest>>,
}

#[async_trait]
impl ManifestStore for MemoryManifests {
    async fn get_manifest(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<ResourceManifest>, StoreError> {
        Ok(self.manifests.lock().unwrap().get(resource_id).cloned())
    }

    async fn insert_manifest(&self, manifest: &ResourceManifest) -> Result<bool, StoreError> {
        let mut manifests = self.manifests.lock().unwrap();
        if manifests.contains_key(&manifest.resource_id) {
            return Ok(false);
        }
        manifests.insert(manifest.resource_id.clone(), manifest.clone());
        Ok(true)
    }
}

/// Chat transport that records everything it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    send_delay: Mutex<Duration>,
    pub sent: Mutex<Vec<(ChatId, String)>>,
    pub edits: Mutex<Vec<(ChatId, MessageId, String)>>,
    pub replies: Mutex<Vec<(ChatId, MessageId, ReplyContent)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    pub fn replies(&self) -> Vec<(ChatId, MessageId, ReplyContent)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn file_replies(&self) -> Vec<PathBuf> {
        self.replies()
            .into_iter()
            .filter_map(|(_, _, content)| match content {
                ReplyContent::File { path, .. } => Some(path),
                ReplyContent::Text(_) => None,
            })
            .collect()
    }

    fn next(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageId, TransportError> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("scripted failure".to_string()));
        }
        self.sent.lock().unwrap().push((chat, text.to_string()));
        Ok(self.next())
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
    ) -> Result<(), TransportError> {
        self.edits
            .lock()
            .unwrap()
            .push((chat, message, text.to_string()));
        Ok(())
    }

    async fn send_reply(
        &self,
        chat: ChatId,
        parent: MessageId,
        content: ReplyContent,
    ) -> Result<MessageId, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("scripted failure".to_string()));
        }
        self.replies.lock().unwrap().push((chat, parent, content));
        Ok(self.next())
    }
}
