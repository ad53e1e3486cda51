//! Progress notifications and the status message that renders them.
//!
//! Resolution and fetch tasks push [`Progress`] events into an optional
//! bounded channel. Sends never block: if the consumer lags, events are
//! dropped, since only the latest one matters for display.
//! [`StatusReporter`] consumes the channel and edits one chat message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::{ChatId, ChatTransport, MessageId};

/// Repeatable, non-terminal progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Metadata resolution still outstanding.
    Resolving { elapsed: Duration },
    /// Transfer of a selection under way.
    Transferring {
        label: String,
        completed: u64,
        total: u64,
        elapsed: Duration,
    },
}

/// Producer side of a progress channel.
pub type ProgressSender = mpsc::Sender<Progress>;

/// Default capacity for progress channels.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// Sends `event` if a sender is attached, dropping it when the channel is full.
pub(crate) fn notify(progress: Option<&ProgressSender>, event: Progress) {
    if let Some(sender) = progress
        && let Err(error) = sender.try_send(event)
    {
        debug!(error = %error, "progress event dropped");
    }
}

const UNITS: [&str; 4] = ["K", "M", "G", "T"];

/// Renders a byte count with binary units: `512 B`, `1.50 K`, `2.00 G`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Renders a duration as `HH:MM:SS`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Whole-number completion percentage, 100 for an empty total.
#[must_use]
pub fn percent(completed: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    let ratio = u128::from(completed.min(total)) * 100 / u128::from(total);
    u64::try_from(ratio).unwrap_or(100)
}

/// Renders one progress event as status text.
#[must_use]
pub fn render_progress(progress: &Progress) -> String {
    match progress {
        Progress::Resolving { elapsed } => {
            format!("Resolving metadata... {}", format_elapsed(*elapsed))
        }
        Progress::Transferring {
            label,
            completed,
            total,
            elapsed,
        } => format!(
            "Downloading {label}\n{}% ({} / {})\nElapsed {}",
            percent(*completed, *total),
            format_bytes(*completed),
            format_bytes(*total),
            format_elapsed(*elapsed)
        ),
    }
}

/// Edits one chat message as progress arrives.
#[derive(Clone)]
pub struct StatusReporter {
    transport: Arc<dyn ChatTransport>,
    chat: ChatId,
    message: MessageId,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("chat", &self.chat)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl StatusReporter {
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, chat: ChatId, message: MessageId) -> Self {
        Self {
            transport,
            chat,
            message,
        }
    }

    /// Replaces the status text; failures are logged only.
    pub async fn update(&self, text: &str) {
        if let Err(error) = self
            .transport
            .edit_message(self.chat, self.message, text)
            .await
        {
            warn!(chat = %self.chat, message = %self.message, error = %error, "status edit failed");
        }
    }

    /// Consumes progress events until every sender is dropped.
    ///
    /// Identical consecutive renderings are skipped.
    pub async fn run(self, mut events: mpsc::Receiver<Progress>) {
        let mut last = String::new();
        while let Some(event) = events.recv().await {
            let text = render_progress(&event);
            if text != last {
                self.update(&text).await;
                last = text;
            }
        }
    }
}
