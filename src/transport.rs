//! Chat transport seam.
//!
//! Status messages, channel announcements and file replies all go through
//! [`ChatTransport`]. Rendering and delivery details belong to the
//! implementation; this crate only needs message ids back.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chat or channel the transport can post into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// A message previously posted through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a reply attached to a parent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContent {
    /// Plain text.
    Text(String),
    /// A local file upload with an optional caption.
    File {
        path: PathBuf,
        caption: Option<String>,
    },
}

/// Errors surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The platform refused the request.
    #[error("transport rejected request: {0}")]
    Rejected(String),

    /// The platform could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Outbound operations on the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Posts a new message and returns its id.
    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageId, TransportError>;

    /// Replaces the text of an existing message.
    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
    ) -> Result<(), TransportError>;

    /// Posts a reply under `parent` and returns the reply's id.
    async fn send_reply(
        &self,
        chat: ChatId,
        parent: MessageId,
        content: ReplyContent,
    ) -> Result<MessageId, TransportError>;
}
