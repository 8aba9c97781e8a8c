use std::fmt;

use chrono::{DateTime, Utc};

use crate::{
    domain::{ChannelId, GuildId, Nonce, User},
    model::message::{MessageReference, MessageType},
};

/// A local file waiting to be uploaded with a message.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl PendingFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for PendingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFile")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    /// Created locally; the transport has not answered yet.
    Sending,
    /// The transport accepted the request; waiting for the MESSAGE_CREATE echo.
    Sent,
    /// Delivery failed. The entry stays visible so it can be retried or discarded.
    Failed { reason: String },
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Sending => "sending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed { .. } => "failed",
        }
    }
}

/// What the user asked to send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub files: Vec<PendingFile>,
    pub message_reference: Option<MessageReference>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_files(mut self, files: Vec<PendingFile>) -> Self {
        self.files = files;
        self
    }

    /// Content with no visible characters (only whitespace or line breaks)
    /// and no files is not worth sending.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.content.trim().is_empty()
    }
}

/// A message that exists only locally until the server confirms it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedMessage {
    pub nonce: Nonce,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: User,
    pub content: String,
    pub files: Vec<PendingFile>,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageType,
    pub message_reference: Option<MessageReference>,
    pub status: QueueStatus,
}

impl QueuedMessage {
    pub fn from_draft(
        nonce: Nonce,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
        author: User,
        draft: MessageDraft,
    ) -> Self {
        let kind = if draft.message_reference.is_some() {
            MessageType::Reply
        } else {
            MessageType::Default
        };
        Self {
            nonce,
            channel_id,
            guild_id,
            author,
            content: draft.content,
            files: draft.files,
            timestamp: nonce.timestamp(),
            kind,
            message_reference: draft.message_reference,
            status: QueueStatus::Sending,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, QueueStatus::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            QueueStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}
