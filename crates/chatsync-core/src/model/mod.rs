//! Message model: confirmed messages, queued (optimistic) messages, and the
//! closed union of the two that a channel stores.

pub mod message;
pub mod queued;

use chrono::{DateTime, Utc};

use crate::domain::{ChannelId, MessageId, Nonce, User};

pub use message::{
    Attachment, Embed, Emoji, Message, MessageFlags, MessageReference, MessageType,
    MessageUpdate, Reaction, ReferencedMessage,
};
pub use queued::{MessageDraft, PendingFile, QueueStatus, QueuedMessage};

/// Identity of an entry in a channel's message list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Id(MessageId),
    Nonce(Nonce),
}

/// Read-only contract shared by confirmed and queued messages.
pub trait MessageBase {
    fn key(&self) -> MessageKey;
    fn channel_id(&self) -> ChannelId;
    fn author(&self) -> &User;
    fn content(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
}

impl MessageBase for Message {
    fn key(&self) -> MessageKey {
        MessageKey::Id(self.id)
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn author(&self) -> &User {
        &self.author
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl MessageBase for QueuedMessage {
    fn key(&self) -> MessageKey {
        MessageKey::Nonce(self.nonce)
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn author(&self) -> &User {
        &self.author
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MessageLike {
    Confirmed(Message),
    Queued(QueuedMessage),
}

impl MessageLike {
    pub fn as_confirmed(&self) -> Option<&Message> {
        match self {
            MessageLike::Confirmed(m) => Some(m),
            MessageLike::Queued(_) => None,
        }
    }

    pub fn as_queued(&self) -> Option<&QueuedMessage> {
        match self {
            MessageLike::Queued(q) => Some(q),
            MessageLike::Confirmed(_) => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, MessageLike::Queued(_))
    }

    fn base(&self) -> &dyn MessageBase {
        match self {
            MessageLike::Confirmed(m) => m,
            MessageLike::Queued(q) => q,
        }
    }
}

impl MessageBase for MessageLike {
    fn key(&self) -> MessageKey {
        self.base().key()
    }

    fn channel_id(&self) -> ChannelId {
        self.base().channel_id()
    }

    fn author(&self) -> &User {
        self.base().author()
    }

    fn content(&self) -> &str {
        self.base().content()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.base().timestamp()
    }
}

impl From<Message> for MessageLike {
    fn from(m: Message) -> Self {
        MessageLike::Confirmed(m)
    }
}

impl From<QueuedMessage> for MessageLike {
    fn from(q: QueuedMessage) -> Self {
        MessageLike::Queued(q)
    }
}
