use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    context::{ChangeEvent, Context},
    domain::{ChannelId, GuildId, MessageId, Nonce, User, UserId},
    model::{Message, MessageBase, MessageKey, MessageLike, MessageUpdate, QueuedMessage},
    permissions::Permissions,
    typing::{TypingIndicator, TypingUsers},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildNews,
    Other(u8),
}

impl From<u8> for ChannelType {
    fn from(v: u8) -> Self {
        match v {
            0 => ChannelType::GuildText,
            1 => ChannelType::Dm,
            2 => ChannelType::GuildVoice,
            3 => ChannelType::GroupDm,
            4 => ChannelType::GuildCategory,
            5 => ChannelType::GuildNews,
            other => ChannelType::Other(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(t: ChannelType) -> Self {
        match t {
            ChannelType::GuildText => 0,
            ChannelType::Dm => 1,
            ChannelType::GuildVoice => 2,
            ChannelType::GroupDm => 3,
            ChannelType::GuildCategory => 4,
            ChannelType::GuildNews => 5,
            ChannelType::Other(v) => v,
        }
    }
}

impl ChannelType {
    /// Channels that carry a message list.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            ChannelType::GuildText | ChannelType::Dm | ChannelType::GroupDm | ChannelType::GuildNews
        )
    }

    pub fn is_private(self) -> bool {
        matches!(self, ChannelType::Dm | ChannelType::GroupDm)
    }
}

/// Channel object as it appears on the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelData {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub recipients: Vec<User>,
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    /// Capabilities of the current account, precomputed by the server.
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

impl ChannelData {
    pub fn new(id: impl Into<ChannelId>, kind: ChannelType) -> Self {
        Self {
            id: id.into(),
            kind,
            guild_id: None,
            name: None,
            topic: None,
            recipients: Vec::new(),
            last_message_id: None,
            permissions: None,
        }
    }
}

/// One channel: its metadata, ordered message list and typing state.
///
/// Confirmed messages are kept in id order; queued entries sit after them
/// until reconciled. Queued entries are only mutated through `MessageQueue`.
pub struct Channel {
    ctx: Arc<Context>,
    pub id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub kind: ChannelType,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub recipients: Vec<User>,
    pub last_message_id: Option<MessageId>,
    permissions: Permissions,
    messages: Vec<MessageLike>,
    typing: Arc<TypingIndicator>,
    typing_users: TypingUsers,
}

fn default_permissions(kind: ChannelType) -> Permissions {
    if kind.is_text() {
        Permissions::DEFAULT_TEXT
    } else {
        Permissions::VIEW_CHANNEL
    }
}

impl Channel {
    pub fn from_data(ctx: Arc<Context>, data: ChannelData) -> Self {
        let typing = TypingIndicator::new(&ctx, data.id);
        let typing_users = TypingUsers::new(ctx.config.remote_typing_ttl);
        Self {
            permissions: data
                .permissions
                .unwrap_or_else(|| default_permissions(data.kind)),
            id: data.id,
            guild_id: data.guild_id,
            kind: data.kind,
            name: data.name,
            topic: data.topic,
            recipients: data.recipients,
            last_message_id: data.last_message_id,
            messages: Vec::new(),
            typing,
            typing_users,
            ctx,
        }
    }

    /// Apply CHANNEL_UPDATE metadata. Messages and typing state are kept.
    pub fn apply_data(&mut self, data: ChannelData) -> bool {
        let permissions = data
            .permissions
            .unwrap_or_else(|| default_permissions(data.kind));
        let changed = self.kind != data.kind
            || self.guild_id != data.guild_id
            || self.name != data.name
            || self.topic != data.topic
            || self.recipients != data.recipients
            || self.permissions != permissions
            || (data.last_message_id.is_some() && self.last_message_id != data.last_message_id);
        if !changed {
            return false;
        }

        self.kind = data.kind;
        self.guild_id = data.guild_id;
        self.name = data.name;
        self.topic = data.topic;
        self.recipients = data.recipients;
        self.permissions = permissions;
        if data.last_message_id.is_some() {
            self.last_message_id = data.last_message_id;
        }
        self.ctx.notify(ChangeEvent::ChannelUpdated(self.id));
        true
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn has_permission(&self, flag: Permissions) -> bool {
        self.permissions.contains(flag)
    }

    pub fn set_permissions(&mut self, permissions: Permissions) {
        if self.permissions != permissions {
            self.permissions = permissions;
            self.ctx.notify(ChangeEvent::ChannelUpdated(self.id));
        }
    }

    pub fn display_name(&self) -> String {
        if self.kind.is_private() {
            if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
            return match self.recipients.first() {
                Some(user) => user.username.clone(),
                None => "Unknown".to_string(),
            };
        }
        format!("#{}", self.name.as_deref().unwrap_or_default())
    }

    /// Placeholder for the message input of this channel.
    pub fn input_placeholder(&self) -> String {
        if !self.has_permission(Permissions::SEND_MESSAGES) {
            return "You do not have permission to send messages in this channel.".to_string();
        }
        if self.kind == ChannelType::Dm {
            if let Some(user) = self.recipients.first() {
                return format!("Message @{}", user.username);
            }
        }
        format!("Message {}", self.display_name())
    }

    pub fn messages(&self) -> &[MessageLike] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .filter_map(MessageLike::as_confirmed)
            .find(|m| m.id == id)
    }

    pub fn queued(&self, nonce: Nonce) -> Option<&QueuedMessage> {
        self.messages
            .iter()
            .filter_map(MessageLike::as_queued)
            .find(|q| q.nonce == nonce)
    }

    /// Upsert a confirmed message by id. Returns false if nothing changed.
    pub fn insert_confirmed(&mut self, message: Message) -> bool {
        let author = message.author.id;
        let key = MessageKey::Id(message.id);
        let event = match self.position_of(key) {
            Some(idx) => {
                if self.messages[idx].as_confirmed() == Some(&message) {
                    debug!(channel_id = %self.id, message_id = %message.id, "duplicate message ignored");
                    return false;
                }
                self.messages[idx] = MessageLike::Confirmed(message);
                ChangeEvent::MessageUpdated {
                    channel_id: self.id,
                    key,
                }
            }
            None => {
                self.bump_last_message(message.id);
                self.insert_ordered(message);
                ChangeEvent::MessageAdded {
                    channel_id: self.id,
                    key,
                }
            }
        };
        self.ctx.notify(event);

        // A user who just posted is no longer typing.
        if self.typing_users.stop(author, Instant::now()) {
            self.ctx.notify(ChangeEvent::TypingChanged {
                channel_id: self.id,
                user_id: Some(author),
            });
        }
        true
    }

    /// Merge MESSAGE_UPDATE into the matching confirmed message.
    pub fn update_message(&mut self, update: &MessageUpdate) -> bool {
        self.modify_message(update.id, |m| m.update(update))
    }

    /// Run `f` on a confirmed message; `f` reports whether it changed anything.
    pub fn modify_message<F>(&mut self, id: MessageId, f: F) -> bool
    where
        F: FnOnce(&mut Message) -> bool,
    {
        let found = self.messages.iter_mut().find_map(|m| match m {
            MessageLike::Confirmed(msg) if msg.id == id => Some(msg),
            _ => None,
        });
        let Some(msg) = found else {
            debug!(channel_id = %self.id, message_id = %id, "update for unknown message");
            return false;
        };
        if !f(msg) {
            return false;
        }
        self.ctx.notify(ChangeEvent::MessageUpdated {
            channel_id: self.id,
            key: MessageKey::Id(id),
        });
        true
    }

    pub fn remove_message(&mut self, id: MessageId) -> bool {
        let key = MessageKey::Id(id);
        let Some(idx) = self.position_of(key) else {
            return false;
        };
        self.messages.remove(idx);
        self.ctx.notify(ChangeEvent::MessageRemoved {
            channel_id: self.id,
            key,
        });
        true
    }

    pub(crate) fn push_queued(&mut self, queued: QueuedMessage) {
        let key = queued.key();
        self.messages.push(MessageLike::Queued(queued));
        self.ctx.notify(ChangeEvent::MessageAdded {
            channel_id: self.id,
            key,
        });
    }

    pub(crate) fn queued_mut(&mut self, nonce: Nonce) -> Option<&mut QueuedMessage> {
        self.messages.iter_mut().find_map(|m| match m {
            MessageLike::Queued(q) if q.nonce == nonce => Some(q),
            _ => None,
        })
    }

    pub(crate) fn remove_queued(&mut self, nonce: Nonce) -> Option<QueuedMessage> {
        let key = MessageKey::Nonce(nonce);
        let idx = self.position_of(key)?;
        let removed = match self.messages.remove(idx) {
            MessageLike::Queued(q) => q,
            MessageLike::Confirmed(_) => return None,
        };
        self.ctx.notify(ChangeEvent::MessageRemoved {
            channel_id: self.id,
            key,
        });
        Some(removed)
    }

    /// Swap the queued entry `nonce` for its confirmed counterpart. The
    /// message count drops by one only if the confirmed id was already present.
    pub(crate) fn replace_queued(&mut self, nonce: Nonce, message: Message) -> bool {
        let Some(idx) = self.position_of(MessageKey::Nonce(nonce)) else {
            return false;
        };
        self.messages.remove(idx);

        let key = MessageKey::Id(message.id);
        match self.position_of(key) {
            Some(existing) => self.messages[existing] = MessageLike::Confirmed(message),
            None => {
                self.bump_last_message(message.id);
                self.insert_ordered(message);
            }
        }
        self.ctx.notify(ChangeEvent::MessageReconciled {
            channel_id: self.id,
            key,
        });
        true
    }

    pub(crate) fn queued_nonces(&self) -> impl Iterator<Item = Nonce> + '_ {
        self.messages
            .iter()
            .filter_map(MessageLike::as_queued)
            .map(|q| q.nonce)
    }

    pub fn typing_indicator(&self) -> Arc<TypingIndicator> {
        Arc::clone(&self.typing)
    }

    pub fn is_typing(&self) -> bool {
        self.typing.is_typing()
    }

    pub async fn start_typing(&self) {
        self.typing.start_typing().await;
    }

    pub async fn stop_typing(&self) {
        self.typing.stop_typing().await;
    }

    /// TYPING_START from another user.
    pub fn user_started_typing(&mut self, user_id: UserId) -> bool {
        if !self.typing_users.start(user_id, Instant::now()) {
            return false;
        }
        self.ctx.notify(ChangeEvent::TypingChanged {
            channel_id: self.id,
            user_id: Some(user_id),
        });
        true
    }

    /// Remote users still typing. Expired entries are pruned on read.
    pub fn typing_users(&mut self) -> Vec<UserId> {
        self.typing_users.active_at(Instant::now())
    }

    pub fn is_user_typing(&self, user_id: UserId) -> bool {
        self.typing_users.is_typing_at(user_id, Instant::now())
    }

    fn position_of(&self, key: MessageKey) -> Option<usize> {
        self.messages.iter().position(|m| m.key() == key)
    }

    fn insert_ordered(&mut self, message: Message) {
        let idx = self
            .messages
            .iter()
            .position(|m| match m {
                MessageLike::Queued(_) => true,
                MessageLike::Confirmed(c) => c.id > message.id,
            })
            .unwrap_or(self.messages.len());
        self.messages.insert(idx, MessageLike::Confirmed(message));
    }

    fn bump_last_message(&mut self, id: MessageId) {
        if self.last_message_id.map(|last| id > last).unwrap_or(true) {
            self.last_message_id = Some(id);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.typing.dispose();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .field("messages", &self.messages.len())
            .finish()
    }
}
