//! Push events from the gateway.
//!
//! Only dispatch frames (`op` 0) carry events. The socket itself is an
//! adapter concern; this module turns a decoded frame into a typed event.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    channel::ChannelData,
    domain::{ChannelId, GuildId, MessageId, User, UserId},
    model::{Emoji, Message, MessageUpdate},
    Result,
};

pub const OP_DISPATCH: u8 = 0;

/// A gateway frame: `{op, t, s, d}`.
#[derive(Clone, Debug, Deserialize)]
pub struct RawDispatch {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

impl RawDispatch {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn dispatch(t: &str, s: u64, d: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(t.to_string()),
            s: Some(s),
            d,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReadyData {
    pub user: User,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub private_channels: Vec<ChannelData>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChannelDelete {
    pub id: ChannelId,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageDelete {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageDeleteBulk {
    pub ids: Vec<MessageId>,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReactionEvent {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub emoji: Emoji,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TypingStart {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug)]
pub enum GatewayEvent {
    Ready(ReadyData),
    ChannelCreate(ChannelData),
    ChannelUpdate(ChannelData),
    ChannelDelete(ChannelDelete),
    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdate>),
    MessageDelete(MessageDelete),
    MessageDeleteBulk(MessageDeleteBulk),
    ReactionAdd(ReactionEvent),
    ReactionRemove(ReactionEvent),
    TypingStart(TypingStart),
    /// Anything we do not handle, by event name.
    Unknown(String),
}

impl GatewayEvent {
    /// Decode a frame. Non-dispatch frames (heartbeat acks, hello, ...) yield `None`.
    pub fn from_dispatch(raw: &RawDispatch) -> Result<Option<Self>> {
        if raw.op != OP_DISPATCH {
            return Ok(None);
        }
        let Some(t) = raw.t.as_deref() else {
            return Ok(None);
        };
        let d = raw.d.clone();

        let event = match t {
            "READY" => GatewayEvent::Ready(serde_json::from_value(d)?),
            "CHANNEL_CREATE" => GatewayEvent::ChannelCreate(serde_json::from_value(d)?),
            "CHANNEL_UPDATE" => GatewayEvent::ChannelUpdate(serde_json::from_value(d)?),
            "CHANNEL_DELETE" => GatewayEvent::ChannelDelete(serde_json::from_value(d)?),
            "MESSAGE_CREATE" => GatewayEvent::MessageCreate(Box::new(serde_json::from_value(d)?)),
            "MESSAGE_UPDATE" => GatewayEvent::MessageUpdate(Box::new(serde_json::from_value(d)?)),
            "MESSAGE_DELETE" => GatewayEvent::MessageDelete(serde_json::from_value(d)?),
            "MESSAGE_DELETE_BULK" => GatewayEvent::MessageDeleteBulk(serde_json::from_value(d)?),
            "MESSAGE_REACTION_ADD" => GatewayEvent::ReactionAdd(serde_json::from_value(d)?),
            "MESSAGE_REACTION_REMOVE" => GatewayEvent::ReactionRemove(serde_json::from_value(d)?),
            "TYPING_START" => GatewayEvent::TypingStart(serde_json::from_value(d)?),
            other => GatewayEvent::Unknown(other.to_string()),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::ChannelCreate(_) => "CHANNEL_CREATE",
            GatewayEvent::ChannelUpdate(_) => "CHANNEL_UPDATE",
            GatewayEvent::ChannelDelete(_) => "CHANNEL_DELETE",
            GatewayEvent::MessageCreate(_) => "MESSAGE_CREATE",
            GatewayEvent::MessageUpdate(_) => "MESSAGE_UPDATE",
            GatewayEvent::MessageDelete(_) => "MESSAGE_DELETE",
            GatewayEvent::MessageDeleteBulk(_) => "MESSAGE_DELETE_BULK",
            GatewayEvent::ReactionAdd(_) => "MESSAGE_REACTION_ADD",
            GatewayEvent::ReactionRemove(_) => "MESSAGE_REACTION_REMOVE",
            GatewayEvent::TypingStart(_) => "TYPING_START",
            GatewayEvent::Unknown(t) => t,
        }
    }
}
