use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    domain::{ChannelId, GuildId, MessageId, User},
    snowflake::Snowflake,
};

/// Message type as sent by the server (numeric on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageType {
    #[default]
    Default,
    RecipientAdd,
    RecipientRemove,
    Call,
    ChannelNameChange,
    ChannelIconChange,
    ChannelPinnedMessage,
    UserJoin,
    Reply,
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Default,
            1 => Self::RecipientAdd,
            2 => Self::RecipientRemove,
            3 => Self::Call,
            4 => Self::ChannelNameChange,
            5 => Self::ChannelIconChange,
            6 => Self::ChannelPinnedMessage,
            7 => Self::UserJoin,
            19 => Self::Reply,
            other => Self::Other(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(v: MessageType) -> Self {
        match v {
            MessageType::Default => 0,
            MessageType::RecipientAdd => 1,
            MessageType::RecipientRemove => 2,
            MessageType::Call => 3,
            MessageType::ChannelNameChange => 4,
            MessageType::ChannelIconChange => 5,
            MessageType::ChannelPinnedMessage => 6,
            MessageType::UserJoin => 7,
            MessageType::Reply => 19,
            MessageType::Other(n) => n,
        }
    }
}

impl MessageType {
    /// System messages are generated by the server, not typed by a user.
    pub fn is_system(self) -> bool {
        !matches!(self, Self::Default | Self::Reply)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageFlags(pub u64);

impl MessageFlags {
    pub const CROSSPOSTED: Self = Self(1 << 0);
    pub const IS_CROSSPOST: Self = Self(1 << 1);
    pub const SUPPRESS_EMBEDS: Self = Self(1 << 2);
    pub const URGENT: Self = Self(1 << 4);
    pub const EPHEMERAL: Self = Self(1 << 6);
    pub const LOADING: Self = Self(1 << 7);

    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// Attachment metadata of a confirmed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Embeds are carried through untouched; rendering them is not our business.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embed(pub serde_json::Value);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Emoji {
    pub fn unicode(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    /// Two emoji are the same reaction if their custom ids match, or, for
    /// unicode emoji, their names match.
    pub fn same_as(&self, other: &Emoji) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub count: u32,
    /// Whether the current account has reacted.
    pub me: bool,
    pub emoji: Emoji,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

/// What we know about the message a reply points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReferencedMessage {
    /// The server did not try to resolve it (field absent).
    #[default]
    NotFetched,
    /// The server resolved it to `null`: the message was deleted.
    Deleted,
    Message(MessageId),
}

/// A server-confirmed message.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "MessageData")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub tts: bool,
    pub mention_everyone: bool,
    pub mentions: Vec<User>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reactions: Vec<Reaction>,
    /// Only echoed on the MESSAGE_CREATE that confirms our own send.
    pub nonce: Option<String>,
    pub pinned: bool,
    pub webhook_id: Option<Snowflake>,
    pub kind: MessageType,
    pub flags: MessageFlags,
    pub message_reference: Option<MessageReference>,
    pub referenced_message: ReferencedMessage,
}

/// Message object as it appears on the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct MessageData {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default, deserialize_with = "nonce_string")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub flags: MessageFlags,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default, deserialize_with = "double_option")]
    pub referenced_message: Option<Option<Box<MessageData>>>,
}

impl From<MessageData> for Message {
    fn from(d: MessageData) -> Self {
        let referenced_message = match d.referenced_message {
            None => ReferencedMessage::NotFetched,
            Some(None) => ReferencedMessage::Deleted,
            Some(Some(m)) => ReferencedMessage::Message(m.id),
        };

        Self {
            id: d.id,
            channel_id: d.channel_id,
            guild_id: d.guild_id,
            author: d.author,
            content: d.content,
            timestamp: d.timestamp,
            edited_timestamp: d.edited_timestamp,
            tts: d.tts,
            mention_everyone: d.mention_everyone,
            mentions: d.mentions,
            attachments: d.attachments,
            embeds: d.embeds,
            reactions: d.reactions,
            nonce: d.nonce,
            pinned: d.pinned,
            webhook_id: d.webhook_id,
            kind: d.kind,
            flags: d.flags,
            message_reference: d.message_reference,
            referenced_message,
        }
    }
}

/// Partial update (MESSAGE_UPDATE). Absent fields are left alone.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// `Some(None)` means the server sent an explicit `null`.
    #[serde(default, deserialize_with = "double_option")]
    pub edited_timestamp: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub mention_everyone: Option<bool>,
    #[serde(default)]
    pub mentions: Option<Vec<User>>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub embeds: Option<Vec<Embed>>,
    #[serde(default)]
    pub reactions: Option<Vec<Reaction>>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub flags: Option<MessageFlags>,
}

impl MessageUpdate {
    pub fn new(id: MessageId, channel_id: ChannelId) -> Self {
        Self {
            id,
            channel_id,
            content: None,
            timestamp: None,
            edited_timestamp: None,
            mention_everyone: None,
            mentions: None,
            attachments: None,
            embeds: None,
            reactions: None,
            pinned: None,
            flags: None,
        }
    }
}

impl Message {
    /// Merge a partial update. Returns whether anything changed, so applying
    /// the same update twice is observably a no-op the second time.
    pub fn update(&mut self, u: &MessageUpdate) -> bool {
        let before = self.clone();

        if let Some(content) = &u.content {
            self.content = content.clone();
        }
        if let Some(ts) = u.timestamp {
            self.timestamp = ts;
        }
        if let Some(edited) = u.edited_timestamp {
            self.edited_timestamp = edited;
        }
        if let Some(v) = u.mention_everyone {
            self.mention_everyone = v;
        }
        if let Some(v) = &u.mentions {
            self.mentions = v.clone();
        }
        if let Some(v) = &u.attachments {
            self.attachments = v.clone();
        }
        if let Some(v) = &u.embeds {
            self.embeds = v.clone();
        }
        if let Some(v) = &u.reactions {
            self.reactions = v.clone();
        }
        if let Some(v) = u.pinned {
            self.pinned = v;
        }
        if let Some(v) = u.flags {
            self.flags = v;
        }

        *self != before
    }

    pub fn set_pinned(&mut self, pinned: bool) -> bool {
        let changed = self.pinned != pinned;
        self.pinned = pinned;
        changed
    }

    pub fn reaction(&self, emoji: &Emoji) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.emoji.same_as(emoji))
    }

    /// Someone reacted. `by_me` is true when that someone is the current account.
    pub fn add_reaction(&mut self, emoji: &Emoji, by_me: bool) -> bool {
        match self.reactions.iter_mut().find(|r| r.emoji.same_as(emoji)) {
            Some(r) => {
                if by_me && r.me {
                    return false;
                }
                r.count += 1;
                r.me |= by_me;
            }
            None => self.reactions.push(Reaction {
                count: 1,
                me: by_me,
                emoji: emoji.clone(),
            }),
        }
        true
    }

    pub fn remove_reaction(&mut self, emoji: &Emoji, by_me: bool) -> bool {
        let Some(idx) = self.reactions.iter().position(|r| r.emoji.same_as(emoji)) else {
            return false;
        };
        let r = &mut self.reactions[idx];
        if by_me {
            if !r.me {
                return false;
            }
            r.me = false;
        }
        r.count = r.count.saturating_sub(1);
        if r.count == 0 {
            self.reactions.remove(idx);
        }
        true
    }

    /// Local toggle for the current account.
    pub fn toggle_reaction(&mut self, emoji: &Emoji) -> bool {
        if self.reaction(emoji).map(|r| r.me).unwrap_or(false) {
            self.remove_reaction(emoji, true)
        } else {
            self.add_reaction(emoji, true)
        }
    }

    /// Nonce echoed by the server, parsed back into a snowflake.
    pub fn echoed_nonce(&self) -> Option<Snowflake> {
        self.nonce.as_deref().and_then(|n| n.parse().ok())
    }
}

/// Distinguishes "field absent" (outer `None`) from "field is null" (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn nonce_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        UInt(u64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::UInt(n) => n.to_string(),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn message_json(id: u64, channel: u64, content: &str) -> serde_json::Value {
        json!({
            "id": id.to_string(),
            "channel_id": channel.to_string(),
            "author": { "id": "9", "username": "bob" },
            "content": content,
            "timestamp": "2024-05-01T12:00:00+00:00",
            "edited_timestamp": null,
            "tts": false,
            "mention_everyone": false,
            "mentions": [],
            "attachments": [],
            "embeds": [],
            "pinned": false,
            "type": 0
        })
    }

    pub(crate) fn message(id: u64, channel: u64, content: &str) -> Message {
        serde_json::from_value(message_json(id, channel, content)).unwrap()
    }

    #[test]
    fn parses_wire_message() {
        let mut v = message_json(10, 1, "hi");
        v["nonce"] = json!(12345);
        v["type"] = json!(19);
        v["referenced_message"] = json!(null);
        let m: Message = serde_json::from_value(v).unwrap();
        assert_eq!(m.id, MessageId::from(10));
        assert_eq!(m.kind, MessageType::Reply);
        assert_eq!(m.nonce.as_deref(), Some("12345"));
        assert_eq!(m.echoed_nonce(), Some(Snowflake(12345)));
        assert_eq!(m.referenced_message, ReferencedMessage::Deleted);
    }

    #[test]
    fn referenced_message_keeps_only_id() {
        let mut v = message_json(11, 1, "reply");
        v["referenced_message"] = message_json(3, 1, "original");
        let m: Message = serde_json::from_value(v).unwrap();
        assert_eq!(
            m.referenced_message,
            ReferencedMessage::Message(MessageId::from(3))
        );

        let plain = message(12, 1, "plain");
        assert_eq!(plain.referenced_message, ReferencedMessage::NotFetched);
    }

    #[test]
    fn applying_same_update_twice_is_noop() {
        let mut m = message(10, 1, "before");
        let u: MessageUpdate = serde_json::from_value(json!({
            "id": "10",
            "channel_id": "1",
            "content": "after",
            "edited_timestamp": "2024-05-01T12:05:00+00:00"
        }))
        .unwrap();

        assert!(m.update(&u));
        let once = m.clone();
        assert!(!m.update(&u));
        assert_eq!(m, once);
        assert_eq!(m.content, "after");
        assert!(m.edited_timestamp.is_some());
    }

    #[test]
    fn update_distinguishes_absent_and_null_edit_time() {
        let mut m = message(10, 1, "x");
        m.edited_timestamp = Some(Utc::now());

        let absent: MessageUpdate =
            serde_json::from_value(json!({"id": "10", "channel_id": "1", "pinned": true}))
                .unwrap();
        m.update(&absent);
        assert!(m.edited_timestamp.is_some());
        assert!(m.pinned);

        let null: MessageUpdate = serde_json::from_value(
            json!({"id": "10", "channel_id": "1", "edited_timestamp": null}),
        )
        .unwrap();
        m.update(&null);
        assert!(m.edited_timestamp.is_none());
    }

    #[test]
    fn reactions_track_count_and_me() {
        let mut m = message(10, 1, "x");
        let fire = Emoji::unicode("🔥");

        assert!(m.add_reaction(&fire, false));
        assert!(m.toggle_reaction(&fire));
        let r = m.reaction(&fire).unwrap();
        assert_eq!((r.count, r.me), (2, true));

        // Our own reaction echoed back does not double count.
        assert!(!m.add_reaction(&fire, true));

        assert!(m.toggle_reaction(&fire));
        let r = m.reaction(&fire).unwrap();
        assert_eq!((r.count, r.me), (1, false));

        assert!(m.remove_reaction(&fire, false));
        assert!(m.reaction(&fire).is_none());
        assert!(!m.remove_reaction(&fire, false));
    }

    #[test]
    fn pin_toggle_reports_change() {
        let mut m = message(10, 1, "x");
        assert!(m.set_pinned(true));
        assert!(!m.set_pinned(true));
        assert!(m.set_pinned(false));
    }
}
