use std::{fmt, ops};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Precomputed capability bitset of a channel (Discord-compatible bit positions).
///
/// Computing it from roles and overwrites is the server's job; the client only
/// checks bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const CREATE_INSTANT_INVITE: Self = Self(1 << 0);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const ADD_REACTIONS: Self = Self(1 << 6);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const SEND_TTS_MESSAGES: Self = Self(1 << 12);
    pub const MANAGE_MESSAGES: Self = Self(1 << 13);
    pub const EMBED_LINKS: Self = Self(1 << 14);
    pub const ATTACH_FILES: Self = Self(1 << 15);
    pub const READ_MESSAGE_HISTORY: Self = Self(1 << 16);
    pub const MENTION_EVERYONE: Self = Self(1 << 17);
    pub const CONNECT: Self = Self(1 << 20);
    pub const SPEAK: Self = Self(1 << 21);

    /// What a member gets in an ordinary text channel or DM.
    pub const DEFAULT_TEXT: Self = Self(
        Self::VIEW_CHANNEL.0
            | Self::SEND_MESSAGES.0
            | Self::ATTACH_FILES.0
            | Self::EMBED_LINKS.0
            | Self::READ_MESSAGE_HISTORY.0
            | Self::ADD_REACTIONS.0,
    );

    const NAMES: [(Self, &'static str); 14] = [
        (Self::CREATE_INSTANT_INVITE, "CREATE_INSTANT_INVITE"),
        (Self::ADMINISTRATOR, "ADMINISTRATOR"),
        (Self::MANAGE_CHANNELS, "MANAGE_CHANNELS"),
        (Self::ADD_REACTIONS, "ADD_REACTIONS"),
        (Self::VIEW_CHANNEL, "VIEW_CHANNEL"),
        (Self::SEND_MESSAGES, "SEND_MESSAGES"),
        (Self::SEND_TTS_MESSAGES, "SEND_TTS_MESSAGES"),
        (Self::MANAGE_MESSAGES, "MANAGE_MESSAGES"),
        (Self::EMBED_LINKS, "EMBED_LINKS"),
        (Self::ATTACH_FILES, "ATTACH_FILES"),
        (Self::READ_MESSAGE_HISTORY, "READ_MESSAGE_HISTORY"),
        (Self::MENTION_EVERYONE, "MENTION_EVERYONE"),
        (Self::CONNECT, "CONNECT"),
        (Self::SPEAK, "SPEAK"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    /// True if every bit of `flag` is set.
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Look up a flag by its canonical name (e.g. `"SEND_MESSAGES"`).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(p, _)| *p)
    }

    /// Name of a single known flag.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES.iter().find(|(p, _)| *p == self).map(|(_, n)| *n)
    }
}

impl ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl ops::Sub for Permissions {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(p, _)| self.contains(*p))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "Permissions({:#x} {})", self.0, names.join("|"))
    }
}

// The wire format is a decimal string, like ids.
impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.trim().parse().map(Self).map_err(de::Error::custom),
            Raw::Num(n) => Ok(Self(n)),
        }
    }
}
