use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Snowflake);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(Snowflake(v))
            }
        }
    };
}

id_newtype!(
    /// User (account) id.
    UserId
);
id_newtype!(GuildId);
id_newtype!(ChannelId);
id_newtype!(
    /// Server-assigned message id. Ordering follows creation time.
    MessageId
);

/// Client-generated correlation token for a queued send.
///
/// Never reused by the server as the final message id.
pub type Nonce = Snowflake;

/// Minimal user snapshot carried on messages and channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            discriminator: None,
            avatar: None,
            bot: false,
        }
    }
}
