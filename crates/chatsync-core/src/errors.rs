use crate::domain::ChannelId;

/// Core error type for the sync core.
///
/// Only refusals that happen *before* a message enters the queue surface here.
/// Transport failures after queueing are recorded on the queued entry instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("too many attachments: {attempted} (max {max})")]
    TooManyAttachments { max: usize, attempted: usize },

    #[error("missing permission: {0}")]
    MissingPermission(&'static str),

    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("no account is signed in")]
    NotAuthenticated,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Notice suitable for showing to the user as-is.
    pub fn user_notice(&self) -> String {
        match self {
            Error::TooManyAttachments { max, .. } => {
                format!("You can only attach {max} files at once.")
            }
            Error::MissingPermission(_) => {
                "You do not have permission to do that in this channel.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
