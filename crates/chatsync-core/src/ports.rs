//! Contracts the core needs from the outside world.
//!
//! The HTTP transport, the session that knows who is signed in, and the
//! experiment service all live behind these traits; adapter crates implement them.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    domain::{ChannelId, Nonce, User},
    model::{MessageReference, PendingFile, QueuedMessage},
    Result,
};

/// JSON part of an outgoing message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageBody {
    pub content: String,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

/// What goes over the wire for one send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingPayload {
    Json(MessageBody),
    /// Used when files are attached: `payload_json` plus one part per file.
    Multipart {
        payload_json: MessageBody,
        files: Vec<PendingFile>,
    },
}

impl OutgoingPayload {
    pub fn for_queued(msg: &QueuedMessage) -> Self {
        let body = MessageBody {
            content: msg.content.clone(),
            nonce: msg.nonce.to_string(),
            message_reference: msg.message_reference.clone(),
        };
        if msg.files.is_empty() {
            OutgoingPayload::Json(body)
        } else {
            OutgoingPayload::Multipart {
                payload_json: body,
                files: msg.files.clone(),
            }
        }
    }

    pub fn body(&self) -> &MessageBody {
        match self {
            OutgoingPayload::Json(body) => body,
            OutgoingPayload::Multipart { payload_json, .. } => payload_json,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Outbound half of the transport collaborator.
///
/// The inbound half (push events) arrives through `App::handle_dispatch`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        nonce: Nonce,
        payload: OutgoingPayload,
    ) -> Result<()>;

    async fn send_typing(&self, channel_id: ChannelId, signal: TypingSignal) -> Result<()>;
}

/// Supplies the signed-in account used to stamp queued messages.
pub trait IdentityProvider: Send + Sync {
    fn current_account(&self) -> Option<User>;
}

/// Holds the current account; the session layer swaps it on login/logout.
#[derive(Debug, Default)]
pub struct AccountSlot {
    account: RwLock<Option<User>>,
}

impl AccountSlot {
    pub fn new(account: Option<User>) -> Self {
        Self {
            account: RwLock::new(account),
        }
    }

    pub fn set(&self, account: Option<User>) {
        match self.account.write() {
            Ok(mut guard) => *guard = account,
            Err(poisoned) => *poisoned.into_inner() = account,
        }
    }
}

impl IdentityProvider for AccountSlot {
    fn current_account(&self) -> Option<User> {
        match self.account.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub trait ExperimentEvaluator: Send + Sync {
    fn is_treatment_enabled(&self, experiment: &str, treatment: u32) -> bool;
}

/// Fixed treatment assignments (from config).
#[derive(Clone, Debug, Default)]
pub struct StaticExperiments {
    assignments: HashMap<String, u32>,
}

impl StaticExperiments {
    pub fn new(assignments: HashMap<String, u32>) -> Self {
        Self { assignments }
    }

    pub fn with(mut self, experiment: &str, treatment: u32) -> Self {
        self.assignments.insert(experiment.to_string(), treatment);
        self
    }
}

impl ExperimentEvaluator for StaticExperiments {
    fn is_treatment_enabled(&self, experiment: &str, treatment: u32) -> bool {
        self.assignments.get(experiment) == Some(&treatment)
    }
}
