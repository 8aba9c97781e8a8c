//! Optimistic send protocol.
//!
//! The queue indexes every in-flight send by nonce. The entries themselves
//! live in their channel's message list; the index only points back at the
//! channel, so reconciliation is an O(1) lookup followed by an in-channel swap.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    channel::Channel,
    context::{ChangeEvent, Context},
    domain::{ChannelId, Nonce, User},
    errors::Error,
    model::{Message, MessageDraft, MessageKey, QueueStatus, QueuedMessage},
    ports::{ExperimentEvaluator, OutgoingPayload},
    store::ChannelStore,
    Result,
};

pub const MESSAGE_QUEUE_EXPERIMENT: &str = "message_queue";
pub const INJECTED_FAILURE_REASON: &str = "Message queue experiment";

/// Deliberate degradation of the send path, driven by the `message_queue`
/// experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultMode {
    /// Treatment 2: queue the message, then fail it without touching the transport.
    Fail,
    /// Treatment 1: queue the message and never send it.
    Suppress,
}

impl FaultMode {
    pub fn from_experiments(experiments: &dyn ExperimentEvaluator) -> Option<Self> {
        if experiments.is_treatment_enabled(MESSAGE_QUEUE_EXPERIMENT, 2) {
            Some(FaultMode::Fail)
        } else if experiments.is_treatment_enabled(MESSAGE_QUEUE_EXPERIMENT, 1) {
            Some(FaultMode::Suppress)
        } else {
            None
        }
    }
}

/// How the transport answered one send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Rejected(String),
}

/// What `reconcile` did with a confirmed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// A queued entry was swapped for the confirmed message.
    Replaced,
    /// Not locally queued; the message was inserted or refreshed by id.
    Upserted,
    /// Already present and identical.
    Unchanged,
    /// The message belongs to a channel we do not know.
    UnknownChannel,
}

pub struct MessageQueue {
    ctx: Arc<Context>,
    index: HashMap<Nonce, ChannelId>,
}

impl MessageQueue {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, nonce: Nonce) -> bool {
        self.index.contains_key(&nonce)
    }

    pub fn channel_of(&self, nonce: Nonce) -> Option<ChannelId> {
        self.index.get(&nonce).copied()
    }

    pub fn get<'a>(&self, channels: &'a ChannelStore, nonce: Nonce) -> Option<&'a QueuedMessage> {
        let channel_id = self.channel_of(nonce)?;
        channels.get(channel_id)?.queued(nonce)
    }

    /// Create a queued entry with a fresh nonce and append it to its channel.
    /// No validation happens here; callers refuse bad drafts first.
    pub fn add(
        &mut self,
        channels: &mut ChannelStore,
        channel_id: ChannelId,
        author: User,
        draft: MessageDraft,
    ) -> Result<QueuedMessage> {
        let channel = channels
            .get_mut(channel_id)
            .ok_or(Error::UnknownChannel(channel_id))?;

        let nonce = self.ctx.snowflakes.generate();
        let queued = QueuedMessage::from_draft(nonce, channel_id, channel.guild_id, author, draft);
        channel.push_queued(queued.clone());
        self.index.insert(nonce, channel_id);

        info!(%channel_id, %nonce, files = queued.files.len(), "message queued");
        Ok(queued)
    }

    /// Hand one queued message to the transport. Does not touch local state;
    /// feed the result to `settle`.
    pub async fn send(ctx: &Context, queued: &QueuedMessage) -> Delivery {
        let payload = OutgoingPayload::for_queued(queued);
        match ctx
            .transport
            .send_message(queued.channel_id, queued.nonce, payload)
            .await
        {
            Ok(()) => Delivery::Accepted,
            Err(e) => {
                warn!(channel_id = %queued.channel_id, nonce = %queued.nonce, error = %e, "send failed");
                Delivery::Rejected(e.to_string())
            }
        }
    }

    /// Record the transport's answer. A no-op if the entry was already
    /// reconciled or discarded meanwhile.
    pub fn settle(&mut self, channels: &mut ChannelStore, nonce: Nonce, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Accepted => self.mark_sent(channels, nonce),
            Delivery::Rejected(reason) => self.fail(channels, nonce, reason),
        }
    }

    pub fn mark_sent(&mut self, channels: &mut ChannelStore, nonce: Nonce) -> bool {
        self.transition(channels, nonce, |status| match status {
            QueueStatus::Sending => Some(QueueStatus::Sent),
            _ => None,
        })
    }

    /// Move an entry to Failed. Content and files are left untouched.
    pub fn fail(&mut self, channels: &mut ChannelStore, nonce: Nonce, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let changed = self.transition(channels, nonce, |status| match status {
            QueueStatus::Failed { reason: old } if *old == reason => None,
            _ => Some(QueueStatus::Failed {
                reason: reason.clone(),
            }),
        });
        if changed {
            info!(%nonce, %reason, "message failed");
        }
        changed
    }

    /// Failed back to Sending. Returns the entry to resend with its original nonce.
    pub fn begin_retry(&mut self, channels: &mut ChannelStore, nonce: Nonce) -> Option<QueuedMessage> {
        let changed = self.transition(channels, nonce, |status| match status {
            QueueStatus::Failed { .. } => Some(QueueStatus::Sending),
            _ => None,
        });
        if !changed {
            return None;
        }
        info!(%nonce, "retrying message");
        self.get(channels, nonce).cloned()
    }

    /// Drop a failed entry from both the index and its channel.
    pub fn discard(&mut self, channels: &mut ChannelStore, nonce: Nonce) -> Option<QueuedMessage> {
        let channel_id = self.channel_of(nonce)?;
        let channel = channels.get_mut(channel_id)?;
        if !channel.queued(nonce)?.is_failed() {
            return None;
        }
        self.index.remove(&nonce);
        let removed = channel.remove_queued(nonce);
        info!(%channel_id, %nonce, "failed message discarded");
        removed
    }

    /// Fold a confirmed message into local state. `nonce` is the echoed
    /// correlation token, if any.
    pub fn reconcile(
        &mut self,
        channels: &mut ChannelStore,
        nonce: Option<Nonce>,
        confirmed: Message,
    ) -> Reconciliation {
        if let Some(nonce) = nonce {
            if let Some(queued_in) = self.index.remove(&nonce) {
                if let Some(channel) = channels.get_mut(queued_in) {
                    if channel.replace_queued(nonce, confirmed.clone()) {
                        debug!(channel_id = %queued_in, %nonce, message_id = %confirmed.id, "reconciled");
                        return Reconciliation::Replaced;
                    }
                }
                warn!(%nonce, "queue index pointed at a missing entry");
            }
        }

        let Some(channel) = channels.get_mut(confirmed.channel_id) else {
            debug!(channel_id = %confirmed.channel_id, "message for unknown channel dropped");
            return Reconciliation::UnknownChannel;
        };
        if channel.insert_confirmed(confirmed) {
            Reconciliation::Upserted
        } else {
            Reconciliation::Unchanged
        }
    }

    /// Remove a channel and every queue entry that lived in it.
    pub fn remove_channel(&mut self, channels: &mut ChannelStore, channel_id: ChannelId) -> Option<Channel> {
        self.index.retain(|_, c| *c != channel_id);
        channels.remove(channel_id)
    }

    pub fn failed<'a>(&self, channels: &'a ChannelStore) -> Vec<&'a QueuedMessage> {
        self.entries(channels, |q| q.is_failed())
    }

    /// Entries still waiting on the transport or its echo.
    pub fn pending<'a>(&self, channels: &'a ChannelStore) -> Vec<&'a QueuedMessage> {
        self.entries(channels, |q| !q.is_failed())
    }

    fn entries<'a, F>(&self, channels: &'a ChannelStore, keep: F) -> Vec<&'a QueuedMessage>
    where
        F: Fn(&QueuedMessage) -> bool,
    {
        let mut out: Vec<&QueuedMessage> = self
            .index
            .keys()
            .filter_map(|&nonce| self.get(channels, nonce))
            .filter(|q| keep(q))
            .collect();
        out.sort_by_key(|q| q.nonce);
        out
    }

    fn transition<F>(&mut self, channels: &mut ChannelStore, nonce: Nonce, next: F) -> bool
    where
        F: FnOnce(&QueueStatus) -> Option<QueueStatus>,
    {
        let Some(channel_id) = self.channel_of(nonce) else {
            debug!(%nonce, "status change for unknown nonce ignored");
            return false;
        };
        let Some(queued) = channels
            .get_mut(channel_id)
            .and_then(|c| c.queued_mut(nonce))
        else {
            return false;
        };
        let Some(status) = next(&queued.status) else {
            return false;
        };
        queued.status = status;
        self.ctx.notify(ChangeEvent::QueueStatusChanged {
            channel_id,
            key: MessageKey::Nonce(nonce),
        });
        true
    }
}
