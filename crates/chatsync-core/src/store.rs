use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use tracing::debug;

use crate::{
    channel::{Channel, ChannelData},
    context::{ChangeEvent, Context},
    domain::ChannelId,
};

/// All known channels, keyed by id. Enumeration order is not meaningful.
pub struct ChannelStore {
    ctx: Arc<Context>,
    channels: HashMap<ChannelId, Channel>,
}

impl ChannelStore {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            channels: HashMap::new(),
        }
    }

    /// Upsert by id. An existing channel takes the new metadata and keeps
    /// its message list, so queued entries are never orphaned.
    pub fn add(&mut self, data: ChannelData) -> &mut Channel {
        let id = data.id;
        match self.channels.entry(id) {
            Entry::Occupied(slot) => {
                let channel = slot.into_mut();
                channel.apply_data(data);
                channel
            }
            Entry::Vacant(slot) => {
                debug!(channel_id = %id, "channel added");
                let channel = slot.insert(Channel::from_data(Arc::clone(&self.ctx), data));
                self.ctx.notify(ChangeEvent::ChannelAdded(id));
                channel
            }
        }
    }

    pub fn add_all<I>(&mut self, channels: I)
    where
        I: IntoIterator<Item = ChannelData>,
    {
        for data in channels {
            self.add(data);
        }
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    /// Detach a channel. Callers holding a `MessageQueue` should go through
    /// `MessageQueue::remove_channel` so its index is purged too.
    pub fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let removed = self.channels.remove(&id)?;
        self.ctx.notify(ChangeEvent::ChannelRemoved(id));
        Some(removed)
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn all(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }
}
