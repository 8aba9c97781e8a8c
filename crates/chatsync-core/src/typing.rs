//! Typing indicators.
//!
//! `TypingIndicator` is the local side: it throttles outbound "typing"
//! signals and sends "stop typing" once the user has been quiet for a while.
//! `TypingUsers` tracks remote users with per-user expiry.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    context::{ChangeEvent, Context},
    domain::{ChannelId, UserId},
    ports::TypingSignal,
    schedule::ScheduledTask,
};

#[derive(Debug, Default)]
struct LocalState {
    is_typing: bool,
    last_signal: Option<Instant>,
    signal_sent: bool,
    disposed: bool,
}

pub struct TypingIndicator {
    channel_id: ChannelId,
    ctx: Arc<Context>,
    cooldown: Duration,
    state: Mutex<LocalState>,
    stop_timer: ScheduledTask,
}

impl TypingIndicator {
    pub fn new(ctx: &Arc<Context>, channel_id: ChannelId) -> Arc<Self> {
        let quiet = ctx.config.typing_quiet_period;
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let stop_timer = ScheduledTask::new(quiet, move || {
                let weak = weak.clone();
                async move {
                    // Channel already gone: nothing to stop.
                    if let Some(this) = weak.upgrade() {
                        this.stop_typing().await;
                    }
                }
            });
            Self {
                channel_id,
                ctx: Arc::clone(ctx),
                cooldown: ctx.config.typing_signal_cooldown,
                state: Mutex::new(LocalState::default()),
                stop_timer,
            }
        })
    }

    pub fn is_typing(&self) -> bool {
        self.lock().is_typing
    }

    /// Called on every keystroke. Re-arms the quiet timer and sends a typing
    /// signal unless one went out within the cooldown window.
    pub async fn start_typing(&self) {
        let (send, became_typing) = {
            let mut st = self.lock();
            if st.disposed {
                return;
            }
            let became_typing = !st.is_typing;
            st.is_typing = true;

            let now = Instant::now();
            let due = st
                .last_signal
                .map(|at| now.duration_since(at) >= self.cooldown)
                .unwrap_or(true);
            if due {
                st.last_signal = Some(now);
                st.signal_sent = true;
            }
            (due, became_typing)
        };

        self.stop_timer.reset();
        if became_typing {
            self.notify();
        }

        if send {
            debug!(channel_id = %self.channel_id, "typing start");
            if let Err(e) = self
                .ctx
                .transport
                .send_typing(self.channel_id, TypingSignal::Start)
                .await
            {
                warn!(channel_id = %self.channel_id, error = %e, "typing signal failed");
            }
        }
    }

    /// Back to idle right away. Sends "stop typing" only if a typing signal
    /// went out since the last stop.
    pub async fn stop_typing(&self) {
        self.stop_timer.cancel();

        let (send, was_typing) = {
            let mut st = self.lock();
            if !st.is_typing && !st.signal_sent {
                return;
            }
            let sent = st.signal_sent;
            let was_typing = st.is_typing;
            st.is_typing = false;
            st.signal_sent = false;
            st.last_signal = None;
            (sent, was_typing)
        };
        if was_typing {
            self.notify();
        }

        if send {
            debug!(channel_id = %self.channel_id, "typing stop");
            if let Err(e) = self
                .ctx
                .transport
                .send_typing(self.channel_id, TypingSignal::Stop)
                .await
            {
                warn!(channel_id = %self.channel_id, error = %e, "stop typing signal failed");
            }
        }
    }

    /// Tear down without signalling (channel switch / unmount). Later calls
    /// to `start_typing` are ignored.
    pub fn dispose(&self) {
        self.stop_timer.cancel();
        let mut st = self.lock();
        st.disposed = true;
        st.is_typing = false;
    }

    fn notify(&self) {
        self.ctx.notify(ChangeEvent::TypingChanged {
            channel_id: self.channel_id,
            user_id: None,
        });
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Remote users currently typing in a channel.
#[derive(Debug, Clone)]
pub struct TypingUsers {
    ttl: Duration,
    expiry: HashMap<UserId, Instant>,
}

impl TypingUsers {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            expiry: HashMap::new(),
        }
    }

    /// Record a TYPING_START. Returns true if the user was not already typing.
    pub fn start(&mut self, user_id: UserId, now: Instant) -> bool {
        let was = self.is_typing_at(user_id, now);
        self.expiry.insert(user_id, now + self.ttl);
        !was
    }

    /// The user sent a message or otherwise stopped. Returns true if they were typing.
    pub fn stop(&mut self, user_id: UserId, now: Instant) -> bool {
        let was = self.is_typing_at(user_id, now);
        self.expiry.remove(&user_id);
        was
    }

    pub fn is_typing_at(&self, user_id: UserId, now: Instant) -> bool {
        self.expiry.get(&user_id).map(|&exp| exp > now).unwrap_or(false)
    }

    /// Prunes expired entries, then returns who is still typing.
    pub fn active_at(&mut self, now: Instant) -> Vec<UserId> {
        self.expiry.retain(|_, exp| *exp > now);
        let mut users: Vec<UserId> = self.expiry.keys().copied().collect();
        users.sort();
        users
    }
}
