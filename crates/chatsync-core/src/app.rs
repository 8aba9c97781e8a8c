//! The coordinator: owns the channel store and the message queue, and is the
//! single entry point for local actions and push events.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    channel::ChannelData,
    context::{ChangeEvent, Context},
    domain::{ChannelId, Nonce},
    errors::Error,
    gateway::{GatewayEvent, RawDispatch},
    model::{MessageDraft, QueueStatus, QueuedMessage},
    permissions::Permissions,
    queue::{Delivery, FaultMode, MessageQueue, INJECTED_FAILURE_REASON},
    store::ChannelStore,
    Result,
};

/// Everything mutable, behind one lock. The lock is never held across a
/// transport call.
pub struct SyncState {
    pub channels: ChannelStore,
    pub queue: MessageQueue,
    last_sequence: Option<u64>,
}

pub struct App {
    ctx: Arc<Context>,
    state: Mutex<SyncState>,
}

impl App {
    pub fn new(ctx: Arc<Context>) -> Self {
        let state = SyncState {
            channels: ChannelStore::new(Arc::clone(&ctx)),
            queue: MessageQueue::new(Arc::clone(&ctx)),
            last_sequence: None,
        };
        Self {
            ctx,
            state: Mutex::new(state),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.ctx.subscribe()
    }

    /// Read (or tweak) the local view. Keep the guard short-lived.
    pub async fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().await
    }

    pub async fn add_channel(&self, data: ChannelData) {
        self.state.lock().await.channels.add(data);
    }

    pub async fn add_channels<I>(&self, channels: I)
    where
        I: IntoIterator<Item = ChannelData>,
    {
        self.state.lock().await.channels.add_all(channels);
    }

    /// Remove a channel together with its queue entries.
    pub async fn remove_channel(&self, channel_id: ChannelId) -> bool {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.queue.remove_channel(&mut st.channels, channel_id).is_some()
    }

    pub async fn permissions(&self, channel_id: ChannelId) -> Option<Permissions> {
        let st = self.state.lock().await;
        st.channels.get(channel_id).map(|c| c.permissions())
    }

    /// Queue a draft and deliver it.
    ///
    /// Returns `Err` only when the draft is refused up front; nothing is
    /// queued in that case. Once queued, the outcome is reported through the
    /// returned entry's status (and the change stream), never as an error.
    pub async fn send_message(&self, channel_id: ChannelId, draft: MessageDraft) -> Result<QueuedMessage> {
        let fault = FaultMode::from_experiments(self.ctx.experiments.as_ref());

        let queued = {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;

            let channel = st
                .channels
                .get(channel_id)
                .ok_or(Error::UnknownChannel(channel_id))?;
            if !channel.has_permission(Permissions::SEND_MESSAGES) {
                return Err(Error::MissingPermission("SEND_MESSAGES"));
            }
            if !draft.files.is_empty() && !channel.has_permission(Permissions::ATTACH_FILES) {
                return Err(Error::MissingPermission("ATTACH_FILES"));
            }
            let max = self.ctx.config.max_attachments;
            if draft.files.len() > max {
                return Err(Error::TooManyAttachments {
                    max,
                    attempted: draft.files.len(),
                });
            }
            // The injected-failure path skips the empty check, like the
            // experiment it reproduces.
            if draft.is_empty() && fault != Some(FaultMode::Fail) {
                return Err(Error::EmptyMessage);
            }
            let author = self
                .ctx
                .identity
                .current_account()
                .ok_or(Error::NotAuthenticated)?;

            let queued = st.queue.add(&mut st.channels, channel_id, author, draft)?;

            match fault {
                Some(FaultMode::Fail) => {
                    info!(%channel_id, nonce = %queued.nonce, "message queue experiment: failing send");
                    st.queue
                        .fail(&mut st.channels, queued.nonce, INJECTED_FAILURE_REASON);
                    return Ok(snapshot(st, queued));
                }
                Some(FaultMode::Suppress) => {
                    info!(%channel_id, nonce = %queued.nonce, "message queue experiment: send suppressed");
                    return Ok(queued);
                }
                None => queued,
            }
        };

        Ok(self.deliver(queued).await)
    }

    /// Resend a failed entry with the same nonce and content.
    pub async fn retry(&self, nonce: Nonce) -> Option<QueuedMessage> {
        let queued = {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            st.queue.begin_retry(&mut st.channels, nonce)?
        };
        Some(self.deliver(queued).await)
    }

    pub async fn discard(&self, nonce: Nonce) -> Option<QueuedMessage> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.queue.discard(&mut st.channels, nonce)
    }

    pub async fn failed(&self) -> Vec<QueuedMessage> {
        let st = self.state.lock().await;
        st.queue.failed(&st.channels).into_iter().cloned().collect()
    }

    pub async fn pending(&self) -> Vec<QueuedMessage> {
        let st = self.state.lock().await;
        st.queue.pending(&st.channels).into_iter().cloned().collect()
    }

    pub async fn start_typing(&self, channel_id: ChannelId) {
        let indicator = {
            let st = self.state.lock().await;
            st.channels.get(channel_id).map(|c| c.typing_indicator())
        };
        if let Some(indicator) = indicator {
            indicator.start_typing().await;
        }
    }

    pub async fn stop_typing(&self, channel_id: ChannelId) {
        let indicator = {
            let st = self.state.lock().await;
            st.channels.get(channel_id).map(|c| c.typing_indicator())
        };
        if let Some(indicator) = indicator {
            indicator.stop_typing().await;
        }
    }

    /// Apply one gateway frame. Returns false when the frame was skipped
    /// (not a dispatch, or already applied according to its sequence).
    pub async fn handle_dispatch(&self, raw: &RawDispatch) -> Result<bool> {
        let event = match GatewayEvent::from_dispatch(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(t = ?raw.t, error = %e, "malformed dispatch dropped");
                return Err(e);
            }
        };

        let mut st = self.state.lock().await;
        if let Some(seq) = raw.s {
            let is_ready = matches!(event, GatewayEvent::Ready(_));
            if let (Some(last), false) = (st.last_sequence, is_ready) {
                if seq <= last {
                    debug!(seq, last, "duplicate dispatch skipped");
                    return Ok(false);
                }
            }
            st.last_sequence = Some(seq);
        }
        self.apply(&mut st, event);
        Ok(true)
    }

    /// Apply an already decoded event, bypassing sequence tracking.
    pub async fn handle_event(&self, event: GatewayEvent) {
        let mut st = self.state.lock().await;
        self.apply(&mut st, event);
    }

    fn apply(&self, st: &mut SyncState, event: GatewayEvent) {
        let me = self.ctx.identity.current_account().map(|u| u.id);

        match event {
            GatewayEvent::Ready(ready) => {
                info!(channels = ready.private_channels.len(), "ready");
                st.channels.add_all(ready.private_channels);
            }
            GatewayEvent::ChannelCreate(data) | GatewayEvent::ChannelUpdate(data) => {
                st.channels.add(data);
            }
            GatewayEvent::ChannelDelete(del) => {
                st.queue.remove_channel(&mut st.channels, del.id);
            }
            GatewayEvent::MessageCreate(message) => {
                let message = *message;
                let nonce = message.echoed_nonce();
                st.queue.reconcile(&mut st.channels, nonce, message);
            }
            GatewayEvent::MessageUpdate(update) => {
                if let Some(channel) = st.channels.get_mut(update.channel_id) {
                    channel.update_message(&update);
                }
            }
            GatewayEvent::MessageDelete(del) => {
                if let Some(channel) = st.channels.get_mut(del.channel_id) {
                    channel.remove_message(del.id);
                }
            }
            GatewayEvent::MessageDeleteBulk(del) => {
                if let Some(channel) = st.channels.get_mut(del.channel_id) {
                    for id in del.ids {
                        channel.remove_message(id);
                    }
                }
            }
            GatewayEvent::ReactionAdd(r) => {
                let by_me = Some(r.user_id) == me;
                if let Some(channel) = st.channels.get_mut(r.channel_id) {
                    channel.modify_message(r.message_id, |m| m.add_reaction(&r.emoji, by_me));
                }
            }
            GatewayEvent::ReactionRemove(r) => {
                let by_me = Some(r.user_id) == me;
                if let Some(channel) = st.channels.get_mut(r.channel_id) {
                    channel.modify_message(r.message_id, |m| m.remove_reaction(&r.emoji, by_me));
                }
            }
            GatewayEvent::TypingStart(t) => {
                if Some(t.user_id) == me {
                    return;
                }
                if let Some(channel) = st.channels.get_mut(t.channel_id) {
                    channel.user_started_typing(t.user_id);
                }
            }
            GatewayEvent::Unknown(t) => {
                debug!(t = %t, "unhandled dispatch");
            }
        }
    }

    async fn deliver(&self, queued: QueuedMessage) -> QueuedMessage {
        let delivery = MessageQueue::send(&self.ctx, &queued).await;

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let accepted = delivery == Delivery::Accepted;
        st.queue.settle(&mut st.channels, queued.nonce, delivery);

        if let Some(current) = st.queue.get(&st.channels, queued.nonce) {
            return current.clone();
        }
        // Echo already reconciled it.
        let status = if accepted {
            QueueStatus::Sent
        } else {
            queued.status.clone()
        };
        QueuedMessage { status, ..queued }
    }
}

fn snapshot(st: &SyncState, queued: QueuedMessage) -> QueuedMessage {
    st.queue
        .get(&st.channels, queued.nonce)
        .cloned()
        .unwrap_or(queued)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        channel::ChannelType,
        context::testing::{context, context_with, me, FakeTransport},
        domain::{MessageId, User, UserId},
        model::{message::tests::message_json, Emoji, MessageBase, MessageKey, PendingFile},
        ports::{StaticExperiments, TypingSignal},
        queue::MESSAGE_QUEUE_EXPERIMENT,
    };

    const GENERAL: u64 = 1;

    async fn app_with(transport: Arc<FakeTransport>, experiments: StaticExperiments) -> App {
        let app = App::new(context_with(transport, experiments));
        let mut data = ChannelData::new(GENERAL, ChannelType::GuildText);
        data.name = Some("general".into());
        app.add_channel(data).await;
        app
    }

    async fn app(transport: Arc<FakeTransport>) -> App {
        app_with(transport, StaticExperiments::default()).await
    }

    fn files(n: usize) -> Vec<PendingFile> {
        (0..n)
            .map(|i| PendingFile::new(format!("f{i}.txt"), vec![i as u8]))
            .collect()
    }

    async fn message_count(app: &App) -> usize {
        app.state()
            .await
            .channels
            .get(ChannelId::from(GENERAL))
            .map(|c| c.message_count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn send_then_echo_reconciles() {
        let transport = Arc::new(FakeTransport::default());
        let app = app(transport.clone()).await;

        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("hello"))
            .await
            .unwrap();
        assert_eq!(q.status, QueueStatus::Sent);
        assert_eq!(transport.send_count(), 1);
        assert_eq!(message_count(&app).await, 1);

        let mut echo = message_json(1_000_000_000_000_000_000, GENERAL, "hello");
        echo["author"] = json!({"id": "7", "username": "me"});
        echo["nonce"] = json!(q.nonce.to_string());
        let applied = app
            .handle_dispatch(&RawDispatch::dispatch("MESSAGE_CREATE", 1, echo))
            .await
            .unwrap();
        assert!(applied);

        let st = app.state().await;
        let ch = st.channels.get(ChannelId::from(GENERAL)).unwrap();
        assert_eq!(ch.message_count(), 1);
        assert!(ch.queued(q.nonce).is_none());
        assert_eq!(
            ch.messages()[0].key(),
            MessageKey::Id(MessageId::from(1_000_000_000_000_000_000))
        );
        assert!(st.queue.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_not_returned() {
        let transport = Arc::new(FakeTransport::failing("HTTP 500"));
        let app = app(transport).await;

        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("hello"))
            .await
            .unwrap();
        assert!(q.is_failed());
        assert_eq!(q.content, "hello");
        assert_eq!(app.failed().await.len(), 1);
        assert_eq!(message_count(&app).await, 1);
    }

    #[tokio::test]
    async fn retry_resends_with_same_nonce() {
        let transport = Arc::new(FakeTransport::failing("offline"));
        let app = app(transport.clone()).await;
        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("again"))
            .await
            .unwrap();

        *transport.fail_with.lock().unwrap() = None;
        let retried = app.retry(q.nonce).await.unwrap();
        assert_eq!(retried.status, QueueStatus::Sent);
        assert_eq!(retried.nonce, q.nonce);

        let sends = transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].1, sends[1].1);
        assert_eq!(sends[1].2.body().content, "again");
    }

    #[tokio::test]
    async fn empty_drafts_never_queue() {
        let transport = Arc::new(FakeTransport::default());
        let app = app(transport.clone()).await;

        for content in ["", "   ", "\n\n", " \t\n "] {
            let err = app
                .send_message(ChannelId::from(GENERAL), MessageDraft::text(content))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::EmptyMessage));
        }
        assert_eq!(message_count(&app).await, 0);
        assert!(app.state().await.queue.is_empty());
        assert_eq!(transport.send_count(), 0);
    }

    #[tokio::test]
    async fn files_alone_are_enough() {
        let app = app(Arc::new(FakeTransport::default())).await;
        let q = app
            .send_message(
                ChannelId::from(GENERAL),
                MessageDraft::text("").with_files(files(1)),
            )
            .await
            .unwrap();
        assert_eq!(q.files.len(), 1);
    }

    #[tokio::test]
    async fn too_many_attachments_rejected_before_queueing() {
        let transport = Arc::new(FakeTransport::default());
        let app = app(transport.clone()).await;

        let err = app
            .send_message(
                ChannelId::from(GENERAL),
                MessageDraft::text("lots").with_files(files(11)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyAttachments {
                max: 10,
                attempted: 11
            }
        ));
        assert_eq!(err.user_notice(), "You can only attach 10 files at once.");
        assert_eq!(message_count(&app).await, 0);
        assert_eq!(transport.send_count(), 0);
    }

    #[tokio::test]
    async fn permissions_are_checked_independently() {
        let app = app(Arc::new(FakeTransport::default())).await;
        let mut data = ChannelData::new(2u64, ChannelType::GuildText);
        data.permissions = Some(Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES);
        app.add_channel(data).await;
        let mut data = ChannelData::new(3u64, ChannelType::GuildText);
        data.permissions = Some(Permissions::VIEW_CHANNEL);
        app.add_channel(data).await;

        assert!(app
            .send_message(ChannelId::from(2), MessageDraft::text("text only"))
            .await
            .is_ok());
        let err = app
            .send_message(
                ChannelId::from(2),
                MessageDraft::text("with file").with_files(files(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingPermission("ATTACH_FILES")));

        let err = app
            .send_message(ChannelId::from(3), MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingPermission("SEND_MESSAGES")));

        let err = app
            .send_message(ChannelId::from(99), MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn signed_out_sends_are_refused() {
        let transport = Arc::new(FakeTransport::default());
        let ctx = Arc::new(Context::new(
            Arc::new(crate::config::Config::default()),
            transport,
            Arc::new(crate::ports::AccountSlot::default()),
            Arc::new(StaticExperiments::default()),
        ));
        let app = App::new(ctx);
        app.add_channel(ChannelData::new(GENERAL, ChannelType::GuildText))
            .await;
        let err = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
        assert_eq!(message_count(&app).await, 0);
    }

    #[tokio::test]
    async fn fail_experiment_skips_transport() {
        let transport = Arc::new(FakeTransport::default());
        let app = app_with(
            transport.clone(),
            StaticExperiments::default().with(MESSAGE_QUEUE_EXPERIMENT, 2),
        )
        .await;

        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("hello"))
            .await
            .unwrap();
        assert_eq!(q.failure_reason(), Some(INJECTED_FAILURE_REASON));
        assert_eq!(q.content, "hello");
        assert_eq!(transport.send_count(), 0);
    }

    // Whether the injected-failure mode should also skip the empty-content
    // check is unsettled. These two tests pin the current behaviour: the
    // Fail mode queues empty drafts, the Suppress mode does not.
    #[tokio::test]
    async fn fail_experiment_queues_empty_draft() {
        let transport = Arc::new(FakeTransport::default());
        let app = app_with(
            transport.clone(),
            StaticExperiments::default().with(MESSAGE_QUEUE_EXPERIMENT, 2),
        )
        .await;

        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("  "))
            .await
            .unwrap();
        assert!(q.is_failed());
        assert_eq!(message_count(&app).await, 1);
    }

    #[tokio::test]
    async fn suppress_experiment_keeps_empty_guard() {
        let app = app_with(
            Arc::new(FakeTransport::default()),
            StaticExperiments::default().with(MESSAGE_QUEUE_EXPERIMENT, 1),
        )
        .await;
        let err = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text(""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyMessage));
    }

    #[tokio::test]
    async fn suppress_experiment_never_sends() {
        let transport = Arc::new(FakeTransport::default());
        let app = app_with(
            transport.clone(),
            StaticExperiments::default().with(MESSAGE_QUEUE_EXPERIMENT, 1),
        )
        .await;

        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("hello"))
            .await
            .unwrap();
        assert_eq!(q.status, QueueStatus::Sending);
        assert_eq!(transport.send_count(), 0);
        assert_eq!(app.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn fault_injection_never_bypasses_capacity() {
        let app = app_with(
            Arc::new(FakeTransport::default()),
            StaticExperiments::default().with(MESSAGE_QUEUE_EXPERIMENT, 2),
        )
        .await;
        let err = app
            .send_message(
                ChannelId::from(GENERAL),
                MessageDraft::text("x").with_files(files(11)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyAttachments { .. }));
    }

    #[tokio::test]
    async fn discard_removes_failed_entry() {
        let app = app(Arc::new(FakeTransport::failing("offline"))).await;
        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("bye"))
            .await
            .unwrap();
        assert!(app.discard(q.nonce).await.is_some());
        assert_eq!(message_count(&app).await, 0);
        assert!(app.failed().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_sequence_is_skipped() {
        let app = app(Arc::new(FakeTransport::default())).await;
        let create = RawDispatch::dispatch("MESSAGE_CREATE", 5, message_json(10, GENERAL, "hi"));
        assert!(app.handle_dispatch(&create).await.unwrap());
        assert!(!app.handle_dispatch(&create).await.unwrap());

        let older = RawDispatch::dispatch("MESSAGE_CREATE", 4, message_json(11, GENERAL, "old"));
        assert!(!app.handle_dispatch(&older).await.unwrap());
        assert_eq!(message_count(&app).await, 1);

        // READY starts a new session.
        let ready = RawDispatch::dispatch(
            "READY",
            1,
            json!({"user": {"id": "7", "username": "me"}, "private_channels": []}),
        );
        assert!(app.handle_dispatch(&ready).await.unwrap());
        assert!(app.handle_dispatch(&older).await.unwrap());
        assert_eq!(message_count(&app).await, 2);
    }

    #[tokio::test]
    async fn message_update_twice_is_idempotent() {
        let app = app(Arc::new(FakeTransport::default())).await;
        app.handle_dispatch(&RawDispatch::dispatch(
            "MESSAGE_CREATE",
            1,
            message_json(10, GENERAL, "hi"),
        ))
        .await
        .unwrap();

        let update = json!({
            "id": "10",
            "channel_id": "1",
            "content": "hi (edited)",
            "edited_timestamp": "2024-05-01T12:10:00+00:00"
        });
        let mut rx = app.subscribe();
        app.handle_event(
            GatewayEvent::from_dispatch(&RawDispatch::dispatch("MESSAGE_UPDATE", 2, update.clone()))
                .unwrap()
                .unwrap(),
        )
        .await;
        let once = app
            .state()
            .await
            .channels
            .get(ChannelId::from(GENERAL))
            .unwrap()
            .message(MessageId::from(10))
            .cloned()
            .unwrap();

        app.handle_event(
            GatewayEvent::from_dispatch(&RawDispatch::dispatch("MESSAGE_UPDATE", 3, update))
                .unwrap()
                .unwrap(),
        )
        .await;
        let twice = app
            .state()
            .await
            .channels
            .get(ChannelId::from(GENERAL))
            .unwrap()
            .message(MessageId::from(10))
            .cloned()
            .unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.content, "hi (edited)");
        assert!(twice.edited_timestamp.is_some());
        assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::MessageUpdated { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deletes_and_reactions() {
        let app = app(Arc::new(FakeTransport::default())).await;
        for (s, id) in [(1, 10u64), (2, 11), (3, 12)] {
            app.handle_dispatch(&RawDispatch::dispatch(
                "MESSAGE_CREATE",
                s,
                message_json(id, GENERAL, "m"),
            ))
            .await
            .unwrap();
        }

        let react = |s: u64, t: &str, user: &str| {
            RawDispatch::dispatch(
                t,
                s,
                json!({"user_id": user, "channel_id": "1", "message_id": "10", "emoji": {"name": "🔥"}}),
            )
        };
        app.handle_dispatch(&react(4, "MESSAGE_REACTION_ADD", "7")).await.unwrap();
        app.handle_dispatch(&react(5, "MESSAGE_REACTION_ADD", "9")).await.unwrap();
        app.handle_dispatch(&react(6, "MESSAGE_REACTION_REMOVE", "9")).await.unwrap();
        {
            let st = app.state().await;
            let m = st
                .channels
                .get(ChannelId::from(GENERAL))
                .unwrap()
                .message(MessageId::from(10))
                .unwrap();
            let r = m.reaction(&Emoji::unicode("🔥")).unwrap();
            assert_eq!(r.count, 1);
            assert!(r.me);
        }

        app.handle_dispatch(&RawDispatch::dispatch(
            "MESSAGE_DELETE",
            7,
            json!({"id": "10", "channel_id": "1"}),
        ))
        .await
        .unwrap();
        app.handle_dispatch(&RawDispatch::dispatch(
            "MESSAGE_DELETE_BULK",
            8,
            json!({"ids": ["11", "12"], "channel_id": "1"}),
        ))
        .await
        .unwrap();
        assert_eq!(message_count(&app).await, 0);
    }

    #[tokio::test]
    async fn channel_events_and_queue_purge() {
        let app = app(Arc::new(FakeTransport::failing("offline"))).await;
        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("stuck"))
            .await
            .unwrap();

        app.handle_dispatch(&RawDispatch::dispatch(
            "CHANNEL_CREATE",
            1,
            json!({"id": "2", "type": 1, "recipients": [{"id": "9", "username": "bob"}]}),
        ))
        .await
        .unwrap();
        app.handle_dispatch(&RawDispatch::dispatch("CHANNEL_DELETE", 2, json!({"id": "1"})))
            .await
            .unwrap();

        let st = app.state().await;
        assert_eq!(st.channels.count(), 1);
        assert!(!st.queue.contains(q.nonce));
        assert_eq!(
            st.channels.get(ChannelId::from(2)).unwrap().display_name(),
            "bob"
        );
    }

    async fn typing_users(app: &App) -> Vec<UserId> {
        app.state()
            .await
            .channels
            .get_mut(ChannelId::from(GENERAL))
            .map(|c| c.typing_users())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn remote_typing_ignores_self_and_expires() {
        let app = app(Arc::new(FakeTransport::default())).await;
        let typing = |s: u64, user: &str| {
            RawDispatch::dispatch("TYPING_START", s, json!({"channel_id": "1", "user_id": user}))
        };
        app.handle_dispatch(&typing(1, "7")).await.unwrap();
        app.handle_dispatch(&typing(2, "9")).await.unwrap();

        assert_eq!(typing_users(&app).await, vec![UserId::from(9)]);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(typing_users(&app).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn local_typing_through_app() {
        let transport = Arc::new(FakeTransport::default());
        let app = app(transport.clone()).await;
        for _ in 0..3 {
            app.start_typing(ChannelId::from(GENERAL)).await;
        }
        app.stop_typing(ChannelId::from(GENERAL)).await;
        assert_eq!(transport.typing_signals(TypingSignal::Start), 1);
        assert_eq!(transport.typing_signals(TypingSignal::Stop), 1);
    }

    #[tokio::test]
    async fn queued_author_is_current_account() {
        let app = app(Arc::new(FakeTransport::default())).await;
        let q = app
            .send_message(ChannelId::from(GENERAL), MessageDraft::text("me"))
            .await
            .unwrap();
        let expected: User = me();
        assert_eq!(q.author, expected);
    }

    #[tokio::test]
    async fn unknown_channel_queries_are_empty() {
        let app = App::new(context(Arc::new(FakeTransport::default())));
        assert!(app.permissions(ChannelId::from(1)).await.is_none());
        assert!(!app.remove_channel(ChannelId::from(1)).await);
    }
}
