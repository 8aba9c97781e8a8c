use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    config::Config,
    domain::{ChannelId, UserId},
    model::MessageKey,
    ports::{AccountSlot, ExperimentEvaluator, IdentityProvider, StaticExperiments, Transport},
    snowflake::SnowflakeGenerator,
};

/// One effective change to the local view. Subscribers re-read what they need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    ChannelAdded(ChannelId),
    ChannelUpdated(ChannelId),
    ChannelRemoved(ChannelId),
    MessageAdded { channel_id: ChannelId, key: MessageKey },
    MessageUpdated { channel_id: ChannelId, key: MessageKey },
    MessageRemoved { channel_id: ChannelId, key: MessageKey },
    /// A queued entry was replaced by its confirmed counterpart.
    MessageReconciled { channel_id: ChannelId, key: MessageKey },
    QueueStatusChanged { channel_id: ChannelId, key: MessageKey },
    TypingChanged { channel_id: ChannelId, user_id: Option<UserId> },
}

/// Shared dependencies, built once and handed to every component.
pub struct Context {
    pub config: Arc<Config>,
    pub transport: Arc<dyn Transport>,
    pub identity: Arc<dyn IdentityProvider>,
    pub experiments: Arc<dyn ExperimentEvaluator>,
    pub snowflakes: SnowflakeGenerator,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Context {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn IdentityProvider>,
        experiments: Arc<dyn ExperimentEvaluator>,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            transport,
            identity,
            experiments,
            snowflakes: SnowflakeGenerator::default(),
            changes,
        }
    }

    /// Context with config-driven experiments and a fixed account.
    pub fn with_account(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        account: AccountSlot,
    ) -> Self {
        let experiments = StaticExperiments::new(config.experiments.clone());
        Self::new(config, transport, Arc::new(account), Arc::new(experiments))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the unit tests of several modules.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        domain::{Nonce, User},
        errors::Error,
        ports::{OutgoingPayload, TypingSignal},
        Result,
    };

    #[derive(Default)]
    pub struct FakeTransport {
        pub sends: Mutex<Vec<(ChannelId, Nonce, OutgoingPayload)>>,
        pub typing: Mutex<Vec<(ChannelId, TypingSignal)>>,
        pub fail_with: Mutex<Option<String>>,
    }

    impl FakeTransport {
        pub fn failing(reason: &str) -> Self {
            let t = Self::default();
            *t.fail_with.lock().unwrap() = Some(reason.to_string());
            t
        }

        pub fn send_count(&self) -> usize {
            self.sends.lock().unwrap().len()
        }

        pub fn typing_signals(&self, signal: TypingSignal) -> usize {
            self.typing
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, s)| *s == signal)
                .count()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_message(
            &self,
            channel_id: ChannelId,
            nonce: Nonce,
            payload: OutgoingPayload,
        ) -> Result<()> {
            self.sends.lock().unwrap().push((channel_id, nonce, payload));
            match self.fail_with.lock().unwrap().clone() {
                Some(reason) => Err(Error::External(reason)),
                None => Ok(()),
            }
        }

        async fn send_typing(&self, channel_id: ChannelId, signal: TypingSignal) -> Result<()> {
            self.typing.lock().unwrap().push((channel_id, signal));
            Ok(())
        }
    }

    pub fn me() -> User {
        User::new(7u64, "me")
    }

    pub fn context_with(transport: Arc<FakeTransport>, experiments: StaticExperiments) -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(Config::default()),
            transport,
            Arc::new(AccountSlot::new(Some(me()))),
            Arc::new(experiments),
        ))
    }

    pub fn context(transport: Arc<FakeTransport>) -> Arc<Context> {
        context_with(transport, StaticExperiments::default())
    }
}
