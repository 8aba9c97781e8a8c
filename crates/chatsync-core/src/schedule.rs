use std::{future::Future, pin::Pin, sync::Arc, sync::Mutex, time::Duration};

use tokio_util::sync::CancellationToken;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type ActionFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// A delayed action that can be re-armed or cancelled.
///
/// `reset()` pushes the deadline out by `delay` from now, so a burst of
/// resets fires the action once, `delay` after the last one. Dropping the
/// task cancels any pending run.
pub struct ScheduledTask {
    delay: Duration,
    action: ActionFn,
    pending: Mutex<Option<CancellationToken>>,
}

impl ScheduledTask {
    pub fn new<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            action: Arc::new(move || Box::pin(action()) as BoxFuture),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel any pending run and schedule a fresh one. Needs a tokio runtime.
    pub fn reset(&self) {
        let cancel = CancellationToken::new();
        if let Some(old) = self.slot().replace(cancel.clone()) {
            old.cancel();
        }

        let action = Arc::clone(&self.action);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
              _ = cancel.cancelled() => {}
              _ = tokio::time::sleep(delay) => {
                // Mark as no longer pending before running.
                cancel.cancel();
                (action)().await;
              }
            }
        });
    }

    pub fn cancel(&self) {
        if let Some(tok) = self.slot().take() {
            tok.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|tok| !tok.is_cancelled())
            .unwrap_or(false)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
