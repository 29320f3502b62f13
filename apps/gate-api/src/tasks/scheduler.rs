//! Fixed-interval background task owned by the process lifecycle.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A running periodic task. Dropping it does not stop the task; call [`stop`](Self::stop).
pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `body` every `period`, starting one period from now.
    ///
    /// A cycle that overruns delays the next one instead of bursting.
    ///
    /// Panics if `period` is zero.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut body: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        assert!(!period.is_zero(), "{name}: scheduled task period must be non-zero");
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // First tick fires immediately; skip it.

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = body() => {}
                        }
                    }
                }
            }
            tracing::debug!(task = name, "scheduled task exited");
        });

        tracing::info!(task = name, period_secs = period.as_secs(), "scheduled task started");
        Self { name, cancel, join }
    }

    /// Cancel the task (interrupting an in-flight cycle) and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            tracing::error!(task = self.name, error = %err, "scheduled task panicked");
        }
        tracing::info!(task = self.name, "scheduled task stopped");
    }
}
