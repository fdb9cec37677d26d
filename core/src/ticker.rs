//! A cancellable fixed-interval task.

use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Fires `tick` every `period`, the first time one period after spawning.
///
/// Each firing runs as its own task, so a slow tick never delays the next
/// one. Cancelling is final and takes effect before the next firing.
pub struct PeriodicTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if token.is_cancelled() {
                            break;
                        }
                        tokio::spawn(tick());
                    }
                }
            }
            debug!("Periodic task stopped.");
        });

        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
