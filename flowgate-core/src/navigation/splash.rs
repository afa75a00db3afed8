use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Minimum display time of the splash screen.
///
/// Purely cosmetic: the router waits on it in addition to the route being
/// ready, never instead of it. Cancelling ends the wait immediately.
#[derive(Debug, uniffi::Object)]
pub struct SplashTimer {
    deadline: Instant,
    cancelled_tx: watch::Sender<bool>,
}

#[uniffi::export(async_runtime = "tokio")]
impl SplashTimer {
    /// Starts the timer now.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(min_display: Duration) -> Self {
        let (cancelled_tx, _) = watch::channel(false);
        Self {
            deadline: Instant::now() + min_display,
            cancelled_tx,
        }
    }

    /// Resolves once the minimum display time has passed or the timer was cancelled.
    pub async fn elapsed(&self) {
        let mut cancelled_rx = self.cancelled_tx.subscribe();
        tokio::select! {
            () = tokio::time::sleep_until(self.deadline) => {}
            _ = cancelled_rx.wait_for(|cancelled| *cancelled) => {}
        }
    }

    /// Ends the wait early, e.g. when the app is resumed from background.
    pub fn cancel(&self) {
        self.cancelled_tx.send_replace(true);
    }

    /// Whether [`SplashTimer::elapsed`] would resolve immediately.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.cancelled_tx.borrow() || Instant::now() >= self.deadline
    }
}
