use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub const RUN_QUEUED_CHANNEL: &str = "ade_run_queued";

/// Best-effort low-latency wake-up for the worker loop's poll. Correctness
/// never depends on this firing — the loop always falls back to polling —
/// so a missed or duplicate notification is harmless, only a latency blip.
#[derive(Clone)]
pub struct WakeSignal {
    notify: Arc<Notify>,
    generation: Arc<AtomicU64>,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn fire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits until either `fire` is called or `timeout` elapses. Returns
    /// `true` if woken by a signal, `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Holds a `LISTEN ade_run_queued` connection, firing `signal` on every
/// notification and reconnecting with capped exponential backoff if the
/// connection drops. Ported from `ade_worker/notifications.py`'s
/// `RunQueueListener`.
pub struct RunQueueListener {
    database_url: String,
    signal: WakeSignal,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RunQueueListener {
    pub fn new(database_url: impl Into<String>, signal: WakeSignal) -> Self {
        Self {
            database_url: database_url.into(),
            signal,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(30),
        }
    }

    /// Runs forever, reconnecting on error. Intended to be spawned as a
    /// background task; cancel-safe via the caller dropping the JoinHandle.
    pub async fn run(self) {
        let mut backoff = self.backoff_base;
        loop {
            match self.listen_once().await {
                Ok(()) => {
                    backoff = self.backoff_base;
                }
                Err(err) => {
                    warn!(error = %err, "run queue listener disconnected, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.backoff_max);
                }
            }
        }
    }

    async fn listen_once(&self) -> ade_core::Result<()> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        listener
            .listen(RUN_QUEUED_CHANNEL)
            .await
            .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
        loop {
            let notification = listener
                .recv()
                .await
                .map_err(|err| ade_core::Error::Internal(err.to_string()))?;
            debug!(channel = notification.channel(), "wake signal received");
            self.signal.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_true_when_fired() {
        let signal = WakeSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.fire();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_returns_false_on_timeout() {
        let signal = WakeSignal::new();
        assert!(!signal.wait(Duration::from_millis(20)).await);
    }
}
