//! Liveness watchdog for the background maintenance loop
//!
//! The loop pings the watchdog; if no ping arrives within twice the configured
//! interval the failure callback runs. This only detects a caller that stopped
//! pinging altogether, not a task that is stuck while still pinging.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct Watchdog {
    interval: Duration,
    last_ping: Mutex<Instant>,
    /// Shared by every loop started since the last `stop`
    stop: Mutex<CancellationToken>,
}

impl Watchdog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: Mutex::new(Instant::now()),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that the monitored loop is alive
    pub fn ping(&self) {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn since_last_ping(&self) -> Duration {
        self.last_ping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Start monitoring until `cancel` fires or [`stop`](Self::stop) is called.
    ///
    /// `on_failure` runs once per detected timeout; monitoring then continues
    /// and another full timeout must pass before it runs again. A stopped
    /// watchdog can be started again.
    pub fn start<F>(self: &Arc<Self>, cancel: &CancellationToken, on_failure: F) -> JoinHandle<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ping();

        let stop = {
            let mut slot = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_cancelled() {
                *slot = CancellationToken::new();
            }
            slot.clone()
        };

        let watchdog = Arc::clone(self);
        let cancel = cancel.clone();
        let timeout = self.interval * 2;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watchdog.interval / 2);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let silent_for = watchdog.since_last_ping();
                if silent_for > timeout {
                    error!(
                        silent_ms = silent_for.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "watchdog timeout: maintenance loop stopped responding"
                    );
                    on_failure();
                    watchdog.ping();
                }
            }
            debug!("watchdog stopped");
        })
    }

    /// Stop monitoring; safe to call more than once
    pub fn stop(&self) {
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Ping `watchdog` every interval until `cancel` fires
pub fn spawn_heartbeat(watchdog: Arc<Watchdog>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(watchdog.interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => watchdog.ping(),
            }
        }
    })
}
