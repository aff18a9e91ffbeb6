//! # Gateway Lifecycle
//!
//! The controller's state machine: `Starting -> Listening -> Draining ->
//! Stopped`. One `GatewayLifecycle` value is shared across the serve loop,
//! the request pipeline, and the signal watcher via `Arc`.
//!
//! In-flight requests are counted by an RAII guard so the count can never
//! leak on early returns or panics unwinding through a handler. Draining
//! stops admission immediately (new pipeline requests see 503), then waits
//! a bounded grace period for the counter to reach zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Operating states, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Configuration loaded, listener not yet bound.
    Starting,
    /// Accepting and processing requests.
    Listening,
    /// Termination signal received; no new pipeline requests.
    Draining,
    /// Terminal.
    Stopped,
}

/// Shared lifecycle handle.
pub struct GatewayLifecycle {
    state: RwLock<LifecycleState>,
    in_flight: AtomicU64,
    drain_tx: watch::Sender<bool>,
}

impl GatewayLifecycle {
    pub fn new() -> Self {
        let (drain_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(LifecycleState::Starting),
            in_flight: AtomicU64::new(0),
            drain_tx,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state(), LifecycleState::Draining)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Listener bound; begin admitting requests.
    pub fn mark_listening(&self) {
        *self.state.write() = LifecycleState::Listening;
        info!("gateway listening");
    }

    /// Enter `Draining`. Idempotent: repeated signals are ignored. Wakes
    /// every receiver obtained through [`subscribe`](Self::subscribe).
    pub fn begin_drain(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, LifecycleState::Draining | LifecycleState::Stopped) {
                return;
            }
            *state = LifecycleState::Draining;
        }
        info!(in_flight = self.in_flight(), "draining started");
        let _ = self.drain_tx.send(true);
    }

    /// Terminal transition, after draining completes or is abandoned.
    pub fn mark_stopped(&self) {
        *self.state.write() = LifecycleState::Stopped;
        info!("gateway stopped");
    }

    /// A receiver that observes `true` once draining begins.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }

    /// Admit one pipeline request, or `None` when the gateway is no longer
    /// accepting. The returned guard decrements the in-flight count when
    /// dropped.
    pub fn start_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if !matches!(self.state(), LifecycleState::Listening) {
            return None;
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(RequestGuard {
            lifecycle: Arc::clone(self),
        })
    }

    /// Poll the in-flight counter until it reaches zero or `grace` expires.
    /// On expiry the remaining requests are abandoned and logged.
    pub async fn wait_for_drain(&self, grace: Duration) {
        let drained = timeout(grace, async {
            let check_interval = Duration::from_millis(100);
            loop {
                let in_flight = self.in_flight();
                if in_flight == 0 {
                    break;
                }
                debug!(in_flight, "waiting for in-flight requests");
                sleep(check_interval).await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("all in-flight requests completed"),
            Err(_) => warn!(
                abandoned = self.in_flight(),
                grace = %humantime::format_duration(grace),
                "grace period expired, abandoning in-flight requests"
            ),
        }
    }
}

impl Default for GatewayLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count when the request handler finishes, by
/// any exit path.
pub struct RequestGuard {
    lifecycle: Arc<GatewayLifecycle>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.lifecycle.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
