//! Connection Supervisor - tracks upstream connectivity and gates new subscribers on it.

mod metrics;
mod token;

pub use metrics::SupervisorStats;
pub use token::{AdmissionToken, ConnectionState};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::network::{FeedHandle, FeedTransition};

/// Generation value meaning "no live token".
const NO_TOKEN: u64 = 0;

/// Owns the current admission token.
pub struct ConnectionSupervisor {
    /// Generation of the live token, `NO_TOKEN` while disconnected.
    /// Written only under `inner`, read lock-free.
    current: AtomicU64,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_generation: u64,
    stats: SupervisorStats,
}

impl ConnectionSupervisor {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(NO_TOKEN),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The live token, or `None` while the upstream is down. Never blocks.
    #[inline]
    pub fn current_token(&self) -> Option<AdmissionToken> {
        match self.current.load(Ordering::Acquire) {
            NO_TOKEN => None,
            generation => Some(AdmissionToken::new(generation)),
        }
    }

    /// Whether `token` is still the live one.
    #[inline]
    pub fn is_current(&self, token: AdmissionToken) -> bool {
        self.current.load(Ordering::Acquire) == token.generation()
    }

    pub fn state(&self) -> ConnectionState {
        if self.current_token().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        self.inner.lock().stats.clone()
    }

    /// Revoke the live token. A revoked generation is never issued again.
    pub fn invalidate(&self) {
        let _inner = self.inner.lock();
        self.current.store(NO_TOKEN, Ordering::Release);
    }

    /// Issue a token distinct from every earlier one.
    pub fn mint(&self) -> AdmissionToken {
        let mut inner = self.inner.lock();
        inner.last_generation += 1;
        let generation = inner.last_generation;
        self.current.store(generation, Ordering::Release);
        AdmissionToken::new(generation)
    }

    /// React to a connectivity transition from the feed adapter.
    pub fn on_feed_state_change(&self, transition: &FeedTransition) {
        match transition {
            FeedTransition::Connected => {
                let token = self.mint();
                self.inner.lock().stats.connects += 1;
                info!("Upstream connected, admitting clients (generation {})", token.generation());
            }
            FeedTransition::Disconnected(detail) => {
                self.invalidate();
                let mut inner = self.inner.lock();
                inner.stats.disconnects += 1;
                inner.stats.last_error = Some(detail.clone());
                warn!("Upstream lost, rejecting new clients: {}", detail);
            }
            FeedTransition::ReconnectAttemptFailed(detail) => {
                self.invalidate();
                let mut inner = self.inner.lock();
                inner.stats.failed_attempts += 1;
                inner.stats.last_error = Some(detail.clone());
                warn!("Upstream connection attempt failed: {}", detail);
            }
        }
    }

    /// Spawn the keepalive prober.
    ///
    /// Probe failures are ignored here; the feed adapter reports real
    /// disconnects through the ordinary transition path. The task ends once the
    /// feed is gone.
    pub fn start_keepalive(self: &Arc<Self>, feed: FeedHandle, every: Duration) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if feed.ping().is_err() {
                    debug!("Feed closed, stopping keepalive");
                    return;
                }
                debug!("Keepalive probe sent (upstream {})", supervisor.state());
            }
        })
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
