//! The Dispatcher fans upstream notifications out to subscriber queues.
//!
//! It sits between the feed adapter and the per-client handlers, providing:
//! - (channel, queue) registration with upstream LISTEN reference counting
//! - Non-blocking delivery: a full queue never holds up any other queue
//! - The configured slow-reader policy (neglect or evict)
//! - An optional connection-lost broadcast
//!
//! While the first LISTEN of a channel is in flight, every subscriber joining
//! that channel waits on the same upstream answer and is rolled back with it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::RelayError;
use crate::model::{Delivery, Notification};
use crate::network::{FeedHandle, FeedTransition};

use super::policy::{DispatcherConfig, SlowReaderPolicy};
use super::registry::{ChannelRegistry, Registration, Removal, Subscriber, SubscriberId};

/// Free slots a queue must keep, beyond the one being filled, under `Neglect`.
const NEGLECT_SAFETY_MARGIN: usize = 1;

/// Outcome of one `deliver` / broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: usize,
    pub evicted: usize,
}

/// Cumulative counters, plus current registry size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
    pub delivered: u64,
    pub skipped: u64,
    pub evicted: u64,
    pub channels: usize,
    pub subscriptions: usize,
}

enum Offer {
    Sent,
    Skipped,
    Evict,
    Gone,
}

/// Upstream answer to a LISTEN, cloneable so every waiter gets a copy.
#[derive(Debug, Clone)]
enum ListenOutcome {
    Listening,
    Refused(String),
    FeedClosed,
}

impl ListenOutcome {
    fn into_result(self) -> Result<(), RelayError> {
        match self {
            Self::Listening => Ok(()),
            Self::Refused(detail) => Err(RelayError::Upstream(detail)),
            Self::FeedClosed => Err(RelayError::ChannelClosed),
        }
    }
}

type PendingListen = Shared<BoxFuture<'static, ListenOutcome>>;

fn share_reply(reply: oneshot::Receiver<Result<(), RelayError>>) -> PendingListen {
    async move {
        match reply.await {
            Ok(Ok(())) => ListenOutcome::Listening,
            Ok(Err(RelayError::Upstream(detail))) => ListenOutcome::Refused(detail),
            Ok(Err(e)) => ListenOutcome::Refused(e.to_string()),
            Err(_) => ListenOutcome::FeedClosed,
        }
    }
    .boxed()
    .shared()
}

#[derive(Default)]
struct State {
    registry: ChannelRegistry,
    // First LISTEN per channel, kept until it succeeds or the channel empties
    pending: HashMap<String, PendingListen>,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    skipped: AtomicU64,
    evicted: AtomicU64,
}

/// Undoes one registration on drop unless disarmed, so a cancelled
/// `listen` leaves nothing behind.
struct Rollback<'a> {
    dispatcher: &'a Dispatcher,
    channel: &'a str,
    id: SubscriberId,
    armed: bool,
}

impl Rollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Rolling back subscriber {} on {}", self.id, self.channel);
            self.dispatcher.unlisten(self.channel, self.id);
        }
    }
}

pub struct Dispatcher {
    state: Mutex<State>,
    feed: FeedHandle,
    config: DispatcherConfig,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(feed: FeedHandle) -> Self {
        Self::with_config(feed, DispatcherConfig::default())
    }

    pub fn with_config(feed: FeedHandle, config: DispatcherConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            feed,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register `subscriber` on `channel`.
    ///
    /// Registering the same pair twice is a no-op. The first subscriber of a
    /// channel triggers an upstream LISTEN, and every subscriber that joins
    /// before the answer arrives waits for it too. If the upstream refuses,
    /// each of them is rolled back and gets the error. Dropping the returned
    /// future before it completes also rolls the registration back.
    pub async fn listen(&self, channel: &str, subscriber: &Subscriber) -> Result<(), RelayError> {
        let (pending, owned) = {
            let mut state = self.state.lock();
            match state.registry.insert(channel, subscriber) {
                Registration::Duplicate => {
                    debug!("Subscriber {} already listening on {}", subscriber.id(), channel);
                    (state.pending.get(channel).cloned(), false)
                }
                Registration::Added { first_for_channel } => {
                    if first_for_channel {
                        match self.feed.request_listen(channel) {
                            Ok(reply) => {
                                state.pending.insert(channel.to_string(), share_reply(reply));
                            }
                            Err(e) => {
                                state.registry.remove(channel, subscriber.id());
                                return Err(e);
                            }
                        }
                    }
                    (state.pending.get(channel).cloned(), true)
                }
            }
        };

        let Some(pending) = pending else {
            return Ok(());
        };
        // The call that added the pair owns its rollback
        let rollback = owned.then(|| Rollback {
            dispatcher: self,
            channel,
            id: subscriber.id(),
            armed: true,
        });

        match pending.clone().await.into_result() {
            Ok(()) => {
                if let Some(rollback) = rollback {
                    rollback.disarm();
                }
                self.settle(channel, &pending);
                debug!("Upstream listening on {} for subscriber {}", channel, subscriber.id());
                Ok(())
            }
            Err(e) => {
                warn!("Could not listen on {}: {}", channel, e);
                Err(e)
            }
        }
    }

    /// Remove one (channel, subscriber) pair. Absent pairs are ignored.
    /// The queue itself is left to its owner.
    pub fn unlisten(&self, channel: &str, id: SubscriberId) {
        let mut state = self.state.lock();
        if let Removal::Removed {
            channel_emptied: true,
        } = state.registry.remove(channel, id)
        {
            self.release_upstream(&mut state, channel);
        }
    }

    /// Fan one notification out to every subscriber of its channel.
    pub fn deliver(&self, notification: &Notification) -> DeliveryReport {
        let targets = self.state.lock().registry.snapshot(&notification.channel);
        if targets.is_empty() {
            trace!("No subscribers for {}", notification.channel);
            return DeliveryReport::default();
        }

        let report = self.offer_all(&targets, || {
            Delivery::Notification(notification.clone())
        });
        trace!(
            "Delivered on {}: {} sent, {} skipped, {} evicted",
            notification.channel,
            report.delivered,
            report.skipped,
            report.evicted
        );
        report
    }

    /// Send the connection-lost marker to every subscriber, if enabled.
    pub fn broadcast_connection_lost(&self) -> DeliveryReport {
        if !self.config.broadcast_on_connection_loss {
            return DeliveryReport::default();
        }

        let targets = self.state.lock().registry.snapshot_all();
        let report = self.offer_all(&targets, || Delivery::ConnectionLost);
        info!(
            "Broadcast connection loss to {} subscribers ({} skipped)",
            report.delivered, report.skipped
        );
        report
    }

    /// Hook for connectivity transitions; only a lost connection matters here.
    pub fn on_feed_state_change(&self, transition: &FeedTransition) {
        if let FeedTransition::Disconnected(_) = transition {
            self.broadcast_connection_lost();
        }
    }

    pub fn is_listening(&self, channel: &str, id: SubscriberId) -> bool {
        self.state.lock().registry.contains(channel, id)
    }

    pub fn subscribers_of(&self, channel: &str) -> HashSet<SubscriberId> {
        self.state.lock().registry.subscriber_ids(channel)
    }

    pub fn stats(&self) -> DispatcherStats {
        let (channels, subscriptions) = {
            let state = self.state.lock();
            (state.registry.channel_count(), state.registry.subscription_count())
        };
        DispatcherStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            channels,
            subscriptions,
        }
    }

    // A confirmed LISTEN needs no waiters any more. Failed ones stay so late
    // joiners see the failure, until the channel empties.
    fn settle(&self, channel: &str, pending: &PendingListen) {
        let mut state = self.state.lock();
        if state
            .pending
            .get(channel)
            .is_some_and(|current| current.ptr_eq(pending))
        {
            state.pending.remove(channel);
        }
    }

    // Runs without the registry lock; each queue is tried independently.
    fn offer_all<F>(&self, targets: &[Subscriber], make: F) -> DeliveryReport
    where
        F: Fn() -> Delivery,
    {
        let mut report = DeliveryReport::default();
        let mut evict = Vec::new();
        let mut gone = Vec::new();

        for subscriber in targets {
            match self.offer(subscriber, make()) {
                Offer::Sent => report.delivered += 1,
                Offer::Skipped => report.skipped += 1,
                Offer::Evict => evict.push(subscriber.id()),
                Offer::Gone => gone.push(subscriber.id()),
            }
        }

        if !evict.is_empty() {
            report.evicted = evict.len();
            for id in &evict {
                warn!("Evicting subscriber {}: queue full", id);
            }
            self.drop_subscribers(&evict);
        }
        if !gone.is_empty() {
            debug!("Dropping {} subscribers with closed queues", gone.len());
            self.drop_subscribers(&gone);
        }

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.counters
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);

        report
    }

    fn offer(&self, subscriber: &Subscriber, delivery: Delivery) -> Offer {
        let sender = subscriber.sender();

        match self.config.slow_reader_policy {
            SlowReaderPolicy::Neglect => {
                if sender.capacity() <= NEGLECT_SAFETY_MARGIN {
                    return Offer::Skipped;
                }
                match sender.try_send(delivery) {
                    Ok(()) => Offer::Sent,
                    Err(TrySendError::Full(_)) => Offer::Skipped,
                    Err(TrySendError::Closed(_)) => Offer::Gone,
                }
            }
            SlowReaderPolicy::Evict => match sender.try_send(delivery) {
                Ok(()) => Offer::Sent,
                Err(TrySendError::Full(_)) => Offer::Evict,
                Err(TrySendError::Closed(_)) => Offer::Gone,
            },
        }
    }

    fn drop_subscribers(&self, ids: &[SubscriberId]) {
        let mut state = self.state.lock();
        for id in ids {
            let emptied = state.registry.remove_subscriber(*id);
            for channel in emptied {
                self.release_upstream(&mut state, &channel);
            }
        }
    }

    // Called with the lock held so UNLISTENs queue in registry order.
    fn release_upstream(&self, state: &mut State, channel: &str) {
        state.pending.remove(channel);
        if let Err(e) = self.feed.unlisten(channel) {
            debug!("Could not unlisten {}: {}", channel, e);
        }
    }
}
