//! Channel registry: channel name -> subscriber queues, plus the reverse index.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::model::Delivery;

/// Smallest queue a subscriber can usefully consume from.
pub const MIN_QUEUE_CAPACITY: usize = 2;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

pub type SubscriberId = u64;

/// Producer half of one client's queue, tagged with a process-unique id.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Delivery>,
}

impl Subscriber {
    /// Allocate a bounded queue. The caller keeps the receiver and hands the
    /// subscriber to the dispatcher.
    pub fn queue(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(MIN_QUEUE_CAPACITY));
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, sender }, receiver)
    }

    #[inline]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    #[inline]
    pub(crate) fn sender(&self) -> &mpsc::Sender<Delivery> {
        &self.sender
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added { first_for_channel: bool },
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed { channel_emptied: bool },
    NotPresent,
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, HashMap<SubscriberId, Subscriber>>,
    memberships: HashMap<SubscriberId, HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: &str, subscriber: &Subscriber) -> Registration {
        let set = self.channels.entry(channel.to_string()).or_default();
        if set.contains_key(&subscriber.id) {
            return Registration::Duplicate;
        }

        let first_for_channel = set.is_empty();
        set.insert(subscriber.id, subscriber.clone());
        self.memberships
            .entry(subscriber.id)
            .or_default()
            .insert(channel.to_string());

        Registration::Added { first_for_channel }
    }

    pub fn remove(&mut self, channel: &str, id: SubscriberId) -> Removal {
        let Some(set) = self.channels.get_mut(channel) else {
            return Removal::NotPresent;
        };
        if set.remove(&id).is_none() {
            return Removal::NotPresent;
        }

        let channel_emptied = set.is_empty();
        if channel_emptied {
            self.channels.remove(channel);
        }

        if let Some(owned) = self.memberships.get_mut(&id) {
            owned.remove(channel);
            if owned.is_empty() {
                self.memberships.remove(&id);
            }
        }

        Removal::Removed { channel_emptied }
    }

    /// Drop every registration of `id`. Returns the channels left without subscribers.
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> Vec<String> {
        let Some(owned) = self.memberships.remove(&id) else {
            return Vec::new();
        };

        let mut emptied = Vec::new();
        for channel in owned {
            if let Some(set) = self.channels.get_mut(&channel) {
                set.remove(&id);
                if set.is_empty() {
                    self.channels.remove(&channel);
                    emptied.push(channel);
                }
            }
        }
        emptied
    }

    /// Copy of the subscribers of `channel`, taken so delivery can run unlocked.
    pub fn snapshot(&self, channel: &str) -> Vec<Subscriber> {
        self.channels
            .get(channel)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One entry per distinct subscriber, whatever the number of its channels.
    pub fn snapshot_all(&self) -> Vec<Subscriber> {
        self.memberships
            .keys()
            .filter_map(|id| {
                let channel = self.memberships.get(id)?.iter().next()?;
                self.channels.get(channel)?.get(id).cloned()
            })
            .collect()
    }

    pub fn subscriber_ids(&self, channel: &str) -> HashSet<SubscriberId> {
        self.channels
            .get(channel)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn channels_of(&self, id: SubscriberId) -> HashSet<String> {
        self.memberships.get(&id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, channel: &str, id: SubscriberId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|set| set.contains_key(&id))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
