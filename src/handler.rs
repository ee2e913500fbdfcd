//! Event Stream Handler - one per accepted client request.
//!
//! [`EventStreamHandler::open`] admits a client against the current admission
//! token and registers a fresh bounded queue on every requested channel.
//! The returned [`EventStream`] turns queue entries into [`Frame`]s, hangs up
//! when its own backlog saturates, and unregisters everything when dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Backlog, Dispatcher, Subscriber, SubscriberId, MIN_QUEUE_CAPACITY};
use crate::error::RelayError;
use crate::model::{Delivery, Frame};
use crate::supervisor::ConnectionSupervisor;

/// Postgres truncates identifiers beyond this many bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 63;

/// Split a `channels` query value into distinct, trimmed channel names.
pub fn parse_channels(raw: Option<&str>) -> Result<Vec<String>, RelayError> {
    let raw = raw.unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(RelayError::InvalidChannels(
            "the channels parameter is required".to_string(),
        ));
    }

    let mut channels: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let name = part.trim();
        if name.is_empty() {
            return Err(RelayError::InvalidChannels(format!(
                "empty channel name in {:?}",
                raw
            )));
        }
        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(RelayError::InvalidChannels(format!(
                "channel name longer than {} bytes: {:?}",
                MAX_CHANNEL_NAME_LEN, name
            )));
        }
        if !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
    }
    Ok(channels)
}

/// Why an [`EventStream`] stopped producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The queue saturated: the client drains slower than notifications arrive.
    TooSlow,
    /// Every producer let go of the queue, e.g. after eviction.
    QueueClosed,
}

pub struct EventStreamHandler {
    supervisor: Arc<ConnectionSupervisor>,
    dispatcher: Arc<Dispatcher>,
    queue_capacity: usize,
}

impl EventStreamHandler {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        dispatcher: Arc<Dispatcher>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            supervisor,
            dispatcher,
            queue_capacity,
        }
    }

    /// Admit a client and subscribe it to `channels`.
    ///
    /// Fails with [`RelayError::UpstreamUnavailable`] when no admission token
    /// is live, before anything is registered. Registration failures, an
    /// eviction, a token revoked mid-registration and a dropped future all
    /// unwind whatever was already registered.
    pub async fn open(&self, channels: Vec<String>) -> Result<EventStream, RelayError> {
        let token = self
            .supervisor
            .current_token()
            .ok_or(RelayError::UpstreamUnavailable)?;

        let (subscriber, queue) = Subscriber::queue(self.queue_capacity);
        let mut stream = EventStream {
            id: subscriber.id(),
            queue,
            capacity: self.queue_capacity.max(MIN_QUEUE_CAPACITY),
            registered: Vec::with_capacity(channels.len()),
            dispatcher: Arc::clone(&self.dispatcher),
            ended: None,
            frames: 0,
        };

        for channel in &channels {
            // Recorded before the LISTEN so a dropped request still unregisters it
            stream.registered.push(channel.clone());
            if let Err(e) = self.dispatcher.listen(channel, &subscriber).await {
                error!("Could not listen to channel {}: {}", channel, e);
                return Err(e);
            }
        }
        // The dispatcher now holds the only producers; eviction closes the queue
        drop(subscriber);

        // Evicted mid-registration: earlier channels are gone, later ones re-added
        if let Some(lost) = stream
            .registered
            .iter()
            .find(|channel| !self.dispatcher.is_listening(channel, stream.id))
        {
            warn!("Client {} evicted while subscribing (lost {})", stream.id, lost);
            return Err(RelayError::SubscriberEvicted);
        }

        if !self.supervisor.is_current(token) {
            warn!("Upstream dropped while subscribing client {}", stream.id);
            return Err(RelayError::UpstreamUnavailable);
        }

        info!("Client {} listening on {:?}", stream.id, channels);
        Ok(stream)
    }
}

/// A live subscription seen from the client side.
pub struct EventStream {
    id: SubscriberId,
    queue: mpsc::Receiver<Delivery>,
    capacity: usize,
    registered: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    ended: Option<EndReason>,
    frames: u64,
}

impl EventStream {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn channels(&self) -> &[String] {
        &self.registered
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.ended
    }

    /// Wait for the next frame. `None` means the stream is over for good.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.ended.is_some() {
            return None;
        }

        let Some(delivery) = self.queue.recv().await else {
            info!("Client {} queue closed after {} frames", self.id, self.frames);
            self.ended = Some(EndReason::QueueClosed);
            return None;
        };

        // Depth as it was with this entry still queued
        let depth = self.queue.len() + 1;
        match Backlog::from_capacity(depth, self.capacity) {
            Backlog::Saturated => {
                warn!(
                    "Client {} could not keep up ({} of {} queued)",
                    self.id, depth, self.capacity
                );
                self.ended = Some(EndReason::TooSlow);
                return None;
            }
            Backlog::Filling => debug!("Client {} backlog at {}/{}", self.id, depth, self.capacity),
            Backlog::Clear => {}
        }

        if delivery.is_connection_lost() {
            info!("Client {}: upstream connection lost, keeping stream open", self.id);
        }

        self.frames += 1;
        Some(Frame::from(delivery))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for channel in self.registered.drain(..) {
            self.dispatcher.unlisten(&channel, self.id);
        }
        info!("Client {} disconnected", self.id);
    }
}
