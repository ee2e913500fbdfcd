use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::handler::EventStreamHandler;
use crate::network::{Backoff, ConnectionManager, FeedEvent, FeedHandle};
use crate::server::{self, AppState};
use crate::supervisor::ConnectionSupervisor;

/// A running relay: feed adapter, event pump, keepalive and the shared core.
pub struct Relay {
    supervisor: Arc<ConnectionSupervisor>,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<EventStreamHandler>,
    feed: FeedHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Connect to the Postgres feed described by `config` and start every background task.
    pub fn start(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        let (feed, commands) = FeedHandle::channel();
        let (event_tx, event_rx) = mpsc::channel(config.feed_event_capacity);

        let manager = ConnectionManager::new(
            &config.database_url,
            Backoff::new(config.reconnect_min_backoff, config.reconnect_max_backoff),
            event_tx,
            commands,
        )?;
        let adapter = tokio::spawn(manager.run());

        let mut relay = Self::with_feed(config, feed, event_rx);
        relay.tasks.push(adapter);
        Ok(relay)
    }

    /// Build the relay over any feed that speaks the [`FeedHandle`] protocol.
    pub fn with_feed(
        config: &RelayConfig,
        feed: FeedHandle,
        events: mpsc::Receiver<FeedEvent>,
    ) -> Self {
        let supervisor = Arc::new(ConnectionSupervisor::new());
        let dispatcher = Arc::new(Dispatcher::with_config(
            feed.clone(),
            config.dispatcher_config(),
        ));
        let handler = Arc::new(EventStreamHandler::new(
            Arc::clone(&supervisor),
            Arc::clone(&dispatcher),
            config.queue_capacity,
        ));

        let pump = tokio::spawn(pump(
            events,
            Arc::clone(&supervisor),
            Arc::clone(&dispatcher),
        ));
        let keepalive = supervisor.start_keepalive(feed.clone(), config.keepalive_interval);

        info!(
            "Relay started (slow readers: {}, broadcast on connection loss: {}, queue capacity: {})",
            config.slow_reader_policy, config.broadcast_on_connection_loss, config.queue_capacity
        );

        Self {
            supervisor,
            dispatcher,
            handler,
            feed,
            tasks: vec![pump, keepalive],
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn feed(&self) -> &FeedHandle {
        &self.feed
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            handler: Arc::clone(&self.handler),
            supervisor: Arc::clone(&self.supervisor),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    /// Serve `GET /events` on `listener` until the server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        server::serve(listener, self.app_state()).await
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// Transitions reach the supervisor before the dispatcher, so the token is
// already revoked when subscribers learn about the loss.
async fn pump(
    mut events: mpsc::Receiver<FeedEvent>,
    supervisor: Arc<ConnectionSupervisor>,
    dispatcher: Arc<Dispatcher>,
) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::State(transition) => {
                supervisor.on_feed_state_change(&transition);
                dispatcher.on_feed_state_change(&transition);
            }
            FeedEvent::Notification(notification) => {
                dispatcher.deliver(&notification);
            }
        }
    }
    debug!("Feed event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Notification;
    use crate::network::FeedTransition;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_pump_routes_events() {
        let config = RelayConfig::builder()
            .database_url("postgres://localhost/app")
            .build();
        let (feed, _commands) = FeedHandle::channel();
        let (event_tx, event_rx) = mpsc::channel(8);
        let relay = Relay::with_feed(&config, feed, event_rx);

        event_tx
            .send(FeedEvent::State(FeedTransition::Connected))
            .await
            .unwrap();
        event_tx
            .send(FeedEvent::Notification(Notification::new("orders", "1")))
            .await
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while relay.supervisor().current_token().is_none() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(relay.supervisor().stats().connects, 1);

        event_tx
            .send(FeedEvent::State(FeedTransition::Disconnected("eof".to_string())))
            .await
            .unwrap();
        timeout(Duration::from_secs(5), async {
            while relay.supervisor().current_token().is_some() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = RelayConfig::builder().database_url("mysql://localhost/app").build();
        assert!(matches!(Relay::start(&config), Err(RelayError::Config(_))));
    }
}
