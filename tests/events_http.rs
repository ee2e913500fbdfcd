use std::time::Duration;

use notify_relay::dispatch::SlowReaderPolicy;
use notify_relay::{
    FeedCommand, FeedEvent, FeedHandle, FeedTransition, Notification, Relay, RelayConfig,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct Harness {
    relay: Relay,
    events: mpsc::Sender<FeedEvent>,
    base: String,
}

async fn harness(broadcast_on_connection_loss: bool) -> Harness {
    harness_with(SlowReaderPolicy::Neglect, broadcast_on_connection_loss, 64).await
}

async fn harness_with(
    policy: SlowReaderPolicy,
    broadcast_on_connection_loss: bool,
    queue_capacity: usize,
) -> Harness {
    let config = RelayConfig::builder()
        .database_url("postgres://localhost/app")
        .slow_reader_policy(policy)
        .broadcast_on_connection_loss(broadcast_on_connection_loss)
        .queue_capacity(queue_capacity)
        .build();

    // Feed double: accepts every LISTEN
    let (feed, mut commands) = FeedHandle::channel();
    tokio::spawn(async move {
        while let Some(cmd) = commands.recv().await {
            if let FeedCommand::Listen { reply, .. } = cmd {
                let _ = reply.send(Ok(()));
            }
        }
    });

    let (events, event_rx) = mpsc::channel(64);
    let relay = Relay::with_feed(&config, feed, event_rx);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = relay.app_state();
    tokio::spawn(async move {
        let _ = notify_relay::server::serve(listener, state).await;
    });

    Harness {
        relay,
        events,
        base: format!("http://{}", addr),
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

impl Harness {
    async fn transition(&self, transition: FeedTransition) {
        let expect_connected = transition == FeedTransition::Connected;
        self.events.send(FeedEvent::State(transition)).await.unwrap();
        let supervisor = self.relay.supervisor().clone();
        wait_until("token change", || {
            supervisor.current_token().is_some() == expect_connected
        })
        .await;
    }

    async fn publish(&self, channel: &str, payload: &str) {
        self.events
            .send(FeedEvent::Notification(Notification::new(channel, payload)))
            .await
            .unwrap();
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}{}", self.base, path))
            .header("Origin", "http://example.com")
            .send()
            .await
            .unwrap()
    }
}

/// Splits a streaming body into server-sent event frames.
struct FrameReader {
    response: reqwest::Response,
    buf: String,
}

impl FrameReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buf: String::new(),
        }
    }

    async fn next(&mut self) -> String {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..end + 2).collect();
                // Keep-alive comments
                if frame.starts_with(':') {
                    continue;
                }
                return frame;
            }
            let chunk = timeout(Duration::from_secs(5), self.response.chunk())
                .await
                .expect("timed out waiting for a frame")
                .unwrap()
                .expect("stream ended");
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

#[tokio::test]
async fn test_streams_only_requested_channels() {
    let h = harness(false).await;
    h.transition(FeedTransition::Connected).await;

    let response = h.get("/events?channels=orders,payments").await;
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["connection"], "keep-alive");
    assert_eq!(headers["access-control-allow-origin"], "*");

    let mut frames = FrameReader::new(response);

    h.publish("orders", "42").await;
    assert_eq!(
        frames.next().await,
        "data: {\"channel\":\"orders\",\"payload\":\"42\"}\n\n"
    );

    h.publish("inventory", "ignored").await;
    h.publish("payments", "7").await;
    assert_eq!(
        frames.next().await,
        "data: {\"channel\":\"payments\",\"payload\":\"7\"}\n\n"
    );
}

#[tokio::test]
async fn test_rejects_bad_channel_lists() {
    let h = harness(false).await;
    h.transition(FeedTransition::Connected).await;

    for path in ["/events", "/events?channels=", "/events?channels=orders,,payments"] {
        let response = h.get(path).await;
        assert_eq!(response.status(), 400, "{}", path);

        let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(body["code"], "invalid_channels");
    }
    assert_eq!(h.relay.dispatcher().stats().subscriptions, 0);
}

#[tokio::test]
async fn test_rejects_while_upstream_down() {
    let h = harness(false).await;

    let response = h.get("/events?channels=orders").await;
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(body["code"], "upstream_unavailable");
    assert_eq!(h.relay.dispatcher().stats().subscriptions, 0);

    h.transition(FeedTransition::Connected).await;
    let response = h.get("/events?channels=orders").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_connection_loss_and_recovery() {
    let h = harness(true).await;
    h.transition(FeedTransition::Connected).await;

    let mut first = FrameReader::new(h.get("/events?channels=orders").await);

    h.transition(FeedTransition::Disconnected("server closed the connection".to_string()))
        .await;
    assert_eq!(first.next().await, "event: connection_lost\ndata: {}\n\n");

    let rejected = h.get("/events?channels=orders").await;
    assert_eq!(rejected.status(), 503);

    h.transition(FeedTransition::Connected).await;
    let response = h.get("/events?channels=orders").await;
    assert_eq!(response.status(), 200);
    let mut second = FrameReader::new(response);

    h.publish("orders", "after-reconnect").await;
    let expected = "data: {\"channel\":\"orders\",\"payload\":\"after-reconnect\"}\n\n";
    assert_eq!(second.next().await, expected);
    // The marker did not end the first stream
    assert_eq!(first.next().await, expected);
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let h = harness(false).await;
    h.transition(FeedTransition::Connected).await;

    let response = h.get("/events?channels=orders,payments").await;
    assert_eq!(response.status(), 200);
    assert_eq!(h.relay.dispatcher().stats().subscriptions, 2);
    drop(response);

    // The server notices the closed socket on its next write at the latest
    let dispatcher = h.relay.dispatcher().clone();
    let result = timeout(Duration::from_secs(5), async {
        while dispatcher.stats().subscriptions != 0 {
            h.publish("orders", "ping").await;
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "registrations outlived the client");
}

#[tokio::test]
async fn test_health_reports_upstream_state() {
    let h = harness(false).await;

    let response = h.get("/health").await;
    assert_eq!(response.status(), 503);

    h.transition(FeedTransition::Connected).await;
    let response = h.get("/health").await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(body["upstream"], "connected");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["connection"]["connects"], 1);
}

#[tokio::test]
async fn test_evicted_client_stream_ends() {
    let h = harness_with(SlowReaderPolicy::Evict, false, 4).await;
    h.transition(FeedTransition::Connected).await;

    let mut response = h.get("/events?channels=orders").await;
    assert_eq!(response.status(), 200);

    // One burst, queued before the stream task gets to drain anything
    for i in 0..32 {
        h.publish("orders", &i.to_string()).await;
    }
    let dispatcher = h.relay.dispatcher().clone();
    wait_until("eviction", || dispatcher.stats().evicted == 1).await;
    assert_eq!(dispatcher.stats().subscriptions, 0);

    // Whatever was queued is flushed, then the body ends
    let mut body = String::new();
    let ended = timeout(Duration::from_secs(5), async {
        while let Some(chunk) = response.chunk().await.unwrap() {
            body.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await;
    assert!(ended.is_ok(), "stream outlived the eviction");
    assert!(body.matches("data: ").count() <= 4);
}
