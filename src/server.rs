//! HTTP surface: `GET /events` (server-sent events) and `GET /health`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::dispatch::{Dispatcher, DispatcherStats};
use crate::error::RelayError;
use crate::handler::{parse_channels, EventStream, EventStreamHandler};
use crate::model::Frame;
use crate::supervisor::{ConnectionSupervisor, SupervisorStats};

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventStreamHandler>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Deserialize)]
struct EventsQuery {
    channels: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct HealthBody {
    upstream: &'static str,
    generation: Option<u64>,
    connection: SupervisorStats,
    dispatcher: DispatcherStats,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidChannels(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable
            | Self::Upstream(_)
            | Self::Database(_)
            | Self::SubscriberEvicted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            code: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Accept connections on `listener` until the server fails.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), RelayError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Start listening on {}", addr);
    }
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn events_handler(
    Query(params): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RelayError> {
    info!("Got a connection");

    let channels = parse_channels(params.channels.as_deref()).inspect_err(|e| {
        warn!("Rejecting client: {}", e);
    })?;
    let stream = state.handler.open(channels).await.inspect_err(|e| {
        warn!("Rejecting client: {}", e);
    })?;

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
    ];
    let sse = Sse::new(into_events(stream)).keep_alive(KeepAlive::default());
    Ok((headers, sse))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let token = state.supervisor.current_token();
    let status = if token.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthBody {
        upstream: state.supervisor.state().as_str(),
        generation: token.map(|t| t.generation()),
        connection: state.supervisor.stats(),
        dispatcher: state.dispatcher.stats(),
    };
    (status, Json(body))
}

/// Adapt an [`EventStream`] to the SSE body. Dropping the body (client gone or
/// write failure) drops the stream, which unregisters it.
fn into_events(stream: EventStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(stream, |mut stream| async move {
        loop {
            let frame = stream.next_frame().await?;
            match to_event(&frame) {
                Ok(event) => return Some((Ok(event), stream)),
                Err(e) => error!("Could not marshal payload: {}", e),
            }
        }
    })
}

fn to_event(frame: &Frame) -> Result<Event, serde_json::Error> {
    let data = frame.data()?;
    let event = match frame.event_name() {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    Ok(event.data(data))
}
