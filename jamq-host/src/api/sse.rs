//! Server-Sent Events stream
//!
//! Streams one session's events to connected clients. Each connection
//! takes its own broadcast subscription from the session engine, so a
//! slow phone never backs up the engine; it just lags and misses
//! events, and the client-side reconnect refetches the queue snapshot.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::handlers::{engine_error, StatusResponse};
use crate::api::server::AppContext;

/// GET /sessions/:session_id/events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
    (axum::http::StatusCode, axum::Json<StatusResponse>),
> {
    let engine = ctx.registry.engine(session_id).await.map_err(engine_error)?;
    debug!(session_id = %session_id, "New SSE client connected");

    let rx = engine.subscribe();

    // Convert the broadcast receiver to a stream; the stream ends when
    // the engine stops and drops its sender
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged receiver; skip and let the client resync
                warn!(session_id = %session_id, "SSE stream error: {:?}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
