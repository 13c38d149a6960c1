//! Router setup
//!
//! Assembles the Axum router over the shared application context. CORS
//! is wide open: guests reach the API from phones on the party network,
//! served from whatever origin the host page came from.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::catalog::CatalogClient;
use crate::engine::SessionRegistry;
use crate::store::TrackStore;
use crate::submit::SubmissionGateway;

/// Shared application context passed to all handlers
///
/// Clone is cheap (everything inside is an Arc or a handle), which also
/// gives handlers `FromRef` access via Axum's blanket impl.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn TrackStore>,
    pub registry: Arc<SessionRegistry>,
    pub gateway: SubmissionGateway,
    pub catalog: CatalogClient,
}

/// Create the API router
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health and build identification
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::build_info))

        // Session lifecycle
        .route("/sessions", post(super::handlers::create_session))
        .route("/sessions/active", get(super::handlers::active_session))
        .route("/sessions/:session_id", get(super::handlers::get_session))
        .route("/sessions/:session_id/end", post(super::handlers::end_session))

        // Guest submission and queue views
        .route("/sessions/:session_id/tracks", post(super::handlers::submit_track))
        .route("/sessions/:session_id/queue", get(super::handlers::get_queue))

        // Per-session SSE event stream
        .route("/sessions/:session_id/events", get(super::sse::event_stream))

        // Host playback control
        .route("/sessions/:session_id/playback/skip", post(super::handlers::skip))
        .route("/sessions/:session_id/playback/play", post(super::handlers::play))
        .route("/sessions/:session_id/playback/pause", post(super::handlers::pause))
        .route("/sessions/:session_id/playback/mute", post(super::handlers::mute))
        .route("/sessions/:session_id/playback/unmute", post(super::handlers::unmute))

        // State reports posted by the embedded player
        .route("/sessions/:session_id/player/events", post(super::handlers::player_event))

        // Host curation
        .route("/tracks/:track_id/approve", post(super::handlers::approve_track))
        .route("/tracks/:track_id/reject", post(super::handlers::reject_track))

        // Catalog search for the submission form
        .route("/catalog/search", get(super::handlers::catalog_search))

        // Attach application context
        .with_state(ctx)

        // Enable CORS for cross-origin guest devices
        .layer(CorsLayer::permissive())
}
