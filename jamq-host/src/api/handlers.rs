//! HTTP request handlers
//!
//! Thin translation layer: extract, hand off to the gateway or the
//! session engine, map the error onto a status code. No queue or
//! playback state is touched here directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use jamq_common::model::{Session, Track};

use crate::api::server::AppContext;
use crate::catalog::{CatalogError, CatalogTrack};
use crate::engine::{EngineError, QueueSnapshot, TransportCommand};
use crate::playback::PlayerEvent;
use crate::store::StoreError;
use crate::submit::{SubmitError, TrackSubmission};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    version: &'static str,
    git_hash: &'static str,
    build_timestamp: &'static str,
    build_profile: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    host_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveSessionQuery {
    host_id: String,
}

/// Curation requests carry the session so the right engine answers
#[derive(Debug, Deserialize)]
pub struct CurationRequest {
    session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SkipResponse {
    /// Track that was skipped past, absent when the queue was empty
    skipped: Option<Track>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    q: String,
}

// ============================================================================
// Error Mapping
// ============================================================================

type HandlerError = (StatusCode, Json<StatusResponse>);

fn reply_error(status: StatusCode, message: impl std::fmt::Display) -> HandlerError {
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", message),
        }),
    )
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::SessionNotFound(_) | StoreError::TrackNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::SessionEnded(_) | StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        StoreError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn store_error(e: StoreError) -> HandlerError {
    let status = store_status(&e);
    if status == StatusCode::SERVICE_UNAVAILABLE {
        error!("Store unavailable: {}", e);
    } else {
        warn!("Store refused request: {}", e);
    }
    reply_error(status, e)
}

pub(crate) fn engine_error(e: EngineError) -> HandlerError {
    match e {
        EngineError::SessionNotFound(_) => reply_error(StatusCode::NOT_FOUND, e),
        EngineError::Stopped => {
            error!("Session engine unavailable: {}", e);
            reply_error(StatusCode::SERVICE_UNAVAILABLE, e)
        }
        EngineError::Store(inner) => store_error(inner),
    }
}

fn submit_error(e: SubmitError) -> HandlerError {
    match e {
        SubmitError::Validation { .. } => reply_error(StatusCode::UNPROCESSABLE_ENTITY, e),
        SubmitError::Store(inner) => store_error(inner),
    }
}

fn catalog_error(e: CatalogError) -> HandlerError {
    warn!("Catalog search failed: {}", e);
    reply_error(StatusCode::BAD_GATEWAY, e)
}

// ============================================================================
// Health and Build Info
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jamq-host".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /build_info
pub async fn build_info() -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        build_profile: env!("BUILD_PROFILE"),
    })
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// POST /sessions - Open a new party session
pub async fn create_session(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), HandlerError> {
    let host_id = req.host_id.trim();
    let name = req.name.trim();
    if host_id.is_empty() {
        return Err(reply_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "host_id must not be empty",
        ));
    }
    if name.is_empty() {
        return Err(reply_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "name must not be empty",
        ));
    }

    let session = ctx
        .store
        .create_session(host_id, name)
        .await
        .map_err(store_error)?;
    info!(session_id = %session.id, host_id = %host_id, name = %name, "Session created");
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions/active?host_id= - Most recent active session for a host
///
/// Body is JSON `null` when the host has no active session; clients use
/// that to decide between resuming and creating.
pub async fn active_session(
    State(ctx): State<AppContext>,
    Query(query): Query<ActiveSessionQuery>,
) -> Result<Json<Option<Session>>, HandlerError> {
    let session = ctx
        .store
        .active_session(query.host_id.trim())
        .await
        .map_err(store_error)?;
    Ok(Json(session))
}

/// GET /sessions/:session_id - Session lookup, ended sessions included
pub async fn get_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, HandlerError> {
    match ctx.store.session(session_id).await.map_err(store_error)? {
        Some(session) => Ok(Json(session)),
        None => Err(reply_error(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        )),
    }
}

/// POST /sessions/:session_id/end - End a session; idempotent
pub async fn end_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, HandlerError> {
    let session = ctx
        .store
        .end_session(session_id)
        .await
        .map_err(store_error)?;
    // Engine announces SessionEnded to its subscribers before stopping
    ctx.registry.shutdown(session_id).await;
    info!(session_id = %session_id, "Session ended");
    Ok(Json(session))
}

// ============================================================================
// Guest Submission and Queue Views
// ============================================================================

/// POST /sessions/:session_id/tracks - Guest suggestion
pub async fn submit_track(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
    Json(submission): Json<TrackSubmission>,
) -> Result<(StatusCode, Json<Track>), HandlerError> {
    let track = ctx
        .gateway
        .submit(session_id, submission)
        .await
        .map_err(submit_error)?;
    Ok((StatusCode::CREATED, Json(track)))
}

/// GET /sessions/:session_id/queue - Queue snapshot for initial render
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<QueueSnapshot>, HandlerError> {
    let engine = ctx.registry.engine(session_id).await.map_err(engine_error)?;
    let snapshot = engine.snapshot().await.map_err(engine_error)?;
    Ok(Json(snapshot))
}

// ============================================================================
// Host Curation
// ============================================================================

/// POST /tracks/:track_id/approve
pub async fn approve_track(
    State(ctx): State<AppContext>,
    Path(track_id): Path<Uuid>,
    Json(req): Json<CurationRequest>,
) -> Result<Json<Track>, HandlerError> {
    let engine = ctx
        .registry
        .engine(req.session_id)
        .await
        .map_err(engine_error)?;
    let track = engine.approve(track_id).await.map_err(engine_error)?;
    info!(track_id = %track_id, session_id = %req.session_id, "Track approved");
    Ok(Json(track))
}

/// POST /tracks/:track_id/reject
pub async fn reject_track(
    State(ctx): State<AppContext>,
    Path(track_id): Path<Uuid>,
    Json(req): Json<CurationRequest>,
) -> Result<Json<Track>, HandlerError> {
    let engine = ctx
        .registry
        .engine(req.session_id)
        .await
        .map_err(engine_error)?;
    let track = engine.reject(track_id).await.map_err(engine_error)?;
    info!(track_id = %track_id, session_id = %req.session_id, "Track rejected");
    Ok(Json(track))
}

// ============================================================================
// Playback Control
// ============================================================================

/// POST /sessions/:session_id/playback/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SkipResponse>, HandlerError> {
    let engine = ctx.registry.engine(session_id).await.map_err(engine_error)?;
    let skipped = engine.skip().await.map_err(engine_error)?;
    Ok(Json(SkipResponse { skipped }))
}

async fn transport(
    ctx: &AppContext,
    session_id: Uuid,
    command: TransportCommand,
) -> Result<Json<StatusResponse>, HandlerError> {
    let engine = ctx.registry.engine(session_id).await.map_err(engine_error)?;
    engine.transport(command).await.map_err(engine_error)?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

/// POST /sessions/:session_id/playback/play
pub async fn play(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, HandlerError> {
    transport(&ctx, session_id, TransportCommand::Play).await
}

/// POST /sessions/:session_id/playback/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, HandlerError> {
    transport(&ctx, session_id, TransportCommand::Pause).await
}

/// POST /sessions/:session_id/playback/mute
pub async fn mute(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, HandlerError> {
    transport(&ctx, session_id, TransportCommand::Mute).await
}

/// POST /sessions/:session_id/playback/unmute
pub async fn unmute(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, HandlerError> {
    transport(&ctx, session_id, TransportCommand::Unmute).await
}

/// POST /sessions/:session_id/player/events - Embedded player reports
pub async fn player_event(
    State(ctx): State<AppContext>,
    Path(session_id): Path<Uuid>,
    Json(event): Json<PlayerEvent>,
) -> Result<Json<StatusResponse>, HandlerError> {
    let engine = ctx.registry.engine(session_id).await.map_err(engine_error)?;
    engine.player_event(event).await.map_err(engine_error)?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

// ============================================================================
// Catalog Search
// ============================================================================

/// GET /catalog/search?q= - Track metadata for the submission form
pub async fn catalog_search(
    State(ctx): State<AppContext>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<CatalogTrack>>, HandlerError> {
    let tracks = ctx.catalog.search(&query.q).await.map_err(catalog_error)?;
    Ok(Json(tracks))
}
