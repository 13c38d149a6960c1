//! Integration tests for the party host API
//!
//! Exercises the full guest/host flow over the HTTP surface with the
//! in-memory store and a stubbed media provider: session creation,
//! guest submission, host curation, playback progression, and session
//! end. Queue reads always follow an observed event, because snapshot
//! requests and change notifications race inside the engine otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::util::ServiceExt; // for `oneshot` method
use uuid::Uuid;

use jamq_common::events::{ChangeFeed, PlaybackPhase, PlayerCommand, SessionEvent};
use jamq_common::model::TrackStatus;

use jamq_host::api::{build_router, AppContext};
use jamq_host::catalog::CatalogClient;
use jamq_host::config::EngineConfig;
use jamq_host::engine::SessionRegistry;
use jamq_host::resolver::{MediaRef, MediaResolver, ProviderError, ProviderHandle, SearchProvider};
use jamq_host::store::{MemoryTrackStore, TrackStore};
use jamq_host::submit::SubmissionGateway;

/// Provider that answers every query with the same media id
struct StubProvider;

#[async_trait]
impl SearchProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(&self, query: &str) -> Result<Vec<MediaRef>, ProviderError> {
        Ok(vec![MediaRef {
            media_id: "dQw4w9WgXcQ".to_string(),
            title: query.to_string(),
            author: "Stub".to_string(),
            provider: "stub".to_string(),
        }])
    }
}

struct TestRig {
    app: Router,
    store: Arc<MemoryTrackStore>,
    registry: Arc<SessionRegistry>,
}

/// Test helper: app over the in-memory store and stub provider
fn setup_app() -> TestRig {
    let store = Arc::new(MemoryTrackStore::new(ChangeFeed::new(64)));
    let resolver = Arc::new(MediaResolver::new(vec![ProviderHandle::new(
        Arc::new(StubProvider),
        Duration::from_secs(1),
    )]));
    let registry = Arc::new(SessionRegistry::new(
        store.clone(),
        resolver,
        EngineConfig::default(),
    ));
    let app = build_router(AppContext {
        store: store.clone(),
        registry: registry.clone(),
        gateway: SubmissionGateway::new(store.clone()),
        catalog: CatalogClient::new().expect("catalog client"),
    });
    TestRig {
        app,
        store,
        registry,
    }
}

/// Test helper: request with a JSON body
fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test helper: bodyless request
fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Test helper: receive session events until one matches, with a deadline
async fn await_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn create_session(rig: &TestRig) -> Uuid {
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/sessions",
            json!({"host_id": "host-1", "name": "Friday Night"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = extract_json(response.into_body()).await;
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

// =============================================================================
// Health and Build Info
// =============================================================================

#[tokio::test]
async fn health_reports_module_and_version() {
    let rig = setup_app();

    let response = rig.app.clone().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "jamq-host");
    assert!(body["version"].is_string());

    let response = rig.app.clone().oneshot(get_request("/build_info")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(body["git_hash"].is_string());
    assert!(body["build_timestamp"].is_string());
}

// =============================================================================
// Full Party Flow
// =============================================================================

#[tokio::test]
async fn full_party_flow_from_submission_to_played() {
    let rig = setup_app();
    let session_id = create_session(&rig).await;

    // Host reconnecting finds the session again
    let response = rig
        .app
        .clone()
        .oneshot(get_request("/sessions/active?host_id=host-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["id"].as_str().unwrap(), session_id.to_string());

    // Observe events the way the host page does
    let engine = rig.registry.engine(session_id).await.unwrap();
    let mut events = engine.subscribe();

    // Guest suggests a track
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", session_id),
            json!({
                "guest_name": "Ana",
                "title": "Levitating",
                "artist": "Dua Lipa",
                "album": "Future Nostalgia"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["suggested_by"], "Ana");
    let track_id = Uuid::parse_str(body["id"].as_str().unwrap()).unwrap();

    await_event(&mut events, |e| {
        matches!(e, SessionEvent::QueueChanged { pending, .. } if pending.len() == 1)
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["pending"].as_array().unwrap().len(), 1);
    assert_eq!(body["approved"].as_array().unwrap().len(), 0);
    assert_eq!(body["phase"], "idle");

    // Host approves; the track becomes the head and starts playing
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracks/{}/approve", track_id),
            json!({"session_id": session_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "approved");
    assert_eq!(body["order_index"], 1);

    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlayerCommand {
                command: PlayerCommand::Load { media_id },
                ..
            } if media_id == "dQw4w9WgXcQ"
        )
    })
    .await;
    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlayerCommand {
                command: PlayerCommand::Play,
                ..
            }
        )
    })
    .await;
    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlaybackChanged {
                phase: PlaybackPhase::Playing,
                track_id: Some(id),
                ..
            } if *id == track_id
        )
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["approved"].as_array().unwrap().len(), 1);
    assert_eq!(body["head"]["id"].as_str().unwrap(), track_id.to_string());
    assert_eq!(body["phase"], "playing");
    assert_eq!(body["media_id"], "dQw4w9WgXcQ");

    // Player reports the track finished; the duplicate report that
    // browsers love to send must be harmless
    for _ in 0..2 {
        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/sessions/{}/player/events", session_id),
                json!({"state": "ended", "media_id": "dQw4w9WgXcQ"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlaybackChanged {
                phase: PlaybackPhase::Idle,
                ..
            }
        )
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["approved"].as_array().unwrap().len(), 0);
    assert_eq!(body["phase"], "idle");

    // Played exactly once, timestamped, with the resolved media kept
    let played = rig
        .store
        .tracks_by_status(session_id, TrackStatus::Played)
        .await
        .unwrap();
    assert_eq!(played.len(), 1);
    assert!(played[0].played_at.is_some());
    assert_eq!(played[0].media_id.as_deref(), Some("dQw4w9WgXcQ"));

    // Host ends the session
    let response = rig
        .app
        .clone()
        .oneshot(post_request(&format!("/sessions/{}/end", session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(!body["ended_at"].is_null());

    await_event(&mut events, |e| {
        matches!(e, SessionEvent::SessionEnded { session_id: id, .. } if *id == session_id)
    })
    .await;

    // Late submissions bounce off the ended session
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", session_id),
            json!({"guest_name": "Ben", "title": "One more", "artist": "Somebody"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The session row itself stays readable
    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}", session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Curation
// =============================================================================

#[tokio::test]
async fn rejected_tracks_never_reach_the_queue() {
    let rig = setup_app();
    let session_id = create_session(&rig).await;
    let engine = rig.registry.engine(session_id).await.unwrap();
    let mut events = engine.subscribe();

    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", session_id),
            json!({"guest_name": "Ana", "title": "Polka hour", "artist": "Unknown"}),
        ))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    let track_id = Uuid::parse_str(body["id"].as_str().unwrap()).unwrap();

    await_event(&mut events, |e| {
        matches!(e, SessionEvent::QueueChanged { pending, .. } if pending.len() == 1)
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracks/{}/reject", track_id),
            json!({"session_id": session_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "rejected");

    await_event(&mut events, |e| {
        matches!(e, SessionEvent::QueueChanged { pending, .. } if pending.is_empty())
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["pending"].as_array().unwrap().len(), 0);
    assert_eq!(body["approved"].as_array().unwrap().len(), 0);

    // Rejection is terminal; approving afterwards is refused
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tracks/{}/approve", track_id),
            json!({"session_id": session_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn skip_over_http_advances_the_queue() {
    let rig = setup_app();
    let session_id = create_session(&rig).await;
    let engine = rig.registry.engine(session_id).await.unwrap();
    let mut events = engine.subscribe();

    let mut track_ids = Vec::new();
    for title in ["First", "Second"] {
        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/sessions/{}/tracks", session_id),
                json!({"guest_name": "Ana", "title": title, "artist": "Dua Lipa"}),
            ))
            .await
            .unwrap();
        let body = extract_json(response.into_body()).await;
        track_ids.push(Uuid::parse_str(body["id"].as_str().unwrap()).unwrap());
    }
    for track_id in &track_ids {
        let response = rig
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/tracks/{}/approve", track_id),
                json!({"session_id": session_id}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlaybackChanged {
                phase: PlaybackPhase::Playing,
                track_id: Some(id),
                ..
            } if *id == track_ids[0]
        )
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(post_request(&format!(
            "/sessions/{}/playback/skip",
            session_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(
        body["skipped"]["id"].as_str().unwrap(),
        track_ids[0].to_string()
    );
    assert_eq!(body["skipped"]["status"], "played");

    await_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::PlaybackChanged {
                phase: PlaybackPhase::Playing,
                track_id: Some(id),
                ..
            } if *id == track_ids[1]
        )
    })
    .await;

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["approved"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["head"]["id"].as_str().unwrap(),
        track_ids[1].to_string()
    );
}

// =============================================================================
// Validation and Error Mapping
// =============================================================================

#[tokio::test]
async fn submissions_are_validated() {
    let rig = setup_app();
    let session_id = create_session(&rig).await;

    // Blank title
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", session_id),
            json!({"guest_name": "Ana", "title": "   ", "artist": "Dua Lipa"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Blank guest name
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", session_id),
            json!({"guest_name": "", "title": "Levitating", "artist": "Dua Lipa"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Unknown session
    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/sessions/{}/tracks", Uuid::new_v4()),
            json!({"guest_name": "Ana", "title": "Levitating", "artist": "Dua Lipa"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_creation_requires_host_and_name() {
    let rig = setup_app();

    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/sessions",
            json!({"host_id": "  ", "name": "Party"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = rig
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/sessions",
            json!({"host_id": "host-1", "name": ""}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_session_routes_return_not_found() {
    let rig = setup_app();
    let missing = Uuid::new_v4();

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = rig
        .app
        .clone()
        .oneshot(get_request(&format!("/sessions/{}/queue", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = rig
        .app
        .clone()
        .oneshot(post_request(&format!("/sessions/{}/playback/play", missing)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn active_session_is_null_for_unknown_hosts() {
    let rig = setup_app();

    let response = rig
        .app
        .clone()
        .oneshot(get_request("/sessions/active?host_id=nobody"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(body.is_null());
}

#[tokio::test]
async fn blank_catalog_query_returns_no_results() {
    let rig = setup_app();

    // Never touches the network for a blank query
    let response = rig
        .app
        .clone()
        .oneshot(get_request("/catalog/search?q=%20%20"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body, json!([]));
}
