//! Track change feed and session event types
//!
//! Row-level track changes flow from the store to each session's
//! subscribers over a per-session tokio broadcast channel. Delivery is
//! at-least-once: after a reconnect a consumer may see a change twice or
//! out of order, so every change carries the full row and consumers
//! apply it as a set-membership correction rather than a diff.
//!
//! `SessionEvent` is the outward-facing enum streamed to clients over
//! SSE, serialized with a `type` tag for exhaustive client matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::model::Track;

/// What happened to a track row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification
///
/// Carries the full row after the change (for deletes, the row as it was
/// last seen) so consumers never need a follow-up query to apply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackChange {
    pub kind: ChangeKind,
    pub track: Track,
}

impl TrackChange {
    pub fn insert(track: Track) -> Self {
        Self {
            kind: ChangeKind::Insert,
            track,
        }
    }

    pub fn update(track: Track) -> Self {
        Self {
            kind: ChangeKind::Update,
            track,
        }
    }

    pub fn delete(track: Track) -> Self {
        Self {
            kind: ChangeKind::Delete,
            track,
        }
    }
}

/// Per-session track change feed
///
/// One broadcast channel per session, created on first use. Publishing
/// is lossy by design: with no subscribers the change is dropped, and a
/// slow subscriber sees `Lagged` and is expected to reload from the
/// store rather than replay.
#[derive(Clone)]
pub struct ChangeFeed {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<TrackChange>>>>,
    capacity: usize,
}

impl ChangeFeed {
    /// Create a feed whose per-session channels buffer `capacity` changes
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to changes for one session
    pub async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<TrackChange> {
        self.sender(session_id).await.subscribe()
    }

    /// Publish a change to its session's subscribers (lossy)
    pub async fn publish(&self, change: TrackChange) {
        let session_id = change.track.session_id;
        let _ = self.sender(session_id).await.send(change);
    }

    /// Number of live subscribers for a session
    pub async fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.channels
            .read()
            .await
            .get(&session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop the channel for an ended session
    ///
    /// Safe to call while subscribers exist: they observe `Closed` once
    /// the sender drops, and a later publish would lazily recreate the
    /// channel.
    pub async fn remove(&self, session_id: Uuid) {
        self.channels.write().await.remove(&session_id);
    }

    async fn sender(&self, session_id: Uuid) -> broadcast::Sender<TrackChange> {
        if let Some(tx) = self.channels.read().await.get(&session_id) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id)
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Opening change channel");
                broadcast::channel(self.capacity).0
            })
            .clone()
    }
}

/// Playback phase of the current head track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// No approved track to play
    Idle,
    /// Head chosen, media resolution in flight
    Loading,
    /// Media resolved and handed to the player
    Ready,
    Playing,
    Paused,
    /// Resolution or playback failed for this track; host intervention required
    Error,
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "idle"),
            PlaybackPhase::Loading => write!(f, "loading"),
            PlaybackPhase::Ready => write!(f, "ready"),
            PlaybackPhase::Playing => write!(f, "playing"),
            PlaybackPhase::Paused => write!(f, "paused"),
            PlaybackPhase::Error => write!(f, "error"),
        }
    }
}

/// Command for the host page's embedded player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlayerCommand {
    /// Load the given media and prepare for playback
    Load { media_id: String },
    Play,
    Pause,
    Mute,
    Unmute,
}

/// Session event types streamed to clients over SSE
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A single track row changed
    TrackChanged {
        change: TrackChange,
        timestamp: DateTime<Utc>,
    },

    /// Full queue projection after applying changes
    QueueChanged {
        pending: Vec<Track>,
        approved: Vec<Track>,
        timestamp: DateTime<Utc>,
    },

    /// Playback phase moved
    PlaybackChanged {
        phase: PlaybackPhase,
        track_id: Option<Uuid>,
        media_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Command for the host page's embedded player
    PlayerCommand {
        command: PlayerCommand,
        timestamp: DateTime<Utc>,
    },

    /// The host ended the session
    SessionEnded {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Get event type as string for the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::TrackChanged { .. } => "TrackChanged",
            SessionEvent::QueueChanged { .. } => "QueueChanged",
            SessionEvent::PlaybackChanged { .. } => "PlaybackChanged",
            SessionEvent::PlayerCommand { .. } => "PlayerCommand",
            SessionEvent::SessionEnded { .. } => "SessionEnded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackStatus;

    fn test_track(session_id: Uuid) -> Track {
        Track {
            id: Uuid::new_v4(),
            session_id,
            title: "Test".to_string(),
            artist: "Tester".to_string(),
            album: None,
            cover_url: None,
            media_id: None,
            suggested_by: None,
            status: TrackStatus::Pending,
            created_at: Utc::now(),
            played_at: None,
            order_index: None,
        }
    }

    #[tokio::test]
    async fn feed_delivers_to_session_subscribers() {
        let feed = ChangeFeed::new(16);
        let session_id = Uuid::new_v4();
        let mut rx = feed.subscribe(session_id).await;

        let change = TrackChange::insert(test_track(session_id));
        feed.publish(change.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ChangeKind::Insert);
        assert_eq!(received.track.id, change.track.id);
    }

    #[tokio::test]
    async fn feed_isolates_sessions() {
        let feed = ChangeFeed::new(16);
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut rx_a = feed.subscribe(session_a).await;

        feed.publish(TrackChange::insert(test_track(session_b)))
            .await;

        // Nothing for session A's subscriber
        assert!(matches!(
            rx_a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(feed.subscriber_count(session_a).await, 1);
        assert_eq!(feed.subscriber_count(session_b).await, 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let feed = ChangeFeed::new(16);
        // Must not panic or error
        feed.publish(TrackChange::insert(test_track(Uuid::new_v4())))
            .await;
    }

    #[tokio::test]
    async fn removed_session_channel_closes_subscribers() {
        let feed = ChangeFeed::new(16);
        let session_id = Uuid::new_v4();
        let mut rx = feed.subscribe(session_id).await;

        feed.remove(session_id).await;

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn session_events_carry_type_tag() {
        let event = SessionEvent::PlaybackChanged {
            phase: PlaybackPhase::Playing,
            track_id: Some(Uuid::new_v4()),
            media_id: Some("dQw4w9WgXcQ".to_string()),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "PlaybackChanged");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"PlaybackChanged\""));
        assert!(json.contains("\"phase\":\"playing\""));
    }

    #[test]
    fn player_commands_serialize_with_action_tag() {
        let json = serde_json::to_string(&PlayerCommand::Load {
            media_id: "dQw4w9WgXcQ".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"action\":\"load\""));
        assert!(json.contains("\"media_id\":\"dQw4w9WgXcQ\""));

        let json = serde_json::to_string(&PlayerCommand::Pause).unwrap();
        assert_eq!(json, "{\"action\":\"pause\"}");
    }
}
