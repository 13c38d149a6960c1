//! In-memory track store
//!
//! Backs tests and zero-setup demos. Both tables live behind one mutex;
//! change notifications go out after the lock is released so a slow
//! subscriber can never hold up a write.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use async_trait::async_trait;
use chrono::Utc;

use jamq_common::events::{ChangeFeed, TrackChange};
use jamq_common::model::{Session, Track, TrackStatus};

use super::{NewTrack, StoreError, TrackPatch, TrackStore};

/// HashMap-backed [`TrackStore`]
#[derive(Clone)]
pub struct MemoryTrackStore {
    inner: Arc<Mutex<Inner>>,
    feed: ChangeFeed,
}

#[derive(Default)]
struct Inner {
    tracks: HashMap<Uuid, Track>,
    sessions: HashMap<Uuid, Session>,
}

impl MemoryTrackStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            feed,
        }
    }
}

impl Inner {
    fn next_order_index(&self, session_id: Uuid) -> i64 {
        self.tracks
            .values()
            .filter(|t| t.session_id == session_id && t.status == TrackStatus::Approved)
            .filter_map(|t| t.order_index)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn insert_track(&self, new: NewTrack) -> Result<Track, StoreError> {
        let track = {
            let mut inner = self.inner.lock().await;

            let session = inner
                .sessions
                .get(&new.session_id)
                .ok_or(StoreError::SessionNotFound(new.session_id))?;
            if !session.is_active {
                return Err(StoreError::SessionEnded(new.session_id));
            }

            let track = Track {
                id: Uuid::new_v4(),
                session_id: new.session_id,
                title: new.title,
                artist: new.artist,
                album: new.album,
                cover_url: new.cover_url,
                media_id: None,
                suggested_by: new.suggested_by,
                status: TrackStatus::Pending,
                created_at: Utc::now(),
                played_at: None,
                order_index: None,
            };
            inner.tracks.insert(track.id, track.clone());
            track
        };

        self.feed.publish(TrackChange::insert(track.clone())).await;
        Ok(track)
    }

    async fn update_track(&self, track_id: Uuid, patch: TrackPatch) -> Result<Track, StoreError> {
        let track = {
            let mut inner = self.inner.lock().await;

            let current = inner
                .tracks
                .get(&track_id)
                .ok_or(StoreError::TrackNotFound(track_id))?
                .clone();

            let mut updated = current.clone();
            if let Some(next) = patch.status {
                if !current.status.can_transition_to(next) {
                    return Err(StoreError::InvalidTransition {
                        from: current.status,
                        to: next,
                    });
                }
                if next == TrackStatus::Approved {
                    updated.order_index = Some(inner.next_order_index(current.session_id));
                }
                updated.status = next;
            }
            if let Some(media_id) = patch.media_id {
                updated.media_id = Some(media_id);
            }
            if let Some(played_at) = patch.played_at {
                updated.played_at = Some(played_at);
            }

            inner.tracks.insert(track_id, updated.clone());
            updated
        };

        self.feed.publish(TrackChange::update(track.clone())).await;
        Ok(track)
    }

    async fn tracks_by_status(
        &self,
        session_id: Uuid,
        status: TrackStatus,
    ) -> Result<Vec<Track>, StoreError> {
        let inner = self.inner.lock().await;
        let mut tracks: Vec<Track> = inner
            .tracks
            .values()
            .filter(|t| t.session_id == session_id && t.status == status)
            .cloned()
            .collect();

        match status {
            TrackStatus::Approved => tracks.sort_by(Track::approved_order),
            _ => tracks.sort_by(Track::pending_order),
        }
        Ok(tracks)
    }

    async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<TrackChange> {
        self.feed.subscribe(session_id).await
    }

    async fn create_session(&self, host_id: &str, name: &str) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4(),
            host_id: host_id.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.inner
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let session = {
            let mut inner = self.inner.lock().await;
            let session = inner
                .sessions
                .get_mut(&session_id)
                .ok_or(StoreError::SessionNotFound(session_id))?;
            if session.is_active {
                session.is_active = false;
                session.ended_at = Some(Utc::now());
            }
            session.clone()
        };

        self.feed.remove(session_id).await;
        Ok(session)
    }

    async fn active_session(&self, host_id: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.host_id == host_id && s.is_active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(&session_id).cloned())
    }
}
