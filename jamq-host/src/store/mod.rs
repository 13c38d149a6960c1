//! Track and session persistence
//!
//! `TrackStore` is the storage contract the rest of the daemon programs
//! against: guest submissions in, row-level change notifications out.
//! Implementations publish every committed write into a shared
//! [`ChangeFeed`](jamq_common::events::ChangeFeed) so queue projections
//! can follow along without polling.
//!
//! Two implementations: [`MemoryTrackStore`] for tests and zero-setup
//! demos, [`SqliteTrackStore`] for durable hosting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use jamq_common::events::TrackChange;
use jamq_common::model::{Session, Track, TrackStatus};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTrackStore;
pub use sqlite::SqliteTrackStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Track not found: {0}")]
    TrackNotFound(Uuid),

    /// The session has ended and refuses new submissions
    #[error("Session already ended: {0}")]
    SessionEnded(Uuid),

    /// The requested status change is not on the curation graph
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: TrackStatus,
        to: TrackStatus,
    },
}

/// A new guest submission
///
/// The store assigns id, submission time, and pending status; callers
/// never pick those.
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub session_id: Uuid,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub cover_url: Option<String>,
    pub suggested_by: Option<String>,
}

/// Partial track update
///
/// Only populated fields change. A status change is validated against
/// the curation graph; moving to approved makes the store assign the
/// next order index within the session.
#[derive(Debug, Clone, Default)]
pub struct TrackPatch {
    pub status: Option<TrackStatus>,
    pub media_id: Option<String>,
    pub played_at: Option<DateTime<Utc>>,
}

impl TrackPatch {
    /// Patch that only moves the status
    pub fn status(status: TrackStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch recording a finished play
    pub fn played(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(TrackStatus::Played),
            played_at: Some(at),
            ..Default::default()
        }
    }

    /// Patch recording a successful media resolution
    pub fn media(media_id: String) -> Self {
        Self {
            media_id: Some(media_id),
            ..Default::default()
        }
    }
}

/// Storage contract for tracks and sessions
#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Insert a guest submission as pending
    ///
    /// Fails with [`StoreError::SessionEnded`] once the session is over.
    async fn insert_track(&self, new: NewTrack) -> Result<Track, StoreError>;

    /// Apply a partial update, returning the row after the change
    async fn update_track(&self, track_id: Uuid, patch: TrackPatch) -> Result<Track, StoreError>;

    /// Tracks of one status within a session, in queue order
    ///
    /// Pending tracks come back in submission order; approved tracks in
    /// order-index order with submission time as the tie-break.
    async fn tracks_by_status(
        &self,
        session_id: Uuid,
        status: TrackStatus,
    ) -> Result<Vec<Track>, StoreError>;

    /// Subscribe to row-level changes for one session
    ///
    /// Unsubscribe by dropping the receiver.
    async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<TrackChange>;

    /// Create a new active session for a host
    async fn create_session(&self, host_id: &str, name: &str) -> Result<Session, StoreError>;

    /// End a session; idempotent
    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError>;

    /// Most recently created active session for a host, if any
    async fn active_session(&self, host_id: &str) -> Result<Option<Session>, StoreError>;

    /// Look up a session by id
    async fn session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;
}
