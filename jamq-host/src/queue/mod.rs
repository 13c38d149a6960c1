//! Queue controller
//!
//! Owns the derived pending/approved projection for one session. The
//! projection is rebuilt from the store on load and then maintained
//! incrementally from row-level change notifications.
//!
//! Change handling is set-membership based: every notification carries
//! the full row and is applied as "this row now belongs in list X",
//! which makes the projection idempotent under re-delivery and
//! convergent under reordering. Curation writes (approve, reject,
//! advance) go to the store only; the projection never mutates
//! optimistically and catches up when the change notification arrives.

use std::sync::Arc;
use uuid::Uuid;

use chrono::Utc;
use tracing::trace;

use jamq_common::events::{ChangeKind, TrackChange};
use jamq_common::model::{Track, TrackStatus};

use crate::store::{StoreError, TrackPatch, TrackStore};

/// Pending/approved projection plus curation write-through
pub struct QueueController {
    session_id: Uuid,
    store: Arc<dyn TrackStore>,

    /// Guest submissions awaiting review, in submission order
    pending: Vec<Track>,

    /// Host-approved play queue, in order-index order
    approved: Vec<Track>,
}

impl QueueController {
    /// Create an empty projection for one session
    pub fn new(session_id: Uuid, store: Arc<dyn TrackStore>) -> Self {
        Self {
            session_id,
            store,
            pending: Vec::new(),
            approved: Vec::new(),
        }
    }

    /// Rebuild the projection from the store
    ///
    /// Replaces both lists only after both queries succeed, so a failed
    /// reload leaves the previous (stale but coherent) projection.
    pub async fn load(&mut self) -> Result<(), StoreError> {
        let pending = self
            .store
            .tracks_by_status(self.session_id, TrackStatus::Pending)
            .await?;
        let approved = self
            .store
            .tracks_by_status(self.session_id, TrackStatus::Approved)
            .await?;

        self.pending = pending;
        self.approved = approved;
        Ok(())
    }

    /// Apply one row-level change to the projection
    ///
    /// Safe to call with duplicated or reordered notifications; changes
    /// for other sessions are ignored.
    pub fn apply(&mut self, change: &TrackChange) {
        if change.track.session_id != self.session_id {
            return;
        }

        trace!(
            kind = ?change.kind,
            track_id = %change.track.id,
            status = %change.track.status,
            "Applying track change"
        );

        match change.kind {
            ChangeKind::Insert => {
                // A known id means this insert was already observed,
                // possibly compacted into a later update
                if self.knows(change.track.id) {
                    return;
                }
                self.place(&change.track);
            }
            ChangeKind::Update => {
                self.remove_everywhere(change.track.id);
                self.place(&change.track);
            }
            ChangeKind::Delete => {
                self.remove_everywhere(change.track.id);
            }
        }
    }

    /// Ask the store to approve a pending track
    ///
    /// The projection is untouched here; it updates when the change
    /// notification comes back around.
    pub async fn approve(&self, track_id: Uuid) -> Result<Track, StoreError> {
        self.store
            .update_track(track_id, TrackPatch::status(TrackStatus::Approved))
            .await
    }

    /// Ask the store to reject a pending track
    pub async fn reject(&self, track_id: Uuid) -> Result<Track, StoreError> {
        self.store
            .update_track(track_id, TrackPatch::status(TrackStatus::Rejected))
            .await
    }

    /// Mark a finished track as played, timestamped now
    pub async fn advance(&self, track_id: Uuid) -> Result<Track, StoreError> {
        self.store
            .update_track(track_id, TrackPatch::played(Utc::now()))
            .await
    }

    /// Persist a successful media resolution for a track
    pub async fn record_media(&self, track_id: Uuid, media_id: String) -> Result<Track, StoreError> {
        self.store
            .update_track(track_id, TrackPatch::media(media_id))
            .await
    }

    /// First track of the approved queue, if any
    pub fn current_head(&self) -> Option<&Track> {
        self.approved.first()
    }

    /// Pending submissions in review order
    pub fn pending(&self) -> &[Track] {
        &self.pending
    }

    /// Approved queue in play order
    pub fn approved(&self) -> &[Track] {
        &self.approved
    }

    fn knows(&self, track_id: Uuid) -> bool {
        self.pending.iter().any(|t| t.id == track_id)
            || self.approved.iter().any(|t| t.id == track_id)
    }

    fn remove_everywhere(&mut self, track_id: Uuid) {
        self.pending.retain(|t| t.id != track_id);
        self.approved.retain(|t| t.id != track_id);
    }

    fn place(&mut self, track: &Track) {
        match track.status {
            TrackStatus::Pending => {
                self.pending.push(track.clone());
                self.pending.sort_by(Track::pending_order);
            }
            TrackStatus::Approved => {
                self.approved.push(track.clone());
                self.approved.sort_by(Track::approved_order);
            }
            // Terminal rows leave the projection entirely
            TrackStatus::Rejected | TrackStatus::Played => {}
        }
    }
}
