//! Guest submission gateway
//!
//! Append-only entry point for guest suggestions. Validates the input,
//! inserts the track as pending, and gets out of the way: there is no
//! rate limiting and no duplicate detection, because host curation is
//! the de-duplication mechanism. Holds no state beyond the store
//! handle, so any number of guests can submit concurrently.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use jamq_common::model::Track;

use crate::store::{NewTrack, StoreError, TrackStore};

/// Submission errors
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Bad guest input, surfaced to the submitter and never retried
    #[error("Validation failed: {field} must not be empty")]
    Validation { field: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One guest suggestion as it arrives from the submission form
#[derive(Debug, Clone, Deserialize)]
pub struct TrackSubmission {
    pub guest_name: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// Validating front door for guest suggestions
#[derive(Clone)]
pub struct SubmissionGateway {
    store: Arc<dyn TrackStore>,
}

impl SubmissionGateway {
    pub fn new(store: Arc<dyn TrackStore>) -> Self {
        Self { store }
    }

    /// Validate and insert a suggestion as a pending track
    ///
    /// Guest name and title must be non-empty after trimming; every
    /// other field is optional. Store refusals (unknown or ended
    /// session) pass through untouched.
    pub async fn submit(
        &self,
        session_id: Uuid,
        submission: TrackSubmission,
    ) -> Result<Track, SubmitError> {
        let guest_name = submission.guest_name.trim();
        if guest_name.is_empty() {
            return Err(SubmitError::Validation {
                field: "guest_name",
            });
        }
        let title = submission.title.trim();
        if title.is_empty() {
            return Err(SubmitError::Validation { field: "title" });
        }

        let track = self
            .store
            .insert_track(NewTrack {
                session_id,
                title: title.to_string(),
                artist: submission.artist.trim().to_string(),
                album: blank_to_none(submission.album),
                cover_url: blank_to_none(submission.cover_url),
                suggested_by: Some(guest_name.to_string()),
            })
            .await?;

        info!(
            track_id = %track.id,
            session_id = %session_id,
            title = %track.title,
            suggested_by = %guest_name,
            "Guest suggestion accepted"
        );
        Ok(track)
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
