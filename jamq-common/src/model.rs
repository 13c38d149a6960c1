//! Track and session data model
//!
//! A suggested track moves through a small curation graph:
//! pending → approved → played, with pending → rejected as the refusal
//! branch. Rejected and played accept no further transitions. Pending
//! tracks are ordered by submission time; approved tracks carry an order
//! index assigned by the store at approval time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Track curation status
///
/// Stored as lowercase TEXT in the database; serialized lowercase in
/// API payloads and SSE events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Submitted by a guest, awaiting host review
    Pending,
    /// Accepted by the host into the play queue
    Approved,
    /// Refused by the host
    Rejected,
    /// Finished playing (or skipped past)
    Played,
}

impl TrackStatus {
    /// Whether the status graph permits moving from `self` to `next`
    pub fn can_transition_to(self, next: TrackStatus) -> bool {
        matches!(
            (self, next),
            (TrackStatus::Pending, TrackStatus::Approved)
                | (TrackStatus::Pending, TrackStatus::Rejected)
                | (TrackStatus::Approved, TrackStatus::Played)
        )
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackStatus::Rejected | TrackStatus::Played)
    }

    /// Canonical lowercase form used in the database
    pub fn as_str(self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Approved => "approved",
            TrackStatus::Rejected => "rejected",
            TrackStatus::Played => "played",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(TrackStatus::Pending),
            "approved" => Ok(TrackStatus::Approved),
            "rejected" => Ok(TrackStatus::Rejected),
            "played" => Ok(TrackStatus::Played),
            other => Err(Error::InvalidInput(format!(
                "Unknown track status: {}",
                other
            ))),
        }
    }
}

/// A guest-suggested track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique track identifier
    pub id: Uuid,

    /// Session this track belongs to
    pub session_id: Uuid,

    /// Song title as submitted (or picked from catalog search)
    pub title: String,

    /// Artist name
    pub artist: String,

    /// Album name, when known
    pub album: Option<String>,

    /// Cover artwork URL, when known
    pub cover_url: Option<String>,

    /// Resolved playable media identifier (None until resolution succeeds)
    pub media_id: Option<String>,

    /// Display name of the guest who suggested the track
    pub suggested_by: Option<String>,

    /// Current curation status
    pub status: TrackStatus,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// When playback of this track finished
    pub played_at: Option<DateTime<Utc>>,

    /// Play order within the approved queue, assigned at approval time
    pub order_index: Option<i64>,
}

impl Track {
    /// Ordering for the pending list: submission time, id as stable tie-break
    pub fn pending_order(a: &Track, b: &Track) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Ordering for the approved queue: order index ascending with
    /// unassigned indexes last, then submission time, then id
    pub fn approved_order(a: &Track, b: &Track) -> Ordering {
        match (a.order_index, b.order_index) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
    }
}

/// A hosted party session
///
/// Sessions are ended (flag cleared, timestamp recorded), never deleted,
/// so the track history stays queryable afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Opaque host identity token; no authentication is implied
    pub host_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
