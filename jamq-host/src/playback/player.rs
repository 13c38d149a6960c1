//! Player control seam
//!
//! The host never touches an audio pipeline itself. Playback happens in
//! the guests' and host's browsers, which hold an embedded player; the
//! host only issues commands over the session event stream and consumes
//! the state reports the player posts back.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use jamq_common::events::{PlayerCommand, SessionEvent};

/// Command surface of the remote player
///
/// Calls are fire-and-forget: delivery and execution are observed
/// through [`PlayerEvent`] reports, not return values.
#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn load(&self, media_id: &str);
    async fn play(&self);
    async fn pause(&self);
    async fn mute(&self);
    async fn unmute(&self);
}

/// State report posted by the embedded player
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PlayerEvent {
    Playing,
    Paused,
    /// The loaded media finished. Carries the media id the player was
    /// on so a late report from an already-replaced track is
    /// distinguishable from the current one.
    Ended { media_id: Option<String> },
    Failed { code: i32 },
}

/// [`PlayerControl`] that forwards commands onto the session event
/// stream, where connected browsers pick them up
pub struct SsePlayer {
    events: broadcast::Sender<SessionEvent>,
}

impl SsePlayer {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self { events }
    }

    fn emit(&self, command: PlayerCommand) {
        debug!(?command, "Forwarding player command");
        // Nobody connected means nobody to command; drop it
        let _ = self.events.send(SessionEvent::PlayerCommand {
            command,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl PlayerControl for SsePlayer {
    async fn load(&self, media_id: &str) {
        self.emit(PlayerCommand::Load {
            media_id: media_id.to_string(),
        });
    }

    async fn play(&self) {
        self.emit(PlayerCommand::Play);
    }

    async fn pause(&self) {
        self.emit(PlayerCommand::Pause);
    }

    async fn mute(&self) {
        self.emit(PlayerCommand::Mute);
    }

    async fn unmute(&self) {
        self.emit(PlayerCommand::Unmute);
    }
}
