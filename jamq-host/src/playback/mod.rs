//! Now-playing state machine
//!
//! Tracks one playback slot per session: `Idle → Loading → Ready →
//! Playing ⇄ Paused`, with `Loading → Error` when no provider can
//! resolve the track and any state dropping back to `Idle` when the
//! head of the approved queue changes.
//!
//! Resolution runs in a spawned task so the owning loop never blocks on
//! the network. Every outcome is tagged with the track id it was issued
//! for; an outcome whose tag no longer matches the current head is
//! discarded, and head changes abort the in-flight task outright.

pub mod player;

pub use player::{PlayerControl, PlayerEvent, SsePlayer};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jamq_common::events::PlaybackPhase;
use jamq_common::model::Track;

use crate::resolver::{is_valid_media_id, MediaRef, MediaResolver};

/// Result of one resolution attempt, tagged with the track it was for
#[derive(Debug)]
pub struct ResolutionOutcome {
    pub track_id: Uuid,
    pub media: Option<MediaRef>,
    /// True when the media id came from an earlier resolution stored on
    /// the track, so callers skip re-persisting it
    pub cached: bool,
}

/// What applying a resolution outcome did
#[derive(Debug)]
pub enum ResolveEffect {
    /// Outcome was for a track that is no longer the head; dropped
    Stale,
    /// Every provider came up empty; the track is stuck in `Error`
    Failed,
    /// Media loaded and playback commanded
    Started(MediaRef),
}

/// Resolve a track, preferring the precise query first
///
/// "artist title official audio" biases search away from live cuts and
/// fan uploads; when that finds nothing the bare "artist title" query
/// gets a second chance before the track is declared unresolvable.
pub async fn resolve_with_fallback(
    resolver: &MediaResolver,
    artist: &str,
    title: &str,
) -> Option<MediaRef> {
    let base = if artist.is_empty() {
        title.to_string()
    } else {
        format!("{} {}", artist, title)
    };

    if let Some(media) = resolver.resolve(&format!("{} official audio", base)).await {
        return Some(media);
    }
    resolver.resolve(&base).await
}

/// Single now-playing slot for one session
pub struct PlaybackSession {
    phase: PlaybackPhase,
    current: Option<Track>,
    /// Media the player was told to load, kept for matching late
    /// ended-reports against the track they belong to
    media: Option<MediaRef>,
    /// Latch so duplicate ended-reports advance the queue only once
    advance_sent: bool,
    resolve_task: Option<JoinHandle<()>>,
    resolver: Arc<MediaResolver>,
    player: Arc<dyn PlayerControl>,
    outcome_tx: mpsc::Sender<ResolutionOutcome>,
}

impl PlaybackSession {
    pub fn new(
        resolver: Arc<MediaResolver>,
        player: Arc<dyn PlayerControl>,
        outcome_tx: mpsc::Sender<ResolutionOutcome>,
    ) -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            current: None,
            media: None,
            advance_sent: false,
            resolve_task: None,
            resolver,
            player,
            outcome_tx,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn current_track_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|t| t.id)
    }

    pub fn media_id(&self) -> Option<&str> {
        self.media.as_ref().map(|m| m.media_id.as_str())
    }

    /// Point the slot at the queue head
    ///
    /// The same track id is a no-op, so queue reloads and re-delivered
    /// notifications never restart a track that is already loaded.
    pub async fn set_head(&mut self, head: Option<Track>) {
        match (&self.current, &head) {
            (Some(cur), Some(new)) if cur.id == new.id => return,
            (None, None) => return,
            _ => {}
        }

        if let Some(task) = self.resolve_task.take() {
            task.abort();
        }
        self.advance_sent = false;
        self.media = None;

        match head {
            None => {
                let was_playing = matches!(self.phase, PlaybackPhase::Playing);
                self.current = None;
                self.phase = PlaybackPhase::Idle;
                info!("Queue drained, playback idle");
                if was_playing {
                    self.player.pause().await;
                }
            }
            Some(track) => {
                debug!(track_id = %track.id, title = %track.title, "Loading new head");
                self.phase = PlaybackPhase::Loading;
                self.resolve_task = Some(self.spawn_resolution(&track));
                self.current = Some(track);
            }
        }
    }

    fn spawn_resolution(&self, track: &Track) -> JoinHandle<()> {
        let resolver = Arc::clone(&self.resolver);
        let outcome_tx = self.outcome_tx.clone();
        let track_id = track.id;
        let stored = track.media_id.clone();
        let artist = track.artist.clone();
        let title = track.title.clone();

        tokio::spawn(async move {
            let outcome = match stored.filter(|id| is_valid_media_id(id)) {
                Some(media_id) => ResolutionOutcome {
                    track_id,
                    media: Some(MediaRef {
                        media_id,
                        title,
                        author: artist,
                        provider: "stored".to_string(),
                    }),
                    cached: true,
                },
                None => ResolutionOutcome {
                    track_id,
                    media: resolve_with_fallback(&resolver, &artist, &title).await,
                    cached: false,
                },
            };
            // Receiver gone means the session shut down mid-flight
            let _ = outcome_tx.send(outcome).await;
        })
    }

    /// Apply a resolution outcome delivered from the spawned task
    pub async fn on_resolution(&mut self, outcome: ResolutionOutcome) -> ResolveEffect {
        if self.current_track_id() != Some(outcome.track_id) {
            debug!(track_id = %outcome.track_id, "Discarding stale resolution");
            return ResolveEffect::Stale;
        }
        self.resolve_task = None;

        match outcome.media {
            None => {
                warn!(track_id = %outcome.track_id, "No provider could resolve track");
                self.phase = PlaybackPhase::Error;
                ResolveEffect::Failed
            }
            Some(media) => {
                self.player.load(&media.media_id).await;
                self.phase = PlaybackPhase::Ready;
                self.player.play().await;
                self.phase = PlaybackPhase::Playing;
                info!(
                    track_id = %outcome.track_id,
                    media_id = %media.media_id,
                    provider = %media.provider,
                    cached = outcome.cached,
                    "Playback started"
                );
                self.media = Some(media.clone());
                ResolveEffect::Started(media)
            }
        }
    }

    /// Apply a state report from the remote player
    ///
    /// Returns the track id to advance past when the current track
    /// finished, `None` otherwise.
    pub fn on_player_event(&mut self, event: PlayerEvent) -> Option<Uuid> {
        let current_id = self.current_track_id()?;

        match event {
            PlayerEvent::Playing => {
                self.phase = PlaybackPhase::Playing;
                None
            }
            PlayerEvent::Paused => {
                self.phase = PlaybackPhase::Paused;
                None
            }
            PlayerEvent::Failed { code } => {
                warn!(track_id = %current_id, code, "Player reported failure");
                self.phase = PlaybackPhase::Error;
                None
            }
            PlayerEvent::Ended { media_id } => {
                // Nothing has been handed to the player for this track
                // yet; an ended report here can only be about an earlier
                // track the queue already moved past
                if !matches!(
                    self.phase,
                    PlaybackPhase::Ready | PlaybackPhase::Playing | PlaybackPhase::Paused
                ) {
                    debug!(track_id = %current_id, phase = %self.phase, "Ignoring ended report, nothing loaded");
                    return None;
                }
                if let (Some(reported), Some(loaded)) = (&media_id, self.media_id()) {
                    if reported != loaded {
                        debug!(
                            reported = %reported,
                            loaded = %loaded,
                            "Ignoring ended report for replaced media"
                        );
                        return None;
                    }
                }
                if self.advance_sent {
                    debug!(track_id = %current_id, "Duplicate ended report");
                    return None;
                }
                self.advance_sent = true;
                Some(current_id)
            }
        }
    }

    pub async fn play(&self) {
        self.player.play().await;
    }

    pub async fn pause(&self) {
        self.player.pause().await;
    }

    pub async fn mute(&self) {
        self.player.mute().await;
    }

    pub async fn unmute(&self) {
        self.player.unmute().await;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        // Resolution task must not outlive the session
        if let Some(task) = self.resolve_task.take() {
            task.abort();
        }
    }
}
