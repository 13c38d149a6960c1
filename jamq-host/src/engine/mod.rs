//! Session engine
//!
//! One actor task per active session owns that session's queue
//! projection and playback slot. Everything that touches them flows
//! through the engine's command channel or its change subscription, so
//! the projection is only ever mutated from one place and no locks leak
//! into the API layer.
//!
//! The loop multiplexes four sources: host commands (approve, reject,
//! skip, transport), row-level change notifications from the store,
//! resolution outcomes from the playback slot's spawned lookups, and a
//! periodic reconcile tick that reloads the projection from the store
//! to repair any drift a lossy feed left behind.
//!
//! Engines are spawned lazily by the [`SessionRegistry`] on first use
//! and restart from store state after a crash; nothing in here is
//! memory-only except the projection itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use jamq_common::events::{PlaybackPhase, SessionEvent, TrackChange};
use jamq_common::model::Track;

use crate::config::EngineConfig;
use crate::playback::{PlaybackSession, PlayerEvent, ResolutionOutcome, ResolveEffect, SsePlayer};
use crate::queue::QueueController;
use crate::resolver::MediaResolver;
use crate::store::{StoreError, TrackStore};

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// The engine task is gone; commands cannot be delivered
    #[error("Session engine stopped")]
    Stopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Host transport controls, forwarded to the embedded player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Pause,
    Mute,
    Unmute,
}

/// Point-in-time view of one session's queue and playback
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub pending: Vec<Track>,
    pub approved: Vec<Track>,
    /// Track currently occupying the playback slot
    pub head: Option<Track>,
    pub phase: PlaybackPhase,
    /// Media loaded in the player, for clients resuming mid-session
    pub media_id: Option<String>,
}

/// Commands delivered to a session engine
pub enum EngineCommand {
    Approve {
        track_id: Uuid,
        reply: oneshot::Sender<Result<Track, StoreError>>,
    },
    Reject {
        track_id: Uuid,
        reply: oneshot::Sender<Result<Track, StoreError>>,
    },
    /// Advance past the current head, marking it played
    Skip {
        reply: oneshot::Sender<Result<Option<Track>, StoreError>>,
    },
    Transport(TransportCommand),
    /// State report posted by the embedded player
    Player(PlayerEvent),
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Shutdown,
}

/// Per-session actor: queue projection + playback slot + event fan-out
struct SessionEngine {
    session_id: Uuid,
    store: Arc<dyn TrackStore>,
    queue: QueueController,
    playback: PlaybackSession,
    commands: mpsc::Receiver<EngineCommand>,
    changes: broadcast::Receiver<TrackChange>,
    outcomes: mpsc::Receiver<ResolutionOutcome>,
    events: broadcast::Sender<SessionEvent>,
    reconcile_interval: Duration,
}

impl SessionEngine {
    async fn run(mut self) {
        info!(session_id = %self.session_id, "Session engine starting");

        if let Err(e) = self.queue.load().await {
            error!(session_id = %self.session_id, error = %e, "Initial projection load failed");
        }
        self.sync_playback().await;

        // First tick lands one full interval out; the initial load above
        // already covered now
        let mut reconcile = interval_at(
            Instant::now() + self.reconcile_interval,
            self.reconcile_interval,
        );
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None => break,
                        Some(EngineCommand::Shutdown) => {
                            let _ = self.events.send(SessionEvent::SessionEnded {
                                session_id: self.session_id,
                                timestamp: Utc::now(),
                            });
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }
                change = self.changes.recv() => self.handle_change(change).await,
                Some(outcome) = self.outcomes.recv() => self.handle_outcome(outcome).await,
                _ = reconcile.tick() => self.reconcile().await,
            }
        }

        info!(session_id = %self.session_id, "Session engine stopped");
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Approve { track_id, reply } => {
                let _ = reply.send(self.queue.approve(track_id).await);
            }
            EngineCommand::Reject { track_id, reply } => {
                let _ = reply.send(self.queue.reject(track_id).await);
            }
            EngineCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            EngineCommand::Transport(transport) => match transport {
                TransportCommand::Play => self.playback.play().await,
                TransportCommand::Pause => self.playback.pause().await,
                TransportCommand::Mute => self.playback.mute().await,
                TransportCommand::Unmute => self.playback.unmute().await,
            },
            EngineCommand::Player(event) => self.handle_player_event(event).await,
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop before dispatch
            EngineCommand::Shutdown => {}
        }
    }

    /// Mark the current head played so the queue moves on
    ///
    /// Also the host's way out when the head is stuck in `Error`. The
    /// projection catches up when the change notification arrives.
    async fn skip(&mut self) -> Result<Option<Track>, StoreError> {
        let Some(head) = self.queue.current_head() else {
            return Ok(None);
        };
        let head_id = head.id;
        info!(session_id = %self.session_id, track_id = %head_id, "Skipping current head");
        self.queue.advance(head_id).await.map(Some)
    }

    async fn handle_player_event(&mut self, event: PlayerEvent) {
        let before = self.playback_fingerprint();
        if let Some(track_id) = self.playback.on_player_event(event) {
            info!(session_id = %self.session_id, track_id = %track_id, "Track finished, advancing");
            if let Err(e) = self.queue.advance(track_id).await {
                error!(
                    session_id = %self.session_id,
                    track_id = %track_id,
                    error = %e,
                    "Failed to mark track played"
                );
            }
        }
        self.publish_playback_if_changed(before);
    }

    async fn handle_change(&mut self, change: Result<TrackChange, RecvError>) {
        match change {
            Ok(change) => {
                self.queue.apply(&change);
                let _ = self.events.send(SessionEvent::TrackChanged {
                    change,
                    timestamp: Utc::now(),
                });
                self.publish_queue();
                self.sync_playback().await;
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(
                    session_id = %self.session_id,
                    missed,
                    "Change feed lagged, reloading projection"
                );
                self.reconcile().await;
            }
            Err(RecvError::Closed) => {
                // The feed channel was dropped out from under us; take a
                // fresh subscription and reload to cover the gap
                warn!(session_id = %self.session_id, "Change feed closed, resubscribing");
                self.changes = self.store.subscribe(self.session_id).await;
                self.reconcile().await;
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: ResolutionOutcome) {
        let before = self.playback_fingerprint();
        let track_id = outcome.track_id;
        let cached = outcome.cached;

        if let ResolveEffect::Started(media) = self.playback.on_resolution(outcome).await {
            if !cached {
                if let Err(e) = self.queue.record_media(track_id, media.media_id.clone()).await {
                    warn!(
                        session_id = %self.session_id,
                        track_id = %track_id,
                        error = %e,
                        "Failed to persist resolved media id"
                    );
                }
            }
        }
        self.publish_playback_if_changed(before);
    }

    /// Reload the projection from the store and re-publish it
    async fn reconcile(&mut self) {
        if let Err(e) = self.queue.load().await {
            warn!(session_id = %self.session_id, error = %e, "Projection reload failed");
            return;
        }
        self.publish_queue();
        self.sync_playback().await;
    }

    /// Point the playback slot at the current queue head
    async fn sync_playback(&mut self) {
        let before = self.playback_fingerprint();
        let head = self.queue.current_head().cloned();
        self.playback.set_head(head).await;
        self.publish_playback_if_changed(before);
    }

    fn playback_fingerprint(&self) -> (PlaybackPhase, Option<Uuid>) {
        (self.playback.phase(), self.playback.current_track_id())
    }

    fn publish_playback_if_changed(&self, before: (PlaybackPhase, Option<Uuid>)) {
        if self.playback_fingerprint() == before {
            return;
        }
        let _ = self.events.send(SessionEvent::PlaybackChanged {
            phase: self.playback.phase(),
            track_id: self.playback.current_track_id(),
            media_id: self.playback.media_id().map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    fn publish_queue(&self) {
        let _ = self.events.send(SessionEvent::QueueChanged {
            pending: self.queue.pending().to_vec(),
            approved: self.queue.approved().to_vec(),
            timestamp: Utc::now(),
        });
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.queue.pending().to_vec(),
            approved: self.queue.approved().to_vec(),
            head: self.playback.current().cloned(),
            phase: self.playback.phase(),
            media_id: self.playback.media_id().map(str::to_string),
        }
    }
}

/// Cheap, cloneable handle to one session's engine
#[derive(Clone)]
pub struct EngineHandle {
    session_id: Uuid,
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl EngineHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to this session's event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn approve(&self, track_id: Uuid) -> Result<Track, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Approve { track_id, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await
            .map_err(|_| EngineError::Stopped)?
            .map_err(EngineError::from)
    }

    pub async fn reject(&self, track_id: Uuid) -> Result<Track, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Reject { track_id, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await
            .map_err(|_| EngineError::Stopped)?
            .map_err(EngineError::from)
    }

    /// Skip the current head; `None` when the queue was already empty
    pub async fn skip(&self) -> Result<Option<Track>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Skip { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await
            .map_err(|_| EngineError::Stopped)?
            .map_err(EngineError::from)
    }

    pub async fn transport(&self, command: TransportCommand) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::Transport(command))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Forward a state report from the embedded player
    pub async fn player_event(&self, event: PlayerEvent) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::Player(event))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Snapshot { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Ask the engine to announce the end and stop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
    }
}

/// Spawns and tracks one engine per active session
pub struct SessionRegistry {
    store: Arc<dyn TrackStore>,
    resolver: Arc<MediaResolver>,
    config: EngineConfig,
    engines: Mutex<HashMap<Uuid, EngineHandle>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn TrackStore>, resolver: Arc<MediaResolver>, config: EngineConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            engines: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for an active session's engine, spawning it on first use
    ///
    /// Ended sessions are refused; a handle whose engine died is
    /// replaced with a fresh spawn, which rebuilds its projection from
    /// the store.
    pub async fn engine(&self, session_id: Uuid) -> Result<EngineHandle, EngineError> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        if session.ended_at.is_some() {
            return Err(EngineError::Store(StoreError::SessionEnded(session_id)));
        }

        let mut engines = self.engines.lock().await;
        if let Some(handle) = engines.get(&session_id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            warn!(session_id = %session_id, "Session engine died, respawning");
        }

        let handle = self.spawn(session_id).await;
        engines.insert(session_id, handle.clone());
        Ok(handle)
    }

    /// Stop a session's engine and forget the handle
    ///
    /// Idempotent; a session with no engine is a no-op.
    pub async fn shutdown(&self, session_id: Uuid) {
        let handle = self.engines.lock().await.remove(&session_id);
        if let Some(handle) = handle {
            info!(session_id = %session_id, "Shutting down session engine");
            handle.shutdown().await;
        }
    }

    async fn spawn(&self, session_id: Uuid) -> EngineHandle {
        info!(session_id = %session_id, "Spawning session engine");

        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer);
        let (event_tx, _) = broadcast::channel(self.config.event_capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel(16);

        let changes = self.store.subscribe(session_id).await;
        let playback = PlaybackSession::new(
            Arc::clone(&self.resolver),
            Arc::new(SsePlayer::new(event_tx.clone())),
            outcome_tx,
        );

        let engine = SessionEngine {
            session_id,
            store: Arc::clone(&self.store),
            queue: QueueController::new(session_id, Arc::clone(&self.store)),
            playback,
            commands: command_rx,
            changes,
            outcomes: outcome_rx,
            events: event_tx.clone(),
            reconcile_interval: Duration::from_secs(self.config.reconcile_interval_secs),
        };
        tokio::spawn(engine.run());

        EngineHandle {
            session_id,
            commands: command_tx,
            events: event_tx,
        }
    }
}
