//! Single owner of the playback snapshot.
//!
//! The store reconciles three triggers: player notifications, popover
//! visibility (which drives the position poll) and user commands (applied
//! optimistically). Every change replaces the snapshot wholesale and is
//! fanned out to listeners in registration order.

use crate::artwork::{ArtworkResolver, ArtworkTask};
use crate::config::SyncConfig;
use crate::controller::{PlayerController, RunningPlayer};
use crate::model::{Artwork, PlaybackSnapshot, PlayerPhase, Track, TrackChanged, TrackKey};
use crate::poller::{PositionPoller, TickSink};
use crate::script::ScriptHost;
use log::{debug, info};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub type Listener = Box<dyn FnMut(&PlaybackSnapshot) + Send>;
pub type TrackListener = Box<dyn FnMut(&TrackChanged) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Player state carried by a change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifiedState {
    Playing,
    Paused,
    Stopped,
    Other(String),
}

impl NotifiedState {
    pub fn parse(value: &str) -> Self {
        match value {
            "Playing" => NotifiedState::Playing,
            "Paused" => NotifiedState::Paused,
            "Stopped" => NotifiedState::Stopped,
            other => NotifiedState::Other(other.to_string()),
        }
    }
}

/// Payload of the player's change notification. Only the player state is
/// trusted; everything else is re-queried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerNotification {
    pub player_state: Option<NotifiedState>,
}

impl PlayerNotification {
    pub fn with_player_state(value: &str) -> Self {
        Self {
            player_state: Some(NotifiedState::parse(value)),
        }
    }

    fn is_stopped(&self) -> bool {
        self.player_state == Some(NotifiedState::Stopped)
    }
}

struct PendingArtwork {
    key: TrackKey,
    task: ArtworkTask,
}

pub struct PlaybackStore<H> {
    controller: Arc<PlayerController<H>>,
    resolver: ArtworkResolver<H>,
    snapshot: PlaybackSnapshot,
    poller: PositionPoller,
    favorite_debounce: Duration,
    last_favorite_toggle: Option<Instant>,
    pending_artwork: Vec<PendingArtwork>,
    /// Last track every artwork tier came up empty for.
    artwork_miss: Option<TrackKey>,
    listeners: Vec<(ListenerId, Listener)>,
    track_listeners: Vec<(ListenerId, TrackListener)>,
    next_listener_id: u64,
}

impl<H: ScriptHost> PlaybackStore<H> {
    pub fn new(
        controller: Arc<PlayerController<H>>,
        resolver: ArtworkResolver<H>,
        sync: &SyncConfig,
        poll_sink: TickSink,
    ) -> Self {
        Self {
            controller,
            resolver,
            snapshot: PlaybackSnapshot::not_running(),
            poller: PositionPoller::new(sync.position_poll_interval(), poll_sink),
            favorite_debounce: sync.favorite_debounce(),
            last_favorite_toggle: None,
            pending_artwork: Vec::new(),
            artwork_miss: None,
            listeners: Vec::new(),
            track_listeners: Vec::new(),
            next_listener_id: 1,
        }
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    pub fn controller(&self) -> &PlayerController<H> {
        &self.controller
    }

    pub fn poller(&self) -> &PositionPoller {
        &self.poller
    }

    pub fn has_pending_artwork(&self) -> bool {
        !self.pending_artwork.is_empty()
    }

    /// Initial sync at startup.
    pub fn setup(&mut self) {
        self.refresh();
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&PlaybackSnapshot) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        before != self.listeners.len()
    }

    pub fn subscribe_track_changed(
        &mut self,
        listener: impl FnMut(&TrackChanged) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.track_listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe_track_changed(&mut self, id: ListenerId) -> bool {
        let before = self.track_listeners.len();
        self.track_listeners.retain(|(existing, _)| *existing != id);
        before != self.track_listeners.len()
    }

    /// Re-derives the snapshot from the player after a change
    /// notification. Tracks whose artwork lookup came up empty are tried
    /// again, since the miss may have been a network failure.
    pub fn reconcile(&mut self, notification: Option<&PlayerNotification>) {
        self.artwork_miss = None;
        self.reconcile_with(notification);
    }

    /// Periodic reconciliation. Unlike [`reconcile`](Self::reconcile) it
    /// does not retry artwork for a track that already missed.
    pub fn refresh(&mut self) {
        self.reconcile_with(None);
    }

    fn reconcile_with(&mut self, notification: Option<&PlayerNotification>) {
        let controller = Arc::clone(&self.controller);
        let stopped = notification.is_some_and(PlayerNotification::is_stopped);
        let player = if stopped { None } else { controller.running() };
        let Some(player) = player else {
            self.enter_not_running();
            self.broadcast_track_changed();
            return;
        };

        let is_playing = player.is_playing();
        let mut track = player.current_track().unwrap_or_default();

        let is_favorited = if self.favorite_debounce_active() {
            debug!("favorite toggled recently, keeping local value");
            self.snapshot.is_favorited
        } else {
            player.is_favorited()
        };

        let same_track = track.same_identity(&self.snapshot.track);
        let (track_duration_secs, seeker_position_secs) = if track.is_empty() {
            (0.0, 0.0)
        } else {
            let position = if same_track {
                self.snapshot.seeker_position_secs
            } else {
                0.0
            };
            (player.track_duration_secs(), position)
        };

        if same_track {
            track.artwork = self.snapshot.track.artwork.clone();
        } else if !track.is_empty() {
            info!("now playing: {} - {}", track.title, track.artist);
        }
        if !track.is_empty() && track.artwork.is_none() {
            track.artwork = self.request_artwork(&player, &track);
        }

        self.replace(PlaybackSnapshot {
            track,
            is_playing,
            is_favorited,
            track_duration_secs,
            seeker_position_secs,
            external_app_running: true,
        });
        self.broadcast_track_changed();
    }

    pub fn popover_will_show(&mut self) {
        self.poller.start();
    }

    pub fn popover_did_close(&mut self) {
        self.poller.stop();
    }

    /// Handles one position-poll tick. A player that quit since the last
    /// reconciliation moves the snapshot to not-running.
    pub fn poll_position(&mut self) {
        let controller = Arc::clone(&self.controller);
        let Some(player) = controller.running() else {
            if self.snapshot.phase() != PlayerPhase::NotRunning {
                self.enter_not_running();
                self.broadcast_track_changed();
            }
            return;
        };
        let seeker_position_secs = player.player_position_secs();
        self.replace(PlaybackSnapshot {
            seeker_position_secs,
            ..self.snapshot.clone()
        });
    }

    pub fn toggle_play_pause(&mut self) {
        let controller = Arc::clone(&self.controller);
        let Some(player) = controller.running() else {
            debug!("ignoring play/pause, player not running");
            return;
        };
        self.replace(PlaybackSnapshot {
            is_playing: !self.snapshot.is_playing,
            ..self.snapshot.clone()
        });
        self.broadcast_track_changed();
        player.play_pause();
    }

    pub fn toggle_favorite(&mut self) {
        let controller = Arc::clone(&self.controller);
        let Some(player) = controller.running() else {
            debug!("ignoring favorite toggle, player not running");
            return;
        };
        let is_favorited = !self.snapshot.is_favorited;
        self.last_favorite_toggle = Some(Instant::now());
        self.replace(PlaybackSnapshot {
            is_favorited,
            ..self.snapshot.clone()
        });
        player.set_favorited(is_favorited);
    }

    pub fn next_track(&mut self) {
        self.controller.next_track();
    }

    pub fn previous_track(&mut self) {
        self.controller.previous_track();
    }

    /// Applies finished artwork lookups. Results for a track that is no
    /// longer current are dropped. Returns whether the snapshot changed.
    pub fn drain_artwork(&mut self) -> bool {
        let mut changed = false;
        let mut still_pending = Vec::new();

        for mut pending in std::mem::take(&mut self.pending_artwork) {
            let Some(result) = pending.task.try_complete() else {
                still_pending.push(pending);
                continue;
            };

            if pending.key != self.snapshot.track.key() {
                debug!("discarding stale artwork for {}", pending.key.title);
                continue;
            }

            match result {
                Some(artwork) => {
                    debug!("artwork resolved ({} bytes)", artwork.len());
                    self.snapshot = PlaybackSnapshot {
                        track: self.snapshot.track.with_artwork(Some(artwork)),
                        ..self.snapshot.clone()
                    };
                    changed = true;
                }
                None => self.artwork_miss = Some(pending.key),
            }
        }

        self.pending_artwork = still_pending;
        if changed {
            self.notify_listeners();
        }
        changed
    }

    /// Starts artwork resolution. Returns the artwork right away when a
    /// local tier produced it.
    fn request_artwork(
        &mut self,
        player: &RunningPlayer<'_, H>,
        track: &Track,
    ) -> Option<Artwork> {
        let key = track.key();
        if self.artwork_miss.as_ref() == Some(&key)
            || self.pending_artwork.iter().any(|pending| pending.key == key)
        {
            return None;
        }

        let mut task = self.resolver.resolve_on(player, track);
        match task.try_complete() {
            Some(Some(artwork)) => Some(artwork),
            Some(None) => {
                self.artwork_miss = Some(key);
                None
            }
            None => {
                self.pending_artwork.push(PendingArtwork { key, task });
                None
            }
        }
    }

    fn enter_not_running(&mut self) {
        if self.snapshot.phase() != PlayerPhase::NotRunning {
            info!("player not running");
        }
        self.replace(PlaybackSnapshot::not_running());
    }

    fn favorite_debounce_active(&self) -> bool {
        self.last_favorite_toggle
            .is_some_and(|at| at.elapsed() <= self.favorite_debounce)
    }

    fn replace(&mut self, snapshot: PlaybackSnapshot) {
        self.snapshot = snapshot;
        self.notify_listeners();
    }

    fn notify_listeners(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(&self.snapshot);
        }
    }

    fn broadcast_track_changed(&mut self) {
        let event = self.snapshot.track_changed();
        for (_, listener) in self.track_listeners.iter_mut() {
            listener(&event);
        }
    }

    fn next_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        id
    }
}
