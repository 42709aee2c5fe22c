//! The main context: one thread owns the [`PlaybackStore`] and processes
//! commands in arrival order, so every trigger runs to completion before the
//! next one starts. Artwork workers hand their results back here.

use crate::artwork::{ArtworkCache, ArtworkResolver, CatalogClient, ItunesCatalog};
use crate::config::Config;
use crate::controller::{PermissionStatus, PlayerController};
use crate::model::{PlaybackSnapshot, TrackChanged};
use crate::poller::TickSink;
use crate::script::ScriptHost;
use crate::store::{Listener, ListenerId, PlaybackStore, PlayerNotification, TrackListener};
use log::{debug, info};
use std::{
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const ARTWORK_DRAIN_INTERVAL: Duration = Duration::from_millis(50);
const IDLE_WAIT: Duration = Duration::from_secs(1);

pub enum EngineCommand {
    PlayerNotification(Option<PlayerNotification>),
    PopoverWillShow,
    PopoverDidClose,
    TogglePlayPause,
    ToggleFavorite,
    NextTrack,
    PreviousTrack,
    PollTick,
    Subscribe(Listener, mpsc::Sender<ListenerId>),
    SubscribeTrackChanged(TrackListener, mpsc::Sender<ListenerId>),
    Unsubscribe(ListenerId),
    UnsubscribeTrackChanged(ListenerId),
    CheckPermission(mpsc::Sender<PermissionStatus>),
    Shutdown,
}

pub struct Engine;

impl Engine {
    pub fn spawn<H>(config: &Config, host: H) -> std::io::Result<EngineHandle>
    where
        H: ScriptHost + 'static,
    {
        let catalog: Arc<dyn CatalogClient> = Arc::new(ItunesCatalog::new(&config.artwork));
        Self::spawn_with_catalog(config, host, catalog)
    }

    pub fn spawn_with_catalog<H>(
        config: &Config,
        host: H,
        catalog: Arc<dyn CatalogClient>,
    ) -> std::io::Result<EngineHandle>
    where
        H: ScriptHost + 'static,
    {
        let (tx, rx) = mpsc::channel();

        let controller = Arc::new(PlayerController::new(host, config.player.clone()));
        let cache = ArtworkCache::new(config.artwork.cache_dir());
        let resolver = ArtworkResolver::new(Arc::clone(&controller), cache, catalog);

        let tick_tx = tx.clone();
        let poll_sink: TickSink = Arc::new(move || {
            let _ = tick_tx.send(EngineCommand::PollTick);
        });
        let store = PlaybackStore::new(controller, resolver, &config.sync, poll_sink);
        let reconcile_interval = config.sync.reconcile_interval();

        let thread = thread::Builder::new()
            .name("playback-engine".to_string())
            .spawn(move || run(store, rx, reconcile_interval))?;

        Ok(EngineHandle {
            tx,
            thread: Some(thread),
        })
    }
}

fn run<H: ScriptHost>(
    mut store: PlaybackStore<H>,
    rx: mpsc::Receiver<EngineCommand>,
    reconcile_interval: Option<Duration>,
) {
    info!("playback engine started");
    store.setup();
    let mut next_reconcile = reconcile_interval.map(|interval| Instant::now() + interval);

    loop {
        let now = Instant::now();
        let mut wait = next_reconcile
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(IDLE_WAIT);
        if store.has_pending_artwork() {
            wait = wait.min(ARTWORK_DRAIN_INTERVAL);
        }

        match rx.recv_timeout(wait) {
            Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(EngineCommand::PlayerNotification(notification)) => {
                store.reconcile(notification.as_ref());
                next_reconcile = reconcile_interval.map(|interval| Instant::now() + interval);
            }
            Ok(command) => handle(&mut store, command),
            Err(RecvTimeoutError::Timeout) => {}
        }

        store.drain_artwork();

        if let (Some(at), Some(interval)) = (next_reconcile, reconcile_interval) {
            if Instant::now() >= at {
                debug!("fallback reconciliation");
                store.refresh();
                next_reconcile = Some(Instant::now() + interval);
            }
        }
    }

    store.popover_did_close();
    info!("playback engine stopped");
}

fn handle<H: ScriptHost>(store: &mut PlaybackStore<H>, command: EngineCommand) {
    match command {
        EngineCommand::PopoverWillShow => store.popover_will_show(),
        EngineCommand::PopoverDidClose => store.popover_did_close(),
        EngineCommand::TogglePlayPause => store.toggle_play_pause(),
        EngineCommand::ToggleFavorite => store.toggle_favorite(),
        EngineCommand::NextTrack => store.next_track(),
        EngineCommand::PreviousTrack => store.previous_track(),
        EngineCommand::PollTick => {
            // A tick queued before the poll was stopped is stale.
            if store.poller().is_active() {
                store.poll_position();
            }
        }
        EngineCommand::Subscribe(listener, reply) => {
            let _ = reply.send(store.subscribe(listener));
        }
        EngineCommand::SubscribeTrackChanged(listener, reply) => {
            let _ = reply.send(store.subscribe_track_changed(listener));
        }
        EngineCommand::Unsubscribe(id) => {
            store.unsubscribe(id);
        }
        EngineCommand::UnsubscribeTrackChanged(id) => {
            store.unsubscribe_track_changed(id);
        }
        EngineCommand::CheckPermission(reply) => {
            let _ = reply.send(store.controller().check_permission());
        }
        EngineCommand::PlayerNotification(notification) => store.reconcile(notification.as_ref()),
        EngineCommand::Shutdown => {}
    }
}

/// Handle to the engine thread. Dropping it stops the engine.
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Entry point for the player's change notification.
    pub fn notify_player(&self, notification: Option<PlayerNotification>) {
        self.send(EngineCommand::PlayerNotification(notification));
    }

    pub fn popover_will_show(&self) {
        self.send(EngineCommand::PopoverWillShow);
    }

    pub fn popover_did_close(&self) {
        self.send(EngineCommand::PopoverDidClose);
    }

    pub fn toggle_play_pause(&self) {
        self.send(EngineCommand::TogglePlayPause);
    }

    pub fn toggle_favorite(&self) {
        self.send(EngineCommand::ToggleFavorite);
    }

    pub fn next_track(&self) {
        self.send(EngineCommand::NextTrack);
    }

    pub fn previous_track(&self) {
        self.send(EngineCommand::PreviousTrack);
    }

    /// Registers a snapshot listener. The id is `None` when the engine is
    /// gone.
    pub fn subscribe(
        &self,
        listener: impl FnMut(&PlaybackSnapshot) + Send + 'static,
    ) -> Option<ListenerId> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(EngineCommand::Subscribe(Box::new(listener), reply_tx));
        reply_rx.recv().ok()
    }

    pub fn subscribe_track_changed(
        &self,
        listener: impl FnMut(&TrackChanged) + Send + 'static,
    ) -> Option<ListenerId> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(EngineCommand::SubscribeTrackChanged(Box::new(listener), reply_tx));
        reply_rx.recv().ok()
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.send(EngineCommand::Unsubscribe(id));
    }

    pub fn unsubscribe_track_changed(&self, id: ListenerId) {
        self.send(EngineCommand::UnsubscribeTrackChanged(id));
    }

    /// Blocks until the engine has queried the permission state. `None` when
    /// the engine is gone.
    pub fn check_permission(&self) -> Option<PermissionStatus> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(EngineCommand::CheckPermission(reply_tx));
        reply_rx.recv().ok()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: EngineCommand) {
        if self.tx.send(command).is_err() {
            debug!("engine already stopped");
        }
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(EngineCommand::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
