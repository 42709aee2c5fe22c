#![allow(dead_code)]

use nowplaying_sync::artwork::{ArtworkCache, ArtworkResolver, CatalogClient, FetchError};
use nowplaying_sync::config::{Config, PlayerConfig, SyncConfig};
use nowplaying_sync::model::TrackKey;
use nowplaying_sync::script::{ArtworkPayload, ScriptError, ScriptHost, ScriptOutput};
use nowplaying_sync::{PlaybackStore, PlayerController};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    time::{Duration, Instant},
};

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F', 0];

#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    pub running: bool,
    pub stopped: bool,
    pub track: Option<(String, String, String)>,
    pub playing: bool,
    pub favorited: bool,
    pub duration: f64,
    pub position: f64,
    pub artwork_file: Option<PathBuf>,
    pub artwork_object: Option<ArtworkPayload>,
    pub scripts: Vec<String>,
    pub running_checks: usize,
}

/// Scripted stand-in for the external player. Commands are only recorded;
/// state changes come from the test.
#[derive(Debug, Clone, Default)]
pub struct FakePlayer {
    state: Arc<Mutex<PlayerState>>,
}

impl FakePlayer {
    pub fn stopped_app() -> Self {
        Self::default()
    }

    pub fn playing(title: &str, artist: &str, album: &str) -> Self {
        let player = Self::default();
        player.update(|s| {
            s.running = true;
            s.playing = true;
            s.duration = 225.0;
            s.track = Some((title.into(), artist.into(), album.into()));
        });
        player
    }

    pub fn update(&self, f: impl FnOnce(&mut PlayerState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.scripts().iter().any(|s| s.contains(needle))
    }

    pub fn running_checks(&self) -> usize {
        self.state.lock().unwrap().running_checks
    }

    pub fn clear_scripts(&self) {
        self.state.lock().unwrap().scripts.clear();
    }
}

impl ScriptHost for FakePlayer {
    fn is_running(&self, _player: &PlayerConfig) -> bool {
        let mut s = self.state.lock().unwrap();
        s.running_checks += 1;
        s.running
    }

    fn execute(&self, source: &str) -> Result<ScriptOutput, ScriptError> {
        let mut s = self.state.lock().unwrap();
        s.scripts.push(source.to_string());

        let text = if source.contains("POSIX path of filePath") {
            s.artwork_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else if source.contains("name of current track &") {
            match (&s.track, s.stopped) {
                (Some((t, a, al)), false) => format!("{t}|||{a}|||{al}"),
                _ => String::new(),
            }
        } else if source.contains("set favorited") || source.contains("playpause") {
            String::new()
        } else if source.contains("favorited of current track") {
            s.favorited.to_string()
        } else if source.contains("player state is playing") {
            s.playing.to_string()
        } else if source.contains("duration of current track") {
            s.duration.to_string()
        } else if source.contains("player position") {
            s.position.to_string()
        } else if source.contains("return name") {
            "Music".to_string()
        } else {
            String::new()
        };
        Ok(ScriptOutput::new(text))
    }

    fn artwork_data(&self, _player: &PlayerConfig) -> Result<Option<ArtworkPayload>, ScriptError> {
        let mut s = self.state.lock().unwrap();
        s.scripts.push("artwork object".to_string());
        Ok(s.artwork_object.clone())
    }
}

/// Counting catalog. A gate, when set, holds every download until the test
/// releases it.
#[derive(Default)]
pub struct FakeCatalog {
    pub url: Option<String>,
    pub bytes: Vec<u8>,
    pub fail_download: AtomicBool,
    pub searches: AtomicUsize,
    pub downloads: AtomicUsize,
    pub gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeCatalog {
    pub fn with_image(bytes: &[u8]) -> Self {
        Self {
            url: Some("https://is1.example/a/600x600bb.jpg".to_string()),
            bytes: bytes.to_vec(),
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn gated(bytes: &[u8]) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let catalog = Self::with_image(bytes);
        *catalog.gate.lock().unwrap() = Some(rx);
        (catalog, tx)
    }

    pub fn network_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst) + self.downloads.load(Ordering::SeqCst)
    }
}

impl CatalogClient for FakeCatalog {
    fn search_artwork_url(&self, _key: &TrackKey) -> Result<Option<String>, FetchError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.url.clone())
    }

    fn download(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(FetchError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "offline",
            )));
        }
        Ok(self.bytes.clone())
    }
}

pub fn resolver(
    player: &FakePlayer,
    catalog: Arc<FakeCatalog>,
    cache_dir: &Path,
) -> ArtworkResolver<FakePlayer> {
    let controller = Arc::new(PlayerController::new(
        player.clone(),
        PlayerConfig::default(),
    ));
    ArtworkResolver::new(controller, ArtworkCache::new(cache_dir), catalog)
}

pub fn store(
    player: &FakePlayer,
    catalog: Arc<FakeCatalog>,
    cache_dir: &Path,
) -> PlaybackStore<FakePlayer> {
    store_with_sync(player, catalog, cache_dir, &SyncConfig::default())
}

pub fn store_with_sync(
    player: &FakePlayer,
    catalog: Arc<FakeCatalog>,
    cache_dir: &Path,
    sync: &SyncConfig,
) -> PlaybackStore<FakePlayer> {
    let controller = Arc::new(PlayerController::new(
        player.clone(),
        PlayerConfig::default(),
    ));
    let resolver = ArtworkResolver::new(
        Arc::clone(&controller),
        ArtworkCache::new(cache_dir),
        catalog,
    );
    PlaybackStore::new(controller, resolver, sync, Arc::new(|| {}))
}

pub fn test_config(cache_dir: &Path) -> Config {
    let mut config = Config::default();
    config.artwork.cache_dir = Some(cache_dir.to_path_buf());
    config.sync.reconcile_interval_ms = 0;
    config.sync.position_poll_ms = 20;
    config
}

/// Drives `drain_artwork` until nothing is pending.
pub fn settle_artwork(store: &mut PlaybackStore<FakePlayer>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.has_pending_artwork() && Instant::now() < deadline {
        store.drain_artwork();
        std::thread::sleep(Duration::from_millis(5));
    }
}
