use anyhow::Context;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_SEARCH_URL: &str = "https://itunes.apple.com/search";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub player: PlayerConfig,
    pub sync: SyncConfig,
    pub artwork: ArtworkConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join("config.toml"));
            candidates.push(current_dir.join("config").join("config.toml"));
            candidates.push(current_dir.join("config").join("nowplaying.toml"));
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("config.toml"));
                candidates.push(dir.join("config").join("config.toml"));
                candidates.push(dir.join("config").join("nowplaying.toml"));
            }
        }

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }
}

/// Identity of the external media application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Name used in `tell application "<name>"` scripts.
    pub app_name: String,
    pub bundle_id: String,
    /// Executable name matched against the process table.
    pub process_name: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            app_name: "Music".to_string(),
            bundle_id: "com.apple.Music".to_string(),
            process_name: "Music".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Name of the distributed notification the player posts on changes.
    pub fn notification_name(&self) -> String {
        format!("{}.playerInfo", self.bundle_id)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub favorite_debounce_ms: u64,
    pub position_poll_ms: u64,
    pub reconcile_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            favorite_debounce_ms: 2000,
            position_poll_ms: 100,
            reconcile_interval_ms: 5000,
        }
    }
}

impl SyncConfig {
    pub fn favorite_debounce(&self) -> Duration {
        Duration::from_millis(self.favorite_debounce_ms)
    }

    pub fn position_poll_interval(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms.clamp(16, 5000))
    }

    /// `None` disables the fallback reconciliation.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        match self.reconcile_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms.max(250))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtworkConfig {
    pub cache_dir: Option<PathBuf>,
    pub search_url: String,
    pub search_limit: u32,
    pub timeout_secs: u64,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            search_limit: 3,
            timeout_secs: 10,
        }
    }
}

impl ArtworkConfig {
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(env::temp_dir)
                .join("nowplaying-sync")
                .join("artwork"),
        }
    }

    pub fn search_limit(&self) -> u32 {
        self.search_limit.clamp(1, 25)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.clamp(1, 60))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    player: PlayerSection,
    #[serde(default)]
    sync: SyncSection,
    #[serde(default)]
    artwork: ArtworkSection,
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let player_defaults = PlayerConfig::default();
        let sync_defaults = SyncConfig::default();
        let artwork_defaults = ArtworkConfig::default();

        let player = PlayerConfig {
            app_name: value.player.app_name.unwrap_or(player_defaults.app_name),
            bundle_id: value.player.bundle_id.unwrap_or(player_defaults.bundle_id),
            process_name: value
                .player
                .process_name
                .unwrap_or(player_defaults.process_name),
        };

        let sync = SyncConfig {
            favorite_debounce_ms: value
                .sync
                .favorite_debounce_ms
                .unwrap_or(sync_defaults.favorite_debounce_ms),
            position_poll_ms: value
                .sync
                .position_poll_ms
                .unwrap_or(sync_defaults.position_poll_ms),
            reconcile_interval_ms: value
                .sync
                .reconcile_interval_ms
                .unwrap_or(sync_defaults.reconcile_interval_ms),
        };

        let artwork = ArtworkConfig {
            cache_dir: value.artwork.cache_dir,
            search_url: value
                .artwork
                .search_url
                .unwrap_or(artwork_defaults.search_url),
            search_limit: value
                .artwork
                .search_limit
                .unwrap_or(artwork_defaults.search_limit),
            timeout_secs: value
                .artwork
                .timeout_secs
                .unwrap_or(artwork_defaults.timeout_secs),
        };

        Config {
            player,
            sync,
            artwork,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayerSection {
    app_name: Option<String>,
    bundle_id: Option<String>,
    process_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncSection {
    favorite_debounce_ms: Option<u64>,
    position_poll_ms: Option<u64>,
    reconcile_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ArtworkSection {
    cache_dir: Option<PathBuf>,
    search_url: Option<String>,
    search_limit: Option<u32>,
    timeout_secs: Option<u64>,
}
