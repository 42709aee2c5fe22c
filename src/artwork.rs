//! Cover artwork resolution.
//!
//! Tiers, first success wins:
//! 1. the player writes the current artwork to a temporary file,
//! 2. the player's object model is asked for the first artwork's data,
//! 3. the public catalog is searched and the image downloaded, backed by a
//!    disk cache keyed on track metadata.
//!
//! Tiers 1 and 2 run on the caller. Tier 3 (cache lookup included) runs on a
//! worker thread. All tiers complete the same [`ArtworkTask`].

use crate::config::ArtworkConfig;
use crate::controller::{PlayerController, RunningPlayer, FIELD_DELIMITER};
use crate::model::{Artwork, Track, TrackKey};
use crate::script::ScriptHost;
use futures::channel::oneshot;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::Deserialize;
use std::{
    fs,
    future::Future,
    io,
    path::PathBuf,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread,
};
use thiserror::Error;

const THUMBNAIL_TOKEN: &str = "100x100bb";
const HIGH_RES_TOKEN: &str = "600x600bb";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("failed to read response: {0}")]
    Io(#[from] io::Error),
    #[error("invalid search response: {0}")]
    Json(#[from] serde_json::Error),
}

/// 31-multiplier string hash over UTF-16 code units, as a 32-bit value.
pub fn metadata_hash(value: &str) -> u32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        }) as u32
}

pub fn cache_file_name(key: &TrackKey) -> String {
    let joined = format!(
        "{}{d}{}{d}{}",
        key.title,
        key.artist,
        key.album,
        d = FIELD_DELIMITER
    );
    format!("{:x}.jpg", metadata_hash(&joined))
}

pub fn is_image(bytes: &[u8]) -> bool {
    !bytes.is_empty() && image::guess_format(bytes).is_ok()
}

/// Append-only artwork store, one file per metadata key.
#[derive(Debug, Clone)]
pub struct ArtworkCache {
    dir: PathBuf,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ArtworkCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &TrackKey) -> PathBuf {
        self.dir.join(cache_file_name(key))
    }

    /// Cached bytes, or `None` on a miss or unreadable entry.
    pub fn load(&self, key: &TrackKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) if is_image(&bytes) => Some(bytes),
            Ok(_) => {
                debug!("ignoring non-image cache entry {}", path.display());
                None
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("failed to read cached artwork {}: {err}", path.display());
                None
            }
        }
    }

    /// Writes through a temporary file so readers never see a partial entry.
    /// Concurrent writers for one key are fine; the last rename wins.
    pub fn store(&self, key: &TrackKey, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            cache_file_name(key),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(path)
    }
}

/// Remote catalog used by the last tier.
pub trait CatalogClient: Send + Sync {
    /// High resolution artwork URL of the best match, if any.
    fn search_artwork_url(&self, key: &TrackKey) -> Result<Option<String>, FetchError>;

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

/// Picks the first result's thumbnail and upgrades it to the 600px variant.
pub fn artwork_url_from_response(body: &str) -> Result<Option<String>, FetchError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .results
        .into_iter()
        .next()
        .and_then(|first| first.artwork_url_100)
        .map(|url| url.replace(THUMBNAIL_TOKEN, HIGH_RES_TOKEN)))
}

pub struct ItunesCatalog {
    agent: ureq::Agent,
    search_url: String,
    limit: u32,
}

impl ItunesCatalog {
    pub fn new(config: &ArtworkConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout())
            .timeout_read(config.timeout())
            .build();

        Self {
            agent,
            search_url: config.search_url.clone(),
            limit: config.search_limit(),
        }
    }
}

impl CatalogClient for ItunesCatalog {
    fn search_artwork_url(&self, key: &TrackKey) -> Result<Option<String>, FetchError> {
        let body = self
            .agent
            .get(&self.search_url)
            .query("term", &key.search_term())
            .query("media", "music")
            .query("entity", "musicTrack")
            .query("limit", &self.limit.to_string())
            .set("Accept", "application/json")
            .call()
            .map_err(Box::new)?
            .into_string()?;
        artwork_url_from_response(&body)
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.agent.get(url).call().map_err(Box::new)?;
        let mut bytes = Vec::new();
        io::Read::read_to_end(&mut response.into_reader(), &mut bytes)?;
        Ok(bytes)
    }
}

/// Pending artwork for one track. Resolves to `None` when every tier came up
/// empty.
pub struct ArtworkTask {
    rx: oneshot::Receiver<Option<Artwork>>,
}

impl ArtworkTask {
    fn ready(artwork: Option<Artwork>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(artwork);
        Self { rx }
    }

    /// `None` while the worker is still running. A worker that vanished
    /// counts as finished without artwork.
    pub fn try_complete(&mut self) -> Option<Option<Artwork>> {
        match self.rx.try_recv() {
            Ok(Some(artwork)) => Some(artwork),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(None),
        }
    }
}

impl Future for ArtworkTask {
    type Output = Option<Artwork>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|result| result.unwrap_or(None))
    }
}

pub struct ArtworkResolver<H> {
    controller: Arc<PlayerController<H>>,
    cache: ArtworkCache,
    catalog: Arc<dyn CatalogClient>,
}

impl<H: ScriptHost> ArtworkResolver<H> {
    pub fn new(
        controller: Arc<PlayerController<H>>,
        cache: ArtworkCache,
        catalog: Arc<dyn CatalogClient>,
    ) -> Self {
        Self {
            controller,
            cache,
            catalog,
        }
    }

    pub fn cache(&self) -> &ArtworkCache {
        &self.cache
    }

    pub fn resolve(&self, track: &Track) -> ArtworkTask {
        match self.controller.running() {
            Some(player) => self.resolve_on(&player, track),
            None => self.spawn_remote(track),
        }
    }

    /// Same as [`resolve`](Self::resolve) for a caller that has already
    /// confirmed the player is running.
    pub fn resolve_on(&self, player: &RunningPlayer<'_, H>, track: &Track) -> ArtworkTask {
        if let Some(artwork) = resolve_local(player) {
            return ArtworkTask::ready(Some(artwork));
        }
        self.spawn_remote(track)
    }

    fn spawn_remote(&self, track: &Track) -> ArtworkTask {
        let key = track.key();
        if !key.is_searchable() {
            return ArtworkTask::ready(None);
        }

        let (tx, rx) = oneshot::channel();
        let cache = self.cache.clone();
        let catalog = Arc::clone(&self.catalog);
        let spawned = thread::Builder::new()
            .name("artwork-fetch".to_string())
            .spawn(move || {
                let artwork = resolve_remote(&cache, catalog.as_ref(), &key);
                let _ = tx.send(artwork);
            });
        if let Err(err) = spawned {
            warn!("failed to start artwork worker: {err}");
        }

        ArtworkTask { rx }
    }
}

fn resolve_local<H: ScriptHost>(player: &RunningPlayer<'_, H>) -> Option<Artwork> {
    if let Some(path) = player.artwork_temp_file() {
        match fs::read(&path) {
            Ok(bytes) if is_image(&bytes) => return Some(Artwork::new(bytes)),
            Ok(_) => debug!("temp artwork at {} is not an image", path.display()),
            Err(err) => debug!("failed to read temp artwork {}: {err}", path.display()),
        }
    }

    let bytes = player.artwork_object()?.into_bytes();
    if is_image(&bytes) {
        Some(Artwork::new(bytes))
    } else {
        debug!("object model artwork is not a decodable image");
        None
    }
}

fn resolve_remote(
    cache: &ArtworkCache,
    catalog: &dyn CatalogClient,
    key: &TrackKey,
) -> Option<Artwork> {
    if let Some(bytes) = cache.load(key) {
        debug!("artwork cache hit for {}", cache_file_name(key));
        return Some(Artwork::new(bytes));
    }

    let url = match catalog.search_artwork_url(key) {
        Ok(Some(url)) => url,
        Ok(None) => {
            debug!("catalog has no artwork for \"{}\"", key.search_term());
            return None;
        }
        Err(err) => {
            warn!("artwork search failed: {err}");
            return None;
        }
    };

    let bytes = match catalog.download(&url) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("artwork download failed: {err}");
            return None;
        }
    };
    if !is_image(&bytes) {
        warn!("downloaded artwork from {url} is not an image");
        return None;
    }

    match cache.store(key, &bytes) {
        Ok(path) => info!("cached artwork at {}", path.display()),
        Err(err) => warn!("failed to cache artwork: {err}"),
    }
    Some(Artwork::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn key(title: &str, artist: &str, album: &str) -> TrackKey {
        Track::new(title, artist, album).key()
    }

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(metadata_hash(""), 0);
        assert_eq!(metadata_hash("abc"), 96354);
        assert_eq!(metadata_hash("polygenelubricants"), 0x8000_0000);
    }

    #[test]
    fn cache_file_name_is_lower_hex_jpg() {
        let name = cache_file_name(&key("", "", ""));
        let expected = format!("{:x}.jpg", metadata_hash("||||||"));
        assert_eq!(name, expected);
        assert!(name.ends_with(".jpg"));
        assert_eq!(name, name.to_lowercase());
    }

    #[test]
    fn identical_metadata_shares_an_entry() {
        let cache = ArtworkCache::new("/tmp/art");
        assert_eq!(
            cache.path_for(&key("Song", "Artist", "Album")),
            cache.path_for(&key("Song", "Artist", "Album"))
        );
        assert_ne!(
            cache.path_for(&key("Song", "Artist", "Album")),
            cache.path_for(&key("Song", "Artist", "Live"))
        );
    }

    #[test]
    fn cache_store_then_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = ArtworkCache::new(dir.path().join("artwork"));
        let k = key("Song", "Artist", "Album");

        assert_eq!(cache.load(&k), None);
        let path = cache.store(&k, PNG)?;
        assert_eq!(path, cache.path_for(&k));
        assert_eq!(cache.load(&k).as_deref(), Some(PNG));

        fs::write(&path, b"not an image")?;
        assert_eq!(cache.load(&k), None);
        Ok(())
    }

    #[test]
    fn search_response_upgrades_resolution() -> anyhow::Result<()> {
        let body = r#"{"resultCount":2,"results":[
            {"trackName":"Song","artworkUrl100":"https://is1.example/img/100x100bb.jpg"},
            {"trackName":"Other","artworkUrl100":"https://is1.example/other/100x100bb.jpg"}
        ]}"#;
        assert_eq!(
            artwork_url_from_response(body)?,
            Some("https://is1.example/img/600x600bb.jpg".to_string())
        );
        Ok(())
    }

    #[test]
    fn search_response_without_results() -> anyhow::Result<()> {
        assert_eq!(artwork_url_from_response(r#"{"resultCount":0,"results":[]}"#)?, None);
        assert_eq!(artwork_url_from_response(r#"{"results":[{"trackName":"x"}]}"#)?, None);
        assert!(artwork_url_from_response("<html>").is_err());
        Ok(())
    }

    #[test]
    fn image_check_rejects_garbage() {
        assert!(is_image(PNG));
        assert!(!is_image(&[0u8, 1, 2, 3]));
        assert!(!is_image(&[]));
    }

    #[test]
    fn dropped_worker_completes_without_artwork() {
        let (tx, rx) = oneshot::channel::<Option<Artwork>>();
        let mut task = ArtworkTask { rx };
        assert_eq!(task.try_complete(), None);
        drop(tx);
        assert_eq!(task.try_complete(), Some(None));
    }
}
