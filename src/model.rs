use std::sync::Arc;

/// Encoded cover image bytes as produced by the external player or the
/// catalog. Cloning shares the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Artwork(Arc<[u8]>);

impl Artwork {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Artwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Artwork({} bytes)", self.0.len())
    }
}

/// Metadata identity of a track. Two tracks with the same key share cached
/// artwork and are treated as the same item when artwork completes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl TrackKey {
    /// Catalog search term: non-blank components joined by a space.
    pub fn search_term(&self) -> String {
        [&self.title, &self.artist, &self.album]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_searchable(&self) -> bool {
        !self.title.trim().is_empty() || !self.artist.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Option<Artwork>,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            artwork: None,
        }
    }

    /// "Nothing playing" is an empty title and artist, not a missing track.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty()
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
        }
    }

    pub fn same_identity(&self, other: &Track) -> bool {
        self.title == other.title && self.artist == other.artist && self.album == other.album
    }

    pub fn with_artwork(&self, artwork: Option<Artwork>) -> Self {
        Self {
            artwork,
            ..self.clone()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerPhase {
    NotRunning,
    Idle,
    Active,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub track: Track,
    pub is_playing: bool,
    pub is_favorited: bool,
    pub track_duration_secs: f64,
    pub seeker_position_secs: f64,
    pub external_app_running: bool,
}

impl PlaybackSnapshot {
    pub fn not_running() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> PlayerPhase {
        if !self.external_app_running {
            PlayerPhase::NotRunning
        } else if self.track.is_empty() {
            PlayerPhase::Idle
        } else {
            PlayerPhase::Active
        }
    }

    pub fn track_changed(&self) -> TrackChanged {
        TrackChanged {
            title: self.track.title.clone(),
            artist: self.track.artist.clone(),
            is_playing: self.is_playing,
        }
    }
}

/// Lightweight event for consumers that only render menu-bar text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackChanged {
    pub title: String,
    pub artist: String,
    pub is_playing: bool,
}

pub fn format_seconds(seconds: f64) -> String {
    let total_seconds = if seconds.is_finite() {
        seconds.max(0.0).floor() as u64
    } else {
        0
    };
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn menu_bar_text(event: &TrackChanged) -> String {
    if event.title.is_empty() && event.artist.is_empty() {
        String::new()
    } else {
        format!("{} \u{2022} {}", event.title, event.artist)
    }
}
