//! Typed adapter over the scripting bridge.
//!
//! Every query fails soft: a script error becomes `None`, `false` or `0.0`
//! and is only logged. The controller keeps no state of its own.

use crate::config::PlayerConfig;
use crate::model::Track;
use crate::script::{ArtworkPayload, ScriptHost, ScriptOutput};
use log::debug;
use std::path::PathBuf;

pub const FIELD_DELIMITER: &str = "|||";

const ERR_APP_NOT_RUNNING: i32 = -600;
const ERR_NOT_AUTHORIZED: i32 = -1743;
const ERR_WOULD_REQUIRE_CONSENT: i32 = -1744;

/// Automation permission state for the external player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    AppNotOpen,
    Granted,
    NotPrompted,
    Denied,
}

pub struct PlayerController<H> {
    host: H,
    player: PlayerConfig,
}

impl<H: ScriptHost> PlayerController<H> {
    pub fn new(host: H, player: PlayerConfig) -> Self {
        Self { host, player }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_running(&self) -> bool {
        self.host.is_running(&self.player)
    }

    /// Checks the process once. Queries through the returned view skip the
    /// check, so callers that issue several queries pay for it a single time.
    pub fn running(&self) -> Option<RunningPlayer<'_, H>> {
        self.is_running().then_some(RunningPlayer { controller: self })
    }

    pub fn current_track(&self) -> Option<Track> {
        self.running()?.current_track()
    }

    pub fn track_duration_secs(&self) -> f64 {
        self.running().map_or(0.0, |player| player.track_duration_secs())
    }

    pub fn player_position_secs(&self) -> f64 {
        self.running().map_or(0.0, |player| player.player_position_secs())
    }

    pub fn is_playing(&self) -> bool {
        self.running().is_some_and(|player| player.is_playing())
    }

    pub fn is_favorited(&self) -> bool {
        self.running().is_some_and(|player| player.is_favorited())
    }

    pub fn play_pause(&self) {
        if let Some(player) = self.running_for("playpause") {
            player.play_pause();
        }
    }

    pub fn next_track(&self) {
        if let Some(player) = self.running_for("next track") {
            player.next_track();
        }
    }

    pub fn previous_track(&self) {
        if let Some(player) = self.running_for("back track") {
            player.previous_track();
        }
    }

    pub fn set_favorited(&self, favorited: bool) {
        if let Some(player) = self.running_for("set favorited") {
            player.set_favorited(favorited);
        }
    }

    pub fn check_permission(&self) -> PermissionStatus {
        let source = format!(
            "tell application id \"{}\"\nreturn name\nend tell",
            self.player.bundle_id
        );
        match self.host.execute(&source) {
            Ok(_) => PermissionStatus::Granted,
            Err(err) => match err.code() {
                Some(ERR_APP_NOT_RUNNING) => PermissionStatus::AppNotOpen,
                Some(ERR_NOT_AUTHORIZED) => PermissionStatus::Denied,
                Some(ERR_WOULD_REQUIRE_CONSENT) => PermissionStatus::NotPrompted,
                _ => PermissionStatus::Denied,
            },
        }
    }

    /// Commands are dropped when the player is closed, since addressing it
    /// would launch it.
    fn running_for(&self, command: &str) -> Option<RunningPlayer<'_, H>> {
        let player = self.running();
        if player.is_none() {
            debug!("player not running, dropping `{command}`");
        }
        player
    }

    fn tell(&self, body: &str) -> String {
        format!("tell application \"{}\" to {body}", self.player.app_name)
    }

    fn query(&self, source: &str) -> Option<ScriptOutput> {
        match self.host.execute(source) {
            Ok(output) => Some(output),
            Err(err) => {
                debug!("player query failed: {err}");
                None
            }
        }
    }
}

/// The player as seen right after a successful process check.
pub struct RunningPlayer<'a, H> {
    controller: &'a PlayerController<H>,
}

impl<H: ScriptHost> RunningPlayer<'_, H> {
    /// Title, artist and album in a single round trip.
    pub fn current_track(&self) -> Option<Track> {
        let source = format!(
            "tell application \"{app}\"\n\
             if player state is stopped then return \"\"\n\
             return name of current track & \"{d}\" & artist of current track & \"{d}\" & album of current track\n\
             end tell",
            app = self.controller.player.app_name,
            d = FIELD_DELIMITER,
        );
        self.controller
            .query(&source)
            .and_then(|out| parse_track(out.text()))
    }

    pub fn track_duration_secs(&self) -> f64 {
        self.query_f64("return duration of current track")
    }

    pub fn player_position_secs(&self) -> f64 {
        self.query_f64("return player position")
    }

    pub fn is_playing(&self) -> bool {
        self.query_bool("return player state is playing")
    }

    pub fn is_favorited(&self) -> bool {
        self.query_bool("return favorited of current track")
    }

    pub fn play_pause(&self) {
        self.command("playpause");
    }

    pub fn next_track(&self) {
        self.command("next track");
    }

    pub fn previous_track(&self) {
        self.command("back track");
    }

    pub fn set_favorited(&self, favorited: bool) {
        self.command(&format!("set favorited of current track to {favorited}"));
    }

    /// Asks the player to dump the current artwork into a temporary file and
    /// returns its path.
    pub fn artwork_temp_file(&self) -> Option<PathBuf> {
        let source = format!(
            "tell application \"{}\"\n\
             if player state is stopped then return \"\"\n\
             if (count of artworks of current track) = 0 then return \"\"\n\
             tell artwork 1 of current track\n\
             set artData to raw data\n\
             if format is JPEG picture then\n\
             set ext to \".jpg\"\n\
             else\n\
             set ext to \".png\"\n\
             end if\n\
             end tell\n\
             set filePath to (path to temporary items as text) & \"nowplaying_artwork\" & ext\n\
             set fileRef to open for access file filePath with write permission\n\
             set eof fileRef to 0\n\
             write artData to fileRef\n\
             close access fileRef\n\
             return POSIX path of filePath\n\
             end tell",
            self.controller.player.app_name
        );
        self.controller
            .query(&source)
            .and_then(|out| out.non_empty().map(PathBuf::from))
    }

    pub fn artwork_object(&self) -> Option<ArtworkPayload> {
        let controller = self.controller;
        match controller.host.artwork_data(&controller.player) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("artwork object query failed: {err}");
                None
            }
        }
    }

    fn query_f64(&self, body: &str) -> f64 {
        self.controller
            .query(&self.controller.tell(body))
            .and_then(|out| out.as_f64())
            .unwrap_or(0.0)
    }

    fn query_bool(&self, body: &str) -> bool {
        self.controller
            .query(&self.controller.tell(body))
            .is_some_and(|out| out.as_bool())
    }

    fn command(&self, body: &str) {
        let controller = self.controller;
        if let Err(err) = controller.host.execute(&controller.tell(body)) {
            debug!("player command `{body}` failed: {err}");
        }
    }
}

/// Parses the delimited title/artist/album result. Anything with fewer than
/// three fields is treated as no track.
pub fn parse_track(raw: &str) -> Option<Track> {
    let parts: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
    if parts.len() < 3 {
        return None;
    }
    Some(Track::new(parts[0], parts[1], parts[2]))
}
