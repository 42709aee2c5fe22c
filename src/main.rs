use anyhow::Context;
use log::{debug, info, warn};
use nowplaying_sync::{
    format_seconds, menu_bar_text, Config, Engine, OsaScriptHost, PlaybackSnapshot, PlayerPhase,
};
use std::io::{self, BufRead, Write};

fn describe(snapshot: &PlaybackSnapshot) -> String {
    match snapshot.phase() {
        PlayerPhase::NotRunning => "player not running".to_string(),
        PlayerPhase::Idle => "nothing playing".to_string(),
        PlayerPhase::Active => format!(
            "{} - {} [{}] {} / {}{}{}",
            snapshot.track.title,
            snapshot.track.artist,
            snapshot.track.album,
            format_seconds(snapshot.seeker_position_secs),
            format_seconds(snapshot.track_duration_secs),
            if snapshot.is_playing { "" } else { " (paused)" },
            if snapshot.is_favorited { " \u{2665}" } else { "" },
        ),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load().unwrap_or_else(|err| {
        warn!("{err:#}; using defaults");
        Config::default()
    });
    info!(
        "watching {} ({})",
        config.player.app_name,
        config.player.notification_name()
    );

    let engine = Engine::spawn(&config, OsaScriptHost::new()).context("Failed to start engine")?;

    engine.subscribe_track_changed(|event| {
        println!("{}", menu_bar_text(event));
    });
    let mut last_artwork_len = None;
    engine.subscribe(move |snapshot| {
        let artwork_len = snapshot.track.artwork.as_ref().map(|art| art.len());
        if artwork_len != last_artwork_len {
            if let Some(len) = artwork_len {
                info!("artwork ready ({len} bytes)");
            }
            last_artwork_len = artwork_len;
        }
        debug!("{}", describe(snapshot));
    });
    engine.notify_player(None);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        match line.trim() {
            "play" | "pause" | "p" => engine.toggle_play_pause(),
            "next" | "n" => engine.next_track(),
            "prev" | "b" => engine.previous_track(),
            "fav" | "f" => engine.toggle_favorite(),
            "show" => engine.popover_will_show(),
            "hide" => engine.popover_did_close(),
            "sync" => engine.notify_player(None),
            "perm" => println!("{:?}", engine.check_permission()),
            "quit" | "q" => break,
            "" => {}
            other => {
                println!("unknown command: {other}");
                println!("commands: play next prev fav show hide sync perm quit");
            }
        }
        io::stdout().flush().ok();
    }

    engine.shutdown();
    Ok(())
}
