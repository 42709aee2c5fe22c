mod common;

use common::{FakeCatalog, FakePlayer, JPEG};
use nowplaying_sync::{Engine, PermissionStatus, PlaybackSnapshot, PlayerNotification};
use std::{
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

fn wait_for(
    rx: &mpsc::Receiver<PlaybackSnapshot>,
    predicate: impl Fn(&PlaybackSnapshot) -> bool,
) -> Option<PlaybackSnapshot> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(snapshot) if predicate(&snapshot) => return Some(snapshot),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn engine_reconciles_and_resolves_artwork_on_its_thread() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let player = FakePlayer::playing("Song", "Artist", "Album");
    let catalog = Arc::new(FakeCatalog::with_image(JPEG));
    let engine = Engine::spawn_with_catalog(
        &common::test_config(dir.path()),
        player.clone(),
        catalog.clone(),
    )?;

    let (tx, rx) = mpsc::channel();
    engine.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    engine.notify_player(Some(PlayerNotification::with_player_state("Playing")));

    let active = wait_for(&rx, |s| s.external_app_running).expect("reconciled snapshot");
    assert_eq!(active.track.title, "Song");
    assert!(active.is_playing);

    let with_art = if active.track.artwork.is_some() {
        active
    } else {
        wait_for(&rx, |s| s.track.artwork.is_some()).expect("artwork applied")
    };
    assert_eq!(with_art.track.artwork.map(|a| a.bytes().to_vec()), Some(JPEG.to_vec()));

    engine.shutdown();
    Ok(())
}

#[test]
fn engine_applies_user_commands_and_polls_while_shown() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let player = FakePlayer::playing("Song", "Artist", "Album");
    let engine = Engine::spawn_with_catalog(
        &common::test_config(dir.path()),
        player.clone(),
        Arc::new(FakeCatalog::empty()),
    )?;

    let (tx, rx) = mpsc::channel();
    engine.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    engine.notify_player(None);
    wait_for(&rx, |s| s.external_app_running).expect("reconciled snapshot");

    engine.toggle_favorite();
    wait_for(&rx, |s| s.is_favorited).expect("optimistic favorite");

    player.update(|s| s.position = 12.0);
    engine.popover_will_show();
    wait_for(&rx, |s| s.seeker_position_secs == 12.0).expect("polled position");
    engine.popover_did_close();

    assert_eq!(engine.check_permission(), Some(PermissionStatus::Granted));
    assert!(player.ran("set favorited of current track to true"));

    engine.shutdown();
    Ok(())
}

#[test]
fn engine_reports_closed_player() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let player = FakePlayer::stopped_app();
    let engine = Engine::spawn_with_catalog(
        &common::test_config(dir.path()),
        player.clone(),
        Arc::new(FakeCatalog::empty()),
    )?;

    let (tx, rx) = mpsc::channel();
    engine.subscribe_track_changed(move |event| {
        let _ = tx.send(event.clone());
    });
    engine.notify_player(None);

    let event = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(nowplaying_sync::menu_bar_text(&event), "");
    assert!(player.scripts().is_empty());

    drop(engine);
    Ok(())
}

#[test]
fn engine_listeners_can_unsubscribe() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let player = FakePlayer::playing("Song", "Artist", "Album");
    let engine = Engine::spawn_with_catalog(
        &common::test_config(dir.path()),
        player.clone(),
        Arc::new(FakeCatalog::empty()),
    )?;

    let (dropped_tx, dropped_rx) = mpsc::channel();
    let id = engine
        .subscribe(move |snapshot| {
            let _ = dropped_tx.send(snapshot.clone());
        })
        .expect("engine running");
    let (tx, rx) = mpsc::channel();
    let kept = engine.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    assert!(kept.is_some_and(|kept| kept != id));

    engine.unsubscribe(id);
    engine.notify_player(None);
    wait_for(&rx, |s| s.external_app_running).expect("reconciled snapshot");

    assert!(dropped_rx.try_iter().all(|s| !s.external_app_running));
    engine.shutdown();
    Ok(())
}
