//! Now-playing synchronisation for an external media player.
//!
//! [`controller`] talks to the player through the scripting bridge,
//! [`artwork`] resolves cover art, [`store`] owns the playback snapshot and
//! [`engine`] runs the store on its own thread.

pub mod artwork;
pub mod config;
pub mod controller;
pub mod engine;
pub mod model;
pub mod poller;
pub mod script;
pub mod store;

pub use config::Config;
pub use controller::{PermissionStatus, PlayerController, RunningPlayer};
pub use engine::{Engine, EngineHandle};
pub use model::{format_seconds, menu_bar_text, PlaybackSnapshot, PlayerPhase, Track, TrackChanged};
pub use script::{OsaScriptHost, ScriptHost};
pub use store::{ListenerId, NotifiedState, PlaybackStore, PlayerNotification};
