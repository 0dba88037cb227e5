//! Speaker state model.
//!
//! [`SpeakerState`] is the single authoritative state aggregate owned by the
//! controller. External readers only ever receive full clones of it, never a
//! live reference.

use serde::Serialize;
use serde_json::Value;

/// Information about the currently playing track.
///
/// Built from the `player:player/data` envelope. Fields the speaker does not
/// report stay at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// URL of the album art image, if the source provides one.
    pub album_art: String,
    /// Track duration in milliseconds.
    pub duration: i64,
    /// Playback position in milliseconds. The player data envelope does not
    /// carry it; it stays 0 until the play-time path is wired up.
    pub position: i64,
    /// Transport state reported by the player ("playing", "paused", ...).
    pub state: String,
}

impl PlaybackInfo {
    /// Folds the first element of a `player:player/data` response into a
    /// playback snapshot.
    pub fn from_player_data(data: &Value) -> Self {
        let mut info = Self::default();

        if let Some(state) = data.get("state").and_then(Value::as_str) {
            info.state = state.to_string();
        }
        if let Some(duration) = data.pointer("/status/duration").and_then(Value::as_i64) {
            info.duration = duration;
        }
        if let Some(title) = data.pointer("/trackRoles/title").and_then(Value::as_str) {
            info.title = title.to_string();
        }
        if let Some(icon) = data.pointer("/trackRoles/icon").and_then(Value::as_str) {
            info.album_art = icon.to_string();
        }
        if let Some(artist) = data
            .pointer("/trackRoles/mediaData/metaData/artist")
            .and_then(Value::as_str)
        {
            info.artist = artist.to_string();
        }
        if let Some(album) = data
            .pointer("/trackRoles/mediaData/metaData/album")
            .and_then(Value::as_str)
        {
            info.album = album.to_string();
        }

        info
    }
}

/// Current state of a KEF speaker as seen by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeakerState {
    /// Speaker host address, once configured.
    pub host: Option<String>,
    /// Speaker API port.
    pub port: u16,
    /// Whether the last reachability probe succeeded.
    pub connected: bool,
    /// Last known volume (0-100).
    pub volume: u8,
    /// Last known playback snapshot.
    pub playback: Option<PlaybackInfo>,
    /// Speaker power flag. Not currently reported by the polled paths.
    pub powered_on: bool,
    /// Message of the most recent transport failure, for observability.
    pub last_error: Option<String>,
    /// Detected model (e.g. "LSXII", "LS50WII").
    pub model: Option<String>,
}

/// Extracts the model name from firmware release text.
///
/// Release text looks like "LSXII_4.0.1"; the model is the part before the
/// first underscore.
pub fn model_from_release_text(text: &str) -> Option<String> {
    let model = text.split('_').next().unwrap_or_default();
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}
