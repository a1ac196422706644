//! Background music player state.
//!
//! Only the player's state lives here: volume, playing flag and the
//! resume rules. Audio output belongs to the front end.

use tracing::{debug, warn};

use crate::storage::{keys, LocalStorage};

pub const DEFAULT_VOLUME: f32 = 0.5;

pub struct MusicPlayer {
    storage: LocalStorage,
    volume: f32,
    playing: bool,
    /// Saved as playing last time; start on the first user interaction.
    should_autoplay: bool,
    /// Paused because the page was hidden.
    auto_resume: bool,
}

impl MusicPlayer {
    /// Restore volume and playing state. Playback never starts here.
    pub async fn load(storage: LocalStorage) -> Self {
        let volume = storage
            .get(keys::MUSIC_VOLUME)
            .await
            .and_then(|v| v.parse::<f32>().ok())
            .map(clamp_volume)
            .unwrap_or(DEFAULT_VOLUME);
        let should_autoplay = storage.get(keys::MUSIC_PLAYING).await.as_deref() == Some("true");

        debug!(volume = volume, should_autoplay = should_autoplay, "Loaded music state");
        Self {
            storage,
            volume,
            playing: false,
            should_autoplay,
            auto_resume: false,
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn toggle(&mut self) -> bool {
        self.playing = !self.playing;
        self.playing
    }

    /// First click/key/touch. Returns true if playback started.
    pub fn on_first_interaction(&mut self) -> bool {
        if std::mem::take(&mut self.should_autoplay) {
            self.play();
            return true;
        }
        false
    }

    pub fn on_visibility_change(&mut self, hidden: bool) {
        if hidden && self.playing {
            self.pause();
            self.auto_resume = true;
        } else if !hidden && self.auto_resume {
            self.play();
            self.auto_resume = false;
        }
    }

    pub async fn save_state(&self) {
        if let Err(e) = self
            .storage
            .set(keys::MUSIC_VOLUME, &self.volume.to_string())
            .await
        {
            warn!(error = %e, "Failed to save music volume");
        }
        if let Err(e) = self
            .storage
            .set(keys::MUSIC_PLAYING, &self.playing.to_string())
            .await
        {
            warn!(error = %e, "Failed to save music state");
        }
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        DEFAULT_VOLUME
    } else {
        volume.clamp(0.0, 1.0)
    }
}
