//! Settings service
//!
//! User preferences kept as raw strings in the key-value store, one key per
//! preference, so they can be snapshotted and restored verbatim.

use crate::config::{
    DEFAULT_SOUNDSCAPE_VOLUME, MAX_SOUNDSCAPE_VOLUME, MIN_SOUNDSCAPE_VOLUME,
    ONBOARDING_COMPLETED_KEY, SOUNDSCAPE_TRACK_KEY, SOUNDSCAPE_VOLUME_KEY, THEME_MODE_KEY,
    TIME_FORMAT_KEY, VALID_SOUNDSCAPE_TRACKS,
};
use crate::database::Repository;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Ambient soundscape preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundscapeSettings {
    #[serde(default = "default_soundscape_volume")]
    pub volume: f32,
    /// Selected track id, if any
    #[serde(default)]
    pub track: Option<String>,
}

fn default_soundscape_volume() -> f32 {
    DEFAULT_SOUNDSCAPE_VOLUME
}

impl Default for SoundscapeSettings {
    fn default() -> Self {
        Self {
            volume: default_soundscape_volume(),
            track: None,
        }
    }
}

/// All user preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Raw theme mode, owned by the theme service
    #[serde(default)]
    pub theme_mode: Option<String>,
    #[serde(default)]
    pub time_format: Option<String>,
    #[serde(default)]
    pub soundscape: SoundscapeSettings,
    #[serde(default)]
    pub onboarding_completed: bool,
}

/// Service for user preferences
#[derive(Clone)]
pub struct SettingsService {
    repo: Repository,
}

impl SettingsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Read every preference, substituting defaults for missing or bad values
    pub async fn load(&self) -> Result<UserSettings> {
        let volume = match self.repo.get_item(SOUNDSCAPE_VOLUME_KEY).await? {
            Some(raw) => match raw.parse::<f32>() {
                Ok(volume) if volume.is_finite() => clamp_volume(volume),
                _ => {
                    tracing::warn!("Ignoring stored soundscape volume: {}", raw);
                    DEFAULT_SOUNDSCAPE_VOLUME
                }
            },
            None => DEFAULT_SOUNDSCAPE_VOLUME,
        };

        let track = self
            .repo
            .get_item(SOUNDSCAPE_TRACK_KEY)
            .await?
            .filter(|track| VALID_SOUNDSCAPE_TRACKS.contains(&track.as_str()));

        let onboarding_completed = self
            .repo
            .get_item(ONBOARDING_COMPLETED_KEY)
            .await?
            .is_some_and(|raw| raw == "true");

        Ok(UserSettings {
            theme_mode: self.repo.get_item(THEME_MODE_KEY).await?,
            time_format: self.repo.get_item(TIME_FORMAT_KEY).await?,
            soundscape: SoundscapeSettings { volume, track },
            onboarding_completed,
        })
    }

    pub async fn get_soundscape(&self) -> Result<SoundscapeSettings> {
        Ok(self.load().await?.soundscape)
    }

    /// Store the volume clamped to [0, 1]; returns the stored value
    pub async fn set_soundscape_volume(&self, volume: f32) -> Result<f32> {
        if !volume.is_finite() {
            return Err(AppError::Generic(format!(
                "Invalid soundscape volume: {}",
                volume
            )));
        }

        let volume = clamp_volume(volume);
        self.repo
            .set_item(SOUNDSCAPE_VOLUME_KEY, &volume.to_string())
            .await?;
        Ok(volume)
    }

    /// Select a known track, or clear the selection with `None`
    pub async fn set_soundscape_track(&self, track: Option<&str>) -> Result<()> {
        match track {
            Some(track) if VALID_SOUNDSCAPE_TRACKS.contains(&track) => {
                self.repo.set_item(SOUNDSCAPE_TRACK_KEY, track).await?;
                tracing::debug!("Soundscape track set to {}", track);
            }
            Some(track) => {
                return Err(AppError::Generic(format!(
                    "Unknown soundscape track: {}",
                    track
                )));
            }
            None => self.repo.remove_item(SOUNDSCAPE_TRACK_KEY).await?,
        }
        Ok(())
    }

    pub async fn complete_onboarding(&self) -> Result<()> {
        self.repo.set_item(ONBOARDING_COMPLETED_KEY, "true").await
    }

    pub async fn is_onboarding_completed(&self) -> Result<bool> {
        Ok(self.load().await?.onboarding_completed)
    }
}

fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(MIN_SOUNDSCAPE_VOLUME, MAX_SOUNDSCAPE_VOLUME)
}
