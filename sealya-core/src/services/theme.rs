//! Theme service
//!
//! Owns the theme mode and time format preferences. In sync mode the
//! effective theme follows the local hour and is re-derived by a ticker.

use crate::clock::SharedClock;
use crate::config::{
    DARK_END_HOUR, DARK_START_HOUR, THEME_CHECK_INTERVAL_SECS, THEME_MODE_KEY, TIME_FORMAT_KEY,
    TRANSITION_START_HOUR,
};
use crate::database::Repository;
use crate::error::{AppError, Result};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Rendered theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// User-selected theme mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    Sync,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Light => "light",
            ThemeMode::Dark => "dark",
            ThemeMode::Sync => "sync",
        }
    }

    /// light -> dark -> sync -> light
    pub fn next(self) -> Self {
        match self {
            ThemeMode::Light => ThemeMode::Dark,
            ThemeMode::Dark => ThemeMode::Sync,
            ThemeMode::Sync => ThemeMode::Light,
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light" => Ok(ThemeMode::Light),
            "dark" => Ok(ThemeMode::Dark),
            "sync" => Ok(ThemeMode::Sync),
            other => Err(AppError::Generic(format!("invalid theme mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeFormat {
    #[default]
    #[serde(rename = "12h")]
    TwelveHour,
    #[serde(rename = "24h")]
    TwentyFourHour,
}

impl TimeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFormat::TwelveHour => "12h",
            TimeFormat::TwentyFourHour => "24h",
        }
    }
}

impl FromStr for TimeFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "12h" => Ok(TimeFormat::TwelveHour),
            "24h" => Ok(TimeFormat::TwentyFourHour),
            other => Err(AppError::Generic(format!("invalid time format: {}", other))),
        }
    }
}

/// Theme for `mode` at local `hour`. Sync is dark in [20:00, 06:00).
pub fn effective_theme(mode: ThemeMode, hour: u32) -> Theme {
    match mode {
        ThemeMode::Light => Theme::Light,
        ThemeMode::Dark => Theme::Dark,
        ThemeMode::Sync if hour >= DARK_START_HOUR || hour < DARK_END_HOUR => Theme::Dark,
        ThemeMode::Sync => Theme::Light,
    }
}

/// Cosmetic blend factor: 0 until 18:00, rising to 1 by 20:00, 1 until 06:00.
///
/// Display only; the theme decision never reads it.
pub fn transition_progress(hour: u32, minute: u32) -> f32 {
    let minutes = hour * 60 + minute;
    let start = TRANSITION_START_HOUR * 60;
    let span = (DARK_START_HOUR - TRANSITION_START_HOUR) * 60;

    if minutes >= start {
        ((minutes - start) as f32 / span as f32).min(1.0)
    } else if minutes < DARK_END_HOUR * 60 {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
struct ThemeState {
    mode: ThemeMode,
    time_format: TimeFormat,
}

/// Service for theme and clock display preferences
#[derive(Clone)]
pub struct ThemeService {
    repo: Repository,
    clock: SharedClock,
    state: Arc<Mutex<ThemeState>>,
    sender: Arc<watch::Sender<Theme>>,
}

impl ThemeService {
    /// Load stored preferences; `fallback_mode` applies when none is stored
    pub async fn load(
        repo: Repository,
        clock: SharedClock,
        fallback_mode: ThemeMode,
    ) -> Result<Self> {
        let mode = match repo.get_item(THEME_MODE_KEY).await? {
            Some(raw) => raw.parse::<ThemeMode>().unwrap_or_else(|e| {
                tracing::warn!("Ignoring stored theme mode: {}", e);
                fallback_mode
            }),
            None => fallback_mode,
        };

        let time_format = match repo.get_item(TIME_FORMAT_KEY).await? {
            Some(raw) => raw.parse::<TimeFormat>().unwrap_or_else(|e| {
                tracing::warn!("Ignoring stored time format: {}", e);
                TimeFormat::default()
            }),
            None => TimeFormat::default(),
        };

        let theme = effective_theme(mode, clock.local_now().hour());
        let (sender, _) = watch::channel(theme);

        tracing::debug!("Theme loaded: mode {}, theme {:?}", mode, theme);

        Ok(Self {
            repo,
            clock,
            state: Arc::new(Mutex::new(ThemeState { mode, time_format })),
            sender: Arc::new(sender),
        })
    }

    pub async fn mode(&self) -> ThemeMode {
        self.state.lock().await.mode
    }

    pub async fn time_format(&self) -> TimeFormat {
        self.state.lock().await.time_format
    }

    /// Effective theme right now
    pub async fn theme(&self) -> Theme {
        let mode = self.mode().await;
        effective_theme(mode, self.clock.local_now().hour())
    }

    /// Transition progress in sync mode, `None` otherwise
    pub async fn progress(&self) -> Option<f32> {
        if self.mode().await != ThemeMode::Sync {
            return None;
        }
        let now = self.clock.local_now();
        Some(transition_progress(now.hour(), now.minute()))
    }

    /// Receiver notified whenever the effective theme changes
    pub fn subscribe(&self) -> watch::Receiver<Theme> {
        self.sender.subscribe()
    }

    pub async fn set_mode(&self, mode: ThemeMode) -> Result<Theme> {
        {
            let mut state = self.state.lock().await;
            state.mode = mode;
            self.repo.set_item(THEME_MODE_KEY, mode.as_str()).await?;
        }

        tracing::info!("Theme mode set to {}", mode);
        Ok(self.refresh().await)
    }

    pub async fn toggle(&self) -> Result<ThemeMode> {
        let next = self.mode().await.next();
        self.set_mode(next).await?;
        Ok(next)
    }

    /// Re-derive the effective theme and publish it if it changed
    pub async fn refresh(&self) -> Theme {
        let theme = self.theme().await;
        self.sender.send_if_modified(|current| {
            if *current == theme {
                false
            } else {
                tracing::info!("Theme changed to {:?}", theme);
                *current = theme;
                true
            }
        });
        theme
    }

    pub async fn set_time_format(&self, format: TimeFormat) -> Result<()> {
        let mut state = self.state.lock().await;
        state.time_format = format;
        self.repo.set_item(TIME_FORMAT_KEY, format.as_str()).await?;
        Ok(())
    }

    /// Current local time, e.g. `Tue, 01/07/2025, 09:05 pm`
    pub async fn formatted_time(&self) -> String {
        let pattern = match self.time_format().await {
            TimeFormat::TwelveHour => "%a, %d/%m/%Y, %I:%M %P",
            TimeFormat::TwentyFourHour => "%a, %d/%m/%Y, %H:%M",
        };
        self.clock.local_now().format(pattern).to_string()
    }

    /// Re-derive the sync theme once a minute in the background
    pub fn start_sync_ticker(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Starting theme sync ticker");

            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                THEME_CHECK_INTERVAL_SECS,
            ));

            loop {
                interval.tick().await;

                if self.mode().await == ThemeMode::Sync {
                    self.refresh().await;
                }
            }
        })
    }
}
