//! Application configuration constants
//!
//! Central location for storage keys, timing windows, and validation
//! boundaries used throughout the core.

// ===== Storage Keys =====

/// Primary identity record
pub const USER_KEY: &str = "sealya-user";
/// Full letter list
pub const LETTERS_KEY: &str = "sealya-letters";
/// Active subscription record
pub const SUBSCRIPTION_KEY: &str = "sealya-subscription";
/// Monthly usage counters
pub const USAGE_STATS_KEY: &str = "sealya-usage-stats";
/// Combined recovery snapshot
pub const BACKUP_KEY: &str = "sealya-backup";

pub const THEME_MODE_KEY: &str = "sealya-theme-mode";
pub const TIME_FORMAT_KEY: &str = "sealya-time-format";
pub const SOUNDSCAPE_VOLUME_KEY: &str = "sealya-soundscape-volume";
pub const SOUNDSCAPE_TRACK_KEY: &str = "sealya-soundscape-track";
pub const ONBOARDING_COMPLETED_KEY: &str = "sealya-onboarding-completed";

/// Preference keys captured by the recovery snapshot
pub const SETTINGS_KEYS: &[&str] = &[
    THEME_MODE_KEY,
    TIME_FORMAT_KEY,
    SOUNDSCAPE_VOLUME_KEY,
    SOUNDSCAPE_TRACK_KEY,
    ONBOARDING_COMPLETED_KEY,
];

/// Sentinel id of the identity row in the mirror table
pub const MIRROR_IDENTITY_ID: &str = "current-user";

// ===== Letters =====

/// Seconds after creation during which a letter may be undone
pub const UNDO_WINDOW_SECS: i64 = 10;

/// Sweep for elapsed undo windows (every 5 seconds)
pub const UNDO_SWEEP_CRON: &str = "*/5 * * * * *";

// ===== Subscription =====

/// Length of a paid subscription period in days
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;

/// Expiry of the implicit free subscription in days
pub const FREE_PERIOD_DAYS: i64 = 365;

/// Themes every tier may use
pub const BASIC_THEMES: &[&str] = &["default", "light", "dark"];

// ===== Identity Backup =====

/// Interval between periodic snapshots while authenticated (every 30 seconds)
pub const SNAPSHOT_CRON: &str = "*/30 * * * * *";

// ===== Theme Scheduler =====

/// Local hour at which sync mode switches to dark
pub const DARK_START_HOUR: u32 = 20;
/// Local hour at which sync mode switches back to light
pub const DARK_END_HOUR: u32 = 6;
/// Local hour at which the cosmetic transition progress starts rising
pub const TRANSITION_START_HOUR: u32 = 18;
/// Seconds between sync-mode re-derivations
pub const THEME_CHECK_INTERVAL_SECS: u64 = 60;

// ===== Soundscape =====

pub const DEFAULT_SOUNDSCAPE_VOLUME: f32 = 0.3;
pub const MIN_SOUNDSCAPE_VOLUME: f32 = 0.0;
pub const MAX_SOUNDSCAPE_VOLUME: f32 = 1.0;

/// Known ambient track ids
pub const VALID_SOUNDSCAPE_TRACKS: &[&str] = &["rain", "library", "piano", "forest", "ocean"];
