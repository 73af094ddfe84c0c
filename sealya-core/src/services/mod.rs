//! Services module
//!
//! Business logic services that own each record and flush it through the repository.

pub mod backup;
pub mod export;
pub mod identity;
pub mod letters;
pub mod scheduler;
pub mod settings;
pub mod subscription;
pub mod theme;

pub use backup::{BackupService, Recovery};
pub use export::ExportService;
pub use identity::{IdentityService, JwtPayloadDecoder, SessionGuard, TokenDecoder};
pub use letters::{LetterQuery, LetterSort, LetterStats, LettersService};
pub use scheduler::SchedulerService;
pub use settings::{SettingsService, SoundscapeSettings, UserSettings};
pub use subscription::{
    LimitKind, Reservation, SubscriptionService, UpgradeOutcome, UsageSummary,
};
pub use theme::{Theme, ThemeMode, ThemeService, TimeFormat};
