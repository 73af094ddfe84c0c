//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::clock::SharedClock;
use crate::database::{create_pool, Letter, LetterDraft, Repository};
use crate::error::Result;
use crate::services::{
    BackupService, ExportService, IdentityService, JwtPayloadDecoder, LettersService, Recovery,
    Reservation, SchedulerService, SettingsService, SubscriptionService, ThemeMode,
    ThemeService, TokenDecoder, UsageSummary,
};
use crate::storage::IdentityRepository;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Database file inside the data directory
const DATABASE_FILE: &str = "sealya.sqlite";

/// Separate file for the identity mirror, so losing the main database
/// does not lose the identity
const MIRROR_DATABASE_FILE: &str = "identity-mirror.sqlite";

pub use crate::services::LimitKind;

/// Result of composing a letter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ComposeOutcome {
    Sealed { letter: Letter },
    LimitReached { limit: LimitKind, usage: UsageSummary },
}

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub repo: Repository,
    /// Identity mirror database
    pub mirror: Repository,
    pub identity: IdentityService,
    pub backup: BackupService,
    pub letters: LettersService,
    pub subscription: SubscriptionService,
    pub theme: ThemeService,
    pub settings: SettingsService,
    pub export: ExportService,
    /// How the identity was found at startup
    pub recovery: Recovery,
    clock: SharedClock,
}

impl AppState {
    /// Open the on-disk store under `app_data_dir` and bring every service up
    pub async fn open(app_data_dir: PathBuf, clock: SharedClock) -> Result<Self> {
        tracing::info!("App data directory: {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;
        let pool = create_pool(&app_data_dir.join(DATABASE_FILE)).await?;
        let mirror_pool = create_pool(&app_data_dir.join(MIRROR_DATABASE_FILE)).await?;

        Self::from_pool(
            pool,
            mirror_pool,
            app_data_dir,
            clock,
            Arc::new(JwtPayloadDecoder),
        )
        .await
    }

    /// Build the state over existing pools.
    ///
    /// Recovery runs before any other record is loaded, since restoring a
    /// snapshot may replace the letters, subscription and settings records.
    pub async fn from_pool(
        pool: SqlitePool,
        mirror_pool: SqlitePool,
        app_data_dir: PathBuf,
        clock: SharedClock,
        decoder: Arc<dyn TokenDecoder>,
    ) -> Result<Self> {
        tracing::info!("Initializing application");

        let repo = Repository::new(pool);
        let mirror = Repository::new(mirror_pool);
        let identity = IdentityService::new(
            repo.clone(),
            IdentityRepository::redundant(repo.clone(), mirror.clone()),
            Arc::clone(&clock),
            decoder,
        );
        let backup = BackupService::new(repo.clone(), identity.clone(), Arc::clone(&clock));

        let recovery = backup.restore().await?;

        let letters = LettersService::load(repo.clone(), Arc::clone(&clock)).await?;
        let subscription = SubscriptionService::load(repo.clone(), Arc::clone(&clock)).await?;
        let theme = ThemeService::load(repo.clone(), Arc::clone(&clock), ThemeMode::Light).await?;
        let settings = SettingsService::new(repo.clone());
        let export = ExportService::new(app_data_dir.clone(), Arc::clone(&clock));

        tracing::info!("Application initialized successfully ({:?})", recovery);

        Ok(Self {
            app_data_dir,
            repo,
            mirror,
            identity,
            backup,
            letters,
            subscription,
            theme,
            settings,
            export,
            recovery,
            clock,
        })
    }

    /// Seal a new letter if the monthly allowances permit it.
    ///
    /// The allowance slot is claimed before the letter is stored and given
    /// back if storing fails, so usage never trails the letters list.
    pub async fn compose_letter(&self, draft: LetterDraft) -> Result<ComposeOutcome> {
        let scheduled = draft
            .scheduled_for
            .is_some_and(|unlock_at| unlock_at > self.clock.now());

        if let Reservation::LimitReached(limit) =
            self.subscription.try_reserve_letter(scheduled).await?
        {
            tracing::info!("Letter not sealed, {:?} limit reached", limit);
            return Ok(ComposeOutcome::LimitReached {
                limit,
                usage: self.subscription.usage_stats().await,
            });
        }

        match self.letters.add(draft).await {
            Ok(letter) => Ok(ComposeOutcome::Sealed { letter }),
            Err(e) => {
                if let Err(release) = self.subscription.release_letter(scheduled).await {
                    tracing::error!("Failed to release usage slot: {}", release);
                }
                Err(e)
            }
        }
    }

    /// Password-protect a letter; `false` when the tier does not include it
    pub async fn protect_letter(&self, id: &str, password: &str) -> Result<bool> {
        if !self.subscription.can_password_protect().await {
            tracing::info!("Password protection not available on current tier");
            return Ok(false);
        }

        self.letters.protect(id, password).await?;
        Ok(true)
    }

    /// Export every letter to a ZIP archive; `None` when the tier does not include it
    pub async fn export_letters(&self) -> Result<Option<PathBuf>> {
        if !self.subscription.can_bulk_export().await {
            tracing::info!("Bulk export not available on current tier");
            return Ok(None);
        }

        let letters = self.letters.list().await;
        Ok(Some(self.export.export_letters(&letters).await?))
    }

    /// Sign in from an identity assertion and snapshot immediately
    pub async fn login(&self, token: &str) -> Result<()> {
        self.identity.login_with_token(token).await?;
        self.backup.snapshot().await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.identity.logout().await
    }

    pub async fn on_visibility_hidden(&self) {
        self.backup.on_visibility_hidden().await;
    }

    pub async fn on_unload(&self) {
        self.backup.on_unload().await;
    }

    /// Close both databases
    pub async fn close(&self) {
        self.repo.pool().close().await;
        self.mirror.pool().close().await;
    }

    /// Start the cron jobs and the theme ticker
    pub async fn start_background(
        &self,
    ) -> Result<(SchedulerService, tokio::task::JoinHandle<()>)> {
        let scheduler = SchedulerService::new(self.backup.clone(), self.letters.clone()).await?;
        scheduler.start().await?;

        let ticker = self.theme.clone().start_sync_ticker();

        Ok((scheduler, ticker))
    }
}
