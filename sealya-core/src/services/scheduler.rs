/// Scheduler Service
/// Runs the periodic snapshot and undo-window sweep using cron expressions
use crate::config::{SNAPSHOT_CRON, UNDO_SWEEP_CRON};
use crate::error::{AppError, Result};
use crate::services::{BackupService, LettersService};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Scheduler service for background maintenance jobs
pub struct SchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    backup_service: Arc<BackupService>,
    letters_service: LettersService,
    job_ids: Arc<RwLock<Vec<Uuid>>>,
}

impl SchedulerService {
    /// Create new scheduler service
    pub async fn new(
        backup_service: BackupService,
        letters_service: LettersService,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            backup_service: Arc::new(backup_service),
            letters_service,
            job_ids: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Register the jobs and start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.cancel_all().await?;
        self.schedule_snapshots().await?;
        self.schedule_undo_sweep().await?;

        let scheduler = self.scheduler.read().await;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to start scheduler: {}", e)))?;
        tracing::info!("Background scheduler started");
        Ok(())
    }

    /// Periodic snapshot while a user is signed in
    async fn schedule_snapshots(&self) -> Result<()> {
        let backup_service = Arc::clone(&self.backup_service);

        let job = Job::new_async(SNAPSHOT_CRON, move |_uuid, _l| {
            let backup_service = Arc::clone(&backup_service);
            Box::pin(async move {
                run_snapshot_job(&backup_service).await;
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create snapshot job: {}", e)))?;

        self.add_job(job).await?;
        tracing::info!("Snapshot job scheduled ({})", SNAPSHOT_CRON);
        Ok(())
    }

    /// Close undo windows that have elapsed
    async fn schedule_undo_sweep(&self) -> Result<()> {
        let letters_service = self.letters_service.clone();

        let job = Job::new_async(UNDO_SWEEP_CRON, move |_uuid, _l| {
            let letters_service = letters_service.clone();
            Box::pin(async move {
                run_undo_sweep(&letters_service).await;
            })
        })
        .map_err(|e| AppError::Scheduler(format!("Failed to create undo sweep job: {}", e)))?;

        self.add_job(job).await?;
        tracing::info!("Undo sweep job scheduled ({})", UNDO_SWEEP_CRON);
        Ok(())
    }

    async fn add_job(&self, job: Job) -> Result<()> {
        let job_id = job.guid();

        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to schedule job: {}", e)))?;

        self.job_ids.write().await.push(job_id);
        Ok(())
    }

    /// Number of registered jobs
    pub async fn job_count(&self) -> usize {
        self.job_ids.read().await.len()
    }

    /// Remove every registered job
    pub async fn cancel_all(&self) -> Result<()> {
        let mut job_ids = self.job_ids.write().await;

        if job_ids.is_empty() {
            return Ok(());
        }

        let scheduler = self.scheduler.write().await;
        for job_id in job_ids.drain(..) {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| AppError::Scheduler(format!("Failed to remove job: {}", e)))?;
        }

        tracing::info!("Background jobs cancelled");
        Ok(())
    }

    /// Shutdown scheduler gracefully
    pub async fn shutdown(&self) -> Result<()> {
        let mut scheduler = self.scheduler.write().await;
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(format!("Failed to shutdown scheduler: {}", e)))?;
        tracing::info!("Background scheduler shutdown");
        Ok(())
    }
}

/// Body of the periodic snapshot job
async fn run_snapshot_job(backup_service: &BackupService) {
    backup_service.snapshot_quietly("timer").await;
}

/// Body of the undo sweep job; returns how many windows were closed
async fn run_undo_sweep(letters_service: &LettersService) -> usize {
    match letters_service.expire_undo_windows().await {
        Ok(expired) => expired,
        Err(e) => {
            tracing::error!("Undo sweep failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{BACKUP_KEY, LETTERS_KEY};
    use crate::database::{create_memory_pool, Letter, LetterDraft, Repository, Seal, UserIdentity};
    use crate::services::identity::JwtPayloadDecoder;
    use crate::services::IdentityService;
    use crate::storage::IdentityRepository;
    use chrono::{Duration, TimeZone, Utc};

    struct Harness {
        repo: Repository,
        clock: Arc<ManualClock>,
        identity: IdentityService,
        backup: BackupService,
        letters: LettersService,
    }

    async fn harness() -> Harness {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        let mirror = Repository::new(create_memory_pool().await.unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 8, 2, 14, 0, 0).unwrap());
        let identity = IdentityService::new(
            repo.clone(),
            IdentityRepository::redundant(repo.clone(), mirror),
            clock.clone(),
            Arc::new(JwtPayloadDecoder),
        );
        let backup = BackupService::new(repo.clone(), identity.clone(), clock.clone());
        let letters = LettersService::load(repo.clone(), clock.clone()).await.unwrap();
        Harness {
            repo,
            clock,
            identity,
            backup,
            letters,
        }
    }

    async fn create_test_scheduler() -> SchedulerService {
        let h = harness().await;
        SchedulerService::new(h.backup, h.letters).await.unwrap()
    }

    #[test]
    fn test_cron_expressions_parse() {
        assert!(Job::new_async(SNAPSHOT_CRON, |_uuid, _l| Box::pin(async {})).is_ok());
        assert!(Job::new_async(UNDO_SWEEP_CRON, |_uuid, _l| Box::pin(async {})).is_ok());
    }

    #[tokio::test]
    async fn test_start_registers_jobs_once() {
        let scheduler = create_test_scheduler().await;

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.job_count().await, 2);

        scheduler.cancel_all().await.unwrap();
        assert_eq!(scheduler.job_count().await, 0);

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_job_writes_only_when_signed_in() {
        let h = harness().await;

        run_snapshot_job(&h.backup).await;
        assert!(h.repo.get_item(BACKUP_KEY).await.unwrap().is_none());

        h.identity
            .adopt(UserIdentity {
                id: "u-3".to_string(),
                email: "ines@example.com".to_string(),
                name: "Ines".to_string(),
                picture: None,
                age: None,
                login_timestamp: h.clock.now(),
            })
            .await
            .unwrap();

        run_snapshot_job(&h.backup).await;

        let snapshot = h.backup.load_snapshot().await.unwrap();
        assert_eq!(snapshot.timestamp, h.clock.now());
        assert_eq!(snapshot.user.unwrap().id, "u-3");
    }

    #[tokio::test]
    async fn test_undo_sweep_closes_elapsed_windows() {
        let h = harness().await;
        let letter = h
            .letters
            .add(LetterDraft {
                title: "Sweep".to_string(),
                label: String::new(),
                content: "body".to_string(),
                emoji: Seal::Heart,
                scheduled_for: None,
            })
            .await
            .unwrap();

        assert_eq!(run_undo_sweep(&h.letters).await, 0);

        h.clock.advance(Duration::seconds(11));
        assert_eq!(run_undo_sweep(&h.letters).await, 1);

        let stored: Vec<Letter> = h.repo.get_json(LETTERS_KEY).await.unwrap().unwrap();
        assert_eq!(stored[0].id, letter.id);
        assert!(!stored[0].can_undo);
    }
}
