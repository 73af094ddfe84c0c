//! Backup service
//!
//! Writes a combined recovery snapshot (identity, letters, subscription,
//! settings) while a user is signed in, and runs the startup recovery
//! chain: identity stores first, then the snapshot.

use crate::clock::SharedClock;
use crate::config::{BACKUP_KEY, LETTERS_KEY, SETTINGS_KEYS, SUBSCRIPTION_KEY};
use crate::database::{BackupSnapshot, Repository};
use crate::error::{AppError, Result};
use crate::services::IdentityService;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// How startup recovery found the identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Loaded from an identity store
    Store { source: &'static str, healed: bool },
    /// Rebuilt from the snapshot; lists the restored record keys
    Snapshot { restored: Vec<String> },
    Anonymous,
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    repo: Repository,
    identity: IdentityService,
    clock: SharedClock,
}

impl BackupService {
    pub fn new(repo: Repository, identity: IdentityService, clock: SharedClock) -> Self {
        Self {
            repo,
            identity,
            clock,
        }
    }

    /// Write a fresh snapshot; skipped while anonymous.
    ///
    /// Runs under the identity session guard, so a logout either waits for
    /// the snapshot (and then removes it) or finishes first.
    pub async fn snapshot(&self) -> Result<Option<BackupSnapshot>> {
        let session = self.identity.lock_session().await;

        // Keep the identity stores in step with the snapshot
        let Some(user) = self.identity.persist(&session).await? else {
            tracing::debug!("Snapshot skipped, no signed-in user");
            return Ok(None);
        };

        let mut settings = BTreeMap::new();
        for key in SETTINGS_KEYS {
            if let Some(value) = self.repo.get_item(key).await? {
                settings.insert(key.to_string(), value);
            }
        }

        let mut snapshot = BackupSnapshot {
            user: Some(user),
            letters: self.repo.get_item(LETTERS_KEY).await?,
            subscription: self.repo.get_item(SUBSCRIPTION_KEY).await?,
            settings,
            timestamp: self.clock.now(),
            checksum: None,
        };
        snapshot.checksum = Some(calculate_checksum(&snapshot)?);

        self.repo.set_json(BACKUP_KEY, &snapshot).await?;

        tracing::debug!("Snapshot written at {}", snapshot.timestamp);
        Ok(Some(snapshot))
    }

    /// Stored snapshot if it parses and its checksum matches
    pub async fn load_snapshot(&self) -> Option<BackupSnapshot> {
        let snapshot = match self.repo.get_json::<BackupSnapshot>(BACKUP_KEY).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Snapshot is unreadable: {}", e);
                return None;
            }
        };

        if let Some(expected) = &snapshot.checksum {
            match calculate_checksum(&snapshot) {
                Ok(actual) if &actual == expected => {}
                Ok(actual) => {
                    tracing::warn!(
                        "Snapshot checksum mismatch: expected {}, got {}",
                        expected,
                        actual
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!("Failed to verify snapshot: {}", e);
                    return None;
                }
            }
        }

        Some(snapshot)
    }

    /// Startup recovery.
    ///
    /// Identity stores are tried in order; when none holds a usable record
    /// the snapshot is restored wholesale, replacing the letters,
    /// subscription and settings records with the copies it carries.
    pub async fn restore(&self) -> Result<Recovery> {
        if let Some(hit) = self.identity.load_from_stores().await {
            tracing::info!("Identity restored from {} store", hit.source);
            return Ok(Recovery::Store {
                source: hit.source,
                healed: hit.from_fallback,
            });
        }

        let Some(snapshot) = self.load_snapshot().await else {
            tracing::info!("No identity to restore, starting anonymous");
            return Ok(Recovery::Anonymous);
        };

        let Some(user) = snapshot.user else {
            tracing::info!("Snapshot carries no identity, starting anonymous");
            return Ok(Recovery::Anonymous);
        };

        let mut restored = Vec::new();

        if let Some(letters) = &snapshot.letters {
            self.repo.set_item(LETTERS_KEY, letters).await?;
            restored.push(LETTERS_KEY.to_string());
        }
        if let Some(subscription) = &snapshot.subscription {
            self.repo.set_item(SUBSCRIPTION_KEY, subscription).await?;
            restored.push(SUBSCRIPTION_KEY.to_string());
        }
        for (key, value) in &snapshot.settings {
            if !SETTINGS_KEYS.contains(&key.as_str()) {
                tracing::warn!("Ignoring unknown settings key in snapshot: {}", key);
                continue;
            }
            self.repo.set_item(key, value).await?;
            restored.push(key.clone());
        }

        self.identity.adopt(user).await?;

        tracing::info!(
            "Identity restored from snapshot taken {} ({} records)",
            snapshot.timestamp,
            restored.len()
        );
        Ok(Recovery::Snapshot { restored })
    }

    /// Snapshot for a background trigger; failures are logged, not returned
    pub async fn snapshot_quietly(&self, trigger: &str) {
        match self.snapshot().await {
            Ok(Some(_)) => tracing::debug!("Snapshot taken on {}", trigger),
            Ok(None) => {}
            Err(e) => tracing::error!("Snapshot on {} failed: {}", trigger, e),
        }
    }

    /// The UI went to the background
    pub async fn on_visibility_hidden(&self) {
        self.snapshot_quietly("visibility change").await;
    }

    /// The application is shutting down
    pub async fn on_unload(&self) {
        self.snapshot_quietly("unload").await;
    }
}

/// SHA-256 over the snapshot payload with the checksum field cleared
fn calculate_checksum(snapshot: &BackupSnapshot) -> Result<String> {
    let mut payload = snapshot.clone();
    payload.checksum = None;

    let bytes = serde_json::to_vec(&payload)
        .map_err(|e| AppError::Storage(format!("Failed to encode snapshot: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{MIRROR_IDENTITY_ID, THEME_MODE_KEY, USER_KEY};
    use crate::database::{create_memory_pool, UserIdentity};
    use crate::services::identity::JwtPayloadDecoder;
    use crate::storage::IdentityRepository;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    struct Harness {
        repo: Repository,
        mirror: Repository,
        clock: Arc<ManualClock>,
        identity: IdentityService,
        backup: BackupService,
    }

    async fn harness_on(
        repo: Repository,
        mirror: Repository,
        clock: Arc<ManualClock>,
    ) -> Harness {
        let identity = IdentityService::new(
            repo.clone(),
            IdentityRepository::redundant(repo.clone(), mirror.clone()),
            clock.clone(),
            Arc::new(JwtPayloadDecoder),
        );
        let backup = BackupService::new(repo.clone(), identity.clone(), clock.clone());
        Harness {
            repo,
            mirror,
            clock,
            identity,
            backup,
        }
    }

    async fn harness() -> Harness {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        let mirror = Repository::new(create_memory_pool().await.unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());
        harness_on(repo, mirror, clock).await
    }

    /// Same databases, fresh services, as after a restart
    async fn restarted(h: &Harness) -> Harness {
        harness_on(h.repo.clone(), h.mirror.clone(), h.clock.clone()).await
    }

    fn user() -> UserIdentity {
        UserIdentity {
            id: "u-1".to_string(),
            email: "lin@example.com".to_string(),
            name: "Lin".to_string(),
            picture: None,
            age: Some(29),
            login_timestamp: Utc.with_ymd_and_hms(2025, 6, 30, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_skipped_when_anonymous() {
        let h = harness().await;

        assert!(h.backup.snapshot().await.unwrap().is_none());
        assert!(h.repo.get_item(BACKUP_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_captures_all_records() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();
        h.repo.set_item(LETTERS_KEY, "[]").await.unwrap();
        h.repo.set_item(SUBSCRIPTION_KEY, "{\"tier\":\"plus\"}").await.unwrap();
        h.repo.set_item(THEME_MODE_KEY, "sync").await.unwrap();

        let snapshot = h.backup.snapshot().await.unwrap().unwrap();

        assert_eq!(snapshot.letters.as_deref(), Some("[]"));
        assert_eq!(snapshot.subscription.as_deref(), Some("{\"tier\":\"plus\"}"));
        assert_eq!(snapshot.settings.get(THEME_MODE_KEY).map(String::as_str), Some("sync"));
        assert_eq!(snapshot.timestamp, h.clock.now());
        assert!(h.backup.load_snapshot().await.is_some());
    }

    #[tokio::test]
    async fn test_restore_prefers_primary_store() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();
        h.backup.snapshot().await.unwrap();

        let fresh = restarted(&h).await;
        let recovery = fresh.backup.restore().await.unwrap();

        assert_eq!(
            recovery,
            Recovery::Store {
                source: "primary",
                healed: false
            }
        );
        assert!(fresh.identity.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_restore_from_snapshot_only() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();
        let letters = concat!(
            r#"[{"id":"a","title":"t","label":"","content":"c","emoji":"✨","#,
            r#""timestamp":"2025-06-30T09:00:00Z","isSealed":true}]"#
        );
        h.repo.set_item(LETTERS_KEY, letters).await.unwrap();
        h.repo.set_item(THEME_MODE_KEY, "dark").await.unwrap();
        h.backup.snapshot().await.unwrap();

        // Primary corrupt, mirror gone, other records wiped
        h.repo.set_item(USER_KEY, "{oops").await.unwrap();
        h.mirror.delete_mirror_record(MIRROR_IDENTITY_ID).await.unwrap();
        h.repo.remove_item(LETTERS_KEY).await.unwrap();
        h.repo.remove_item(THEME_MODE_KEY).await.unwrap();

        let fresh = restarted(&h).await;
        let recovery = fresh.backup.restore().await.unwrap();

        match recovery {
            Recovery::Snapshot { restored } => {
                assert!(restored.contains(&LETTERS_KEY.to_string()));
                assert!(restored.contains(&THEME_MODE_KEY.to_string()));
            }
            other => panic!("unexpected recovery: {:?}", other),
        }
        assert_eq!(fresh.identity.current().await.unwrap().email, "lin@example.com");
        assert!(h.repo.get_item(LETTERS_KEY).await.unwrap().unwrap().contains("\"a\""));
        assert_eq!(h.repo.get_item(THEME_MODE_KEY).await.unwrap().as_deref(), Some("dark"));

        // Identity stores are repopulated
        let primary: UserIdentity = h.repo.get_json(USER_KEY).await.unwrap().unwrap();
        assert_eq!(primary.id, "u-1");
    }

    #[tokio::test]
    async fn test_tampered_snapshot_ignored() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();
        let mut snapshot = h.backup.snapshot().await.unwrap().unwrap();
        snapshot.letters = Some("[]".to_string());
        h.repo.set_json(BACKUP_KEY, &snapshot).await.unwrap();
        h.repo.remove_item(USER_KEY).await.unwrap();
        h.mirror.delete_mirror_record(MIRROR_IDENTITY_ID).await.unwrap();

        let fresh = restarted(&h).await;

        assert_eq!(fresh.backup.restore().await.unwrap(), Recovery::Anonymous);
    }

    #[tokio::test]
    async fn test_restore_with_nothing_is_anonymous() {
        let h = harness().await;
        h.repo.set_item(BACKUP_KEY, "not json").await.unwrap();

        assert_eq!(h.backup.restore().await.unwrap(), Recovery::Anonymous);
        assert!(!h.identity.is_authenticated().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_logout_wins_over_concurrent_snapshots() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();

        let snapshots: Vec<_> = (0..20)
            .map(|_| {
                let backup = h.backup.clone();
                tokio::spawn(async move { backup.snapshot().await.unwrap() })
            })
            .collect();
        h.identity.logout().await.unwrap();
        for handle in snapshots {
            handle.await.unwrap();
        }

        assert!(h.repo.get_item(BACKUP_KEY).await.unwrap().is_none());
        assert!(h.repo.get_item(USER_KEY).await.unwrap().is_none());
        assert!(h
            .mirror
            .get_mirror_record(MIRROR_IDENTITY_ID)
            .await
            .unwrap()
            .is_none());

        let fresh = restarted(&h).await;
        assert_eq!(fresh.backup.restore().await.unwrap(), Recovery::Anonymous);
    }

    #[tokio::test]
    async fn test_later_snapshot_overwrites_earlier() {
        let h = harness().await;
        h.identity.adopt(user()).await.unwrap();
        h.backup.snapshot().await.unwrap();

        h.clock.advance(Duration::seconds(30));
        h.backup.on_visibility_hidden().await;

        let snapshot = h.backup.load_snapshot().await.unwrap();
        assert_eq!(snapshot.timestamp, h.clock.now());
    }
}
