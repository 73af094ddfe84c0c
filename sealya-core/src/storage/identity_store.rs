//! Redundant identity persistence
//!
//! One repository over an ordered list of backends. Reads walk the list
//! and return the first record that loads; writes fan out to every
//! backend and succeed when at least one accepts.

use crate::config::{MIRROR_IDENTITY_ID, USER_KEY};
use crate::database::{Repository, UserIdentity};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A backend able to hold the identity record
#[async_trait]
pub trait IdentityStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err` means the backend holds something it cannot parse or is unavailable.
    async fn load(&self) -> Result<Option<UserIdentity>>;

    async fn save(&self, user: &UserIdentity) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Identity stored in the key-value substrate
pub struct PrimaryIdentityStore {
    repo: Repository,
}

impl PrimaryIdentityStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl IdentityStore for PrimaryIdentityStore {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn load(&self) -> Result<Option<UserIdentity>> {
        self.repo.get_json(USER_KEY).await
    }

    async fn save(&self, user: &UserIdentity) -> Result<()> {
        self.repo.set_json(USER_KEY, user).await
    }

    async fn clear(&self) -> Result<()> {
        self.repo.remove_item(USER_KEY).await
    }
}

/// Identity mirrored under a sentinel id in a separate database file
pub struct MirrorIdentityStore {
    repo: Repository,
}

impl MirrorIdentityStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl IdentityStore for MirrorIdentityStore {
    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn load(&self) -> Result<Option<UserIdentity>> {
        match self.repo.get_mirror_record(MIRROR_IDENTITY_ID).await? {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, user: &UserIdentity) -> Result<()> {
        let record = serde_json::to_string(user)?;
        self.repo
            .put_mirror_record(MIRROR_IDENTITY_ID, &record)
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.repo.delete_mirror_record(MIRROR_IDENTITY_ID).await
    }
}

/// Result of a fallback read
#[derive(Debug, Clone)]
pub struct IdentityHit {
    pub user: UserIdentity,
    pub source: &'static str,
    /// True when an earlier backend was empty or unreadable
    pub from_fallback: bool,
}

/// Ordered set of identity backends
#[derive(Clone)]
pub struct IdentityRepository {
    stores: Vec<Arc<dyn IdentityStore>>,
}

impl IdentityRepository {
    pub fn new(stores: Vec<Arc<dyn IdentityStore>>) -> Self {
        Self { stores }
    }

    /// Primary key-value record first, mirror database second
    pub fn redundant(primary: Repository, mirror: Repository) -> Self {
        Self::new(vec![
            Arc::new(PrimaryIdentityStore::new(primary)),
            Arc::new(MirrorIdentityStore::new(mirror)),
        ])
    }

    /// First identity any backend can produce
    pub async fn load(&self) -> Option<IdentityHit> {
        for (index, store) in self.stores.iter().enumerate() {
            match store.load().await {
                Ok(Some(user)) => {
                    tracing::debug!("Identity loaded from {} store", store.name());
                    return Some(IdentityHit {
                        user,
                        source: store.name(),
                        from_fallback: index > 0,
                    });
                }
                Ok(None) => {
                    tracing::debug!("No identity in {} store", store.name());
                }
                Err(e) => {
                    tracing::warn!("Unreadable identity in {} store: {}", store.name(), e);
                }
            }
        }

        None
    }

    /// Write to every backend; fails only when none accepted the record
    pub async fn save(&self, user: &UserIdentity) -> Result<()> {
        let mut accepted = 0;
        let mut last_error = None;

        for store in &self.stores {
            match store.save(user).await {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::warn!("Failed to save identity to {} store: {}", store.name(), e);
                    last_error = Some(e);
                }
            }
        }

        if accepted == 0 {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no identity stores configured".to_string());
            return Err(AppError::Storage(format!("Identity not persisted: {}", reason)));
        }

        Ok(())
    }

    /// Remove the record from every backend, attempting all before reporting
    pub async fn clear(&self) -> Result<()> {
        let mut failed = Vec::new();

        for store in &self.stores {
            if let Err(e) = store.clear().await {
                tracing::error!("Failed to clear identity from {} store: {}", store.name(), e);
                failed.push(store.name());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::Storage(format!(
                "Identity still present in: {}",
                failed.join(", ")
            )))
        }
    }
}
