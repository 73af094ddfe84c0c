//! Identity service
//!
//! Simulated sign-in: an identity assertion token is decoded into a user
//! record that is kept in memory and fanned out to every identity store.

use crate::clock::SharedClock;
use crate::config::BACKUP_KEY;
use crate::database::{Repository, UserIdentity, UserPatch};
use crate::error::{AppError, Result};
use crate::storage::{IdentityHit, IdentityRepository};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Claims carried by an identity assertion
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Turns an opaque assertion into claims
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<IdentityClaims>;
}

/// Reads the payload segment of a JWT without verifying its signature.
///
/// Signature validation belongs to the identity provider integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtPayloadDecoder;

impl TokenDecoder for JwtPayloadDecoder {
    fn decode(&self, token: &str) -> Result<IdentityClaims> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| AppError::Identity("Token has no payload segment".to_string()))?;

        // Providers differ on padding
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AppError::Identity(format!("Token payload is not base64url: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Identity(format!("Token payload is not valid claims: {}", e)))
    }
}

/// Exclusive hold on sign-in state.
///
/// Login, logout and snapshots each run under one, so a snapshot can never
/// write an identity that a concurrent logout is removing.
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Service for the signed-in user
#[derive(Clone)]
pub struct IdentityService {
    repo: Repository,
    identities: IdentityRepository,
    clock: SharedClock,
    decoder: Arc<dyn TokenDecoder>,
    current: Arc<Mutex<Option<UserIdentity>>>,
    session: Arc<Mutex<()>>,
}

impl IdentityService {
    pub fn new(
        repo: Repository,
        identities: IdentityRepository,
        clock: SharedClock,
        decoder: Arc<dyn TokenDecoder>,
    ) -> Self {
        Self {
            repo,
            identities,
            clock,
            decoder,
            current: Arc::new(Mutex::new(None)),
            session: Arc::new(Mutex::new(())),
        }
    }

    pub async fn lock_session(&self) -> SessionGuard {
        SessionGuard {
            _guard: Arc::clone(&self.session).lock_owned().await,
        }
    }

    pub async fn current(&self) -> Option<UserIdentity> {
        self.current.lock().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Authenticate from an identity assertion
    pub async fn login_with_token(&self, token: &str) -> Result<UserIdentity> {
        let claims = self.decoder.decode(token)?;
        let _session = self.lock_session().await;

        let user = UserIdentity {
            id: claims.sub,
            email: claims.email,
            name: claims.name,
            picture: claims.picture,
            age: None,
            login_timestamp: self.clock.now(),
        };

        self.identities.save(&user).await?;
        *self.current.lock().await = Some(user.clone());

        tracing::info!("Login successful: {}", user.name);
        Ok(user)
    }

    /// Drop the in-memory identity and every stored copy of it
    pub async fn logout(&self) -> Result<()> {
        let _session = self.lock_session().await;
        *self.current.lock().await = None;

        let cleared = self.identities.clear().await;
        // A surviving snapshot would sign the user back in on next start
        self.repo.remove_item(BACKUP_KEY).await?;
        cleared?;

        tracing::info!("Logout successful");
        Ok(())
    }

    pub async fn update_age(&self, age: u32) -> Result<Option<UserIdentity>> {
        self.save_user_data(UserPatch {
            age: Some(age),
            ..Default::default()
        })
        .await
    }

    /// Merge `patch` into the signed-in user; anonymous sessions are a no-op
    pub async fn save_user_data(&self, patch: UserPatch) -> Result<Option<UserIdentity>> {
        let _session = self.lock_session().await;
        let mut current = self.current.lock().await;

        let Some(user) = current.as_ref() else {
            return Ok(None);
        };

        let mut updated = user.clone();
        if let Some(email) = patch.email {
            updated.email = email;
        }
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(picture) = patch.picture {
            updated.picture = Some(picture);
        }
        if let Some(age) = patch.age {
            updated.age = Some(age);
        }

        self.identities.save(&updated).await?;
        *current = Some(updated.clone());

        Ok(Some(updated))
    }

    /// Load the identity through the store fallback chain.
    ///
    /// A record found only in a later store is written back to all stores.
    pub async fn load_from_stores(&self) -> Option<IdentityHit> {
        let hit = self.identities.load().await?;

        if hit.from_fallback {
            tracing::info!("Identity recovered from {} store, re-syncing", hit.source);
            if let Err(e) = self.identities.save(&hit.user).await {
                tracing::warn!("Failed to re-sync recovered identity: {}", e);
            }
        }

        *self.current.lock().await = Some(hit.user.clone());
        Some(hit)
    }

    /// Take over an identity recovered from elsewhere
    pub async fn adopt(&self, user: UserIdentity) -> Result<()> {
        let _session = self.lock_session().await;
        self.identities.save(&user).await?;
        *self.current.lock().await = Some(user);
        Ok(())
    }

    /// Re-write the signed-in identity to every store.
    ///
    /// Reads the identity under the caller's session guard and returns it;
    /// `None` when nobody is signed in.
    pub async fn persist(&self, _session: &SessionGuard) -> Result<Option<UserIdentity>> {
        let Some(user) = self.current().await else {
            return Ok(None);
        };

        self.identities.save(&user).await?;
        Ok(Some(user))
    }
}
