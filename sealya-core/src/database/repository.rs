//! Repository layer for database operations
//!
//! Wraps the key-value substrate, the identity mirror table and the
//! subscription audit trail behind one cloneable handle.

use super::models::*;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Key-value substrate =====

    /// Raw value stored under `key`
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Insert or replace the value under `key`
    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    pub async fn remove_item(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Removed {}", key);
        Ok(())
    }

    /// Decode the JSON value under `key`.
    ///
    /// A stored value that fails to parse is returned as
    /// `AppError::Serialization` so callers can choose their fallback.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_item(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_item(key, &raw).await
    }

    // ===== Identity mirror =====

    pub async fn get_mirror_record(&self, id: &str) -> Result<Option<String>> {
        let record =
            sqlx::query_scalar::<_, String>("SELECT record FROM identity_mirror WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    pub async fn put_mirror_record(&self, id: &str, record: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identity_mirror (id, record, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(record)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Mirrored identity record {}", id);
        Ok(())
    }

    pub async fn delete_mirror_record(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM identity_mirror WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ===== Subscription audit =====

    /// Replace the subscription record and append the change to the audit
    /// trail in one transaction
    pub async fn replace_subscription(
        &self,
        key: &str,
        record: &str,
        previous_tier: Option<&str>,
        tier: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionAuditEntry> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(record)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let entry = sqlx::query_as::<_, SubscriptionAuditEntry>(
            r#"
            INSERT INTO subscription_audit (id, previous_tier, tier, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(previous_tier)
        .bind(tier)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            "Recorded subscription change {} -> {}",
            previous_tier.unwrap_or("none"),
            tier
        );
        Ok(entry)
    }

    /// Audit trail, newest first
    pub async fn list_subscription_history(&self) -> Result<Vec<SubscriptionAuditEntry>> {
        let entries = sqlx::query_as::<_, SubscriptionAuditEntry>(
            r#"
            SELECT * FROM subscription_audit
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
