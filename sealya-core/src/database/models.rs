//! Persisted models
//!
//! Records stored as JSON values in the key-value substrate. Field names
//! are camelCase so stored records stay readable by the web client.

use crate::catalog::Tier;
use crate::crypto::EncryptedData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;

/// Emoji seal attached to a letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Seal {
    #[serde(rename = "\u{2764}\u{fe0f}")]
    Heart,
    #[serde(rename = "\u{2728}")]
    Sparkles,
    #[serde(rename = "\u{1f338}")]
    Blossom,
    #[serde(rename = "\u{1f300}")]
    Cyclone,
    #[serde(rename = "\u{1fae7}")]
    Bubbles,
}

impl Seal {
    pub const ALL: [Seal; 5] = [
        Seal::Heart,
        Seal::Sparkles,
        Seal::Blossom,
        Seal::Cyclone,
        Seal::Bubbles,
    ];

    pub fn emoji(self) -> &'static str {
        match self {
            Seal::Heart => "\u{2764}\u{fe0f}",
            Seal::Sparkles => "\u{2728}",
            Seal::Blossom => "\u{1f338}",
            Seal::Cyclone => "\u{1f300}",
            Seal::Bubbles => "\u{1fae7}",
        }
    }

    /// Look up a seal by its emoji
    pub fn from_emoji(emoji: &str) -> Option<Seal> {
        Self::ALL.into_iter().find(|seal| seal.emoji() == emoji)
    }
}

impl fmt::Display for Seal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.emoji())
    }
}

/// A sealed letter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Letter {
    pub id: String,
    pub title: String,
    pub label: String,
    pub content: String,
    pub emoji: Seal,
    pub timestamp: DateTime<Utc>,
    pub is_sealed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub can_undo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_expires_at: Option<DateTime<Utc>>,
    /// Encrypted content of a password-protected letter; `content` is empty while set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_content: Option<EncryptedData>,
}

impl Letter {
    /// Scheduled letters stay locked until their unlock time passes
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.scheduled_for, Some(unlock_at) if now < unlock_at)
    }

    /// Whether undo is still permitted at `now`
    pub fn undo_available(&self, now: DateTime<Utc>) -> bool {
        self.can_undo && matches!(self.undo_expires_at, Some(deadline) if now < deadline)
    }

    pub fn is_protected(&self) -> bool {
        self.protected_content.is_some()
    }
}

/// Fields supplied by the writer when sealing a new letter
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterDraft {
    pub title: String,
    pub label: String,
    pub content: String,
    pub emoji: Seal,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

/// The user's single subscription record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub expires_at: DateTime<Utc>,
    pub features: Vec<String>,
}

impl Subscription {
    /// Active and not yet past its expiry
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && now < self.expires_at
    }
}

/// Monthly usage counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// `YYYY-MM` in the user's local time
    pub month: String,
    pub letters_this_month: u32,
    pub scheduled_letters: u32,
}

impl UsageStats {
    pub fn empty(month: String) -> Self {
        Self {
            month,
            letters_this_month: 0,
            scheduled_letters: 0,
        }
    }
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub login_timestamp: DateTime<Utc>,
}

/// Partial profile update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub age: Option<u32>,
}

/// Combined recovery record
///
/// Letters and subscription are kept as the raw stored strings so a
/// snapshot never depends on those records parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub user: Option<UserIdentity>,
    #[serde(default)]
    pub letters: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 over the payload fields; absent on older snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Audit trail row written on every subscription change
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionAuditEntry {
    pub id: String,
    pub previous_tier: Option<String>,
    pub tier: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
