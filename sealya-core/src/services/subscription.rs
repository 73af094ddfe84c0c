//! Subscription service
//!
//! Owns the active subscription, the monthly usage counters and the
//! feature gates derived from the current tier.

use crate::catalog::{
    find_custom_seal, find_theme, Limit, Tier, FEATURE_BULK_EXPORT, FEATURE_MEDIA_ATTACHMENTS,
    FEATURE_PASSWORD_PROTECTION,
};
use crate::clock::SharedClock;
use crate::config::{
    BASIC_THEMES, FREE_PERIOD_DAYS, SUBSCRIPTION_KEY, SUBSCRIPTION_PERIOD_DAYS, USAGE_STATS_KEY,
};
use crate::database::{
    Repository, Subscription, SubscriptionAuditEntry, SubscriptionStatus, UsageStats,
};
use crate::error::{AppError, Result};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Usage counters paired with the active tier's limits
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub letters_this_month: u32,
    pub scheduled_letters: u32,
    pub max_letters: Limit,
    pub max_scheduled: Limit,
}

/// Which monthly allowance stopped a letter from being sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Letters,
    Scheduled,
}

/// Outcome of claiming an allowance slot for a new letter
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// Counters already include the new letter
    Granted { usage: UsageStats },
    LimitReached(LimitKind),
}

/// Result of an upgrade request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum UpgradeOutcome {
    Upgraded { subscription: Subscription },
    Rejected { message: String },
}

/// Service for subscription state and usage limits
#[derive(Clone)]
pub struct SubscriptionService {
    repo: Repository,
    clock: SharedClock,
    subscription: Arc<Mutex<Subscription>>,
    usage: Arc<Mutex<UsageStats>>,
}

impl SubscriptionService {
    /// Load the stored subscription, defaulting to the free tier
    pub async fn load(repo: Repository, clock: SharedClock) -> Result<Self> {
        let subscription = match repo.get_json::<Subscription>(SUBSCRIPTION_KEY).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => default_subscription(&clock),
            Err(AppError::Serialization(e)) => {
                tracing::warn!("Stored subscription is unreadable, using free tier: {}", e);
                default_subscription(&clock)
            }
            Err(e) => return Err(e),
        };

        let usage = match repo.get_json::<UsageStats>(USAGE_STATS_KEY).await {
            Ok(Some(usage)) => usage,
            Ok(None) => UsageStats::empty(month_key(&clock)),
            Err(AppError::Serialization(e)) => {
                tracing::warn!("Stored usage stats are unreadable, resetting: {}", e);
                UsageStats::empty(month_key(&clock))
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Subscription loaded: {} ({:?}, expires {})",
            subscription.tier,
            subscription.status,
            subscription.expires_at
        );

        Ok(Self {
            repo,
            clock,
            subscription: Arc::new(Mutex::new(subscription)),
            usage: Arc::new(Mutex::new(usage)),
        })
    }

    /// Re-read subscription and usage after the stored records were replaced
    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::load(self.repo.clone(), Arc::clone(&self.clock)).await?;
        let subscription = fresh.subscription.lock().await.clone();
        let usage = fresh.usage.lock().await.clone();
        *self.subscription.lock().await = subscription;
        *self.usage.lock().await = usage;
        Ok(())
    }

    pub async fn subscription(&self) -> Subscription {
        self.subscription.lock().await.clone()
    }

    /// Tier whose limits apply now; lapsed subscriptions fall back to free
    pub async fn current_tier(&self) -> Tier {
        let now = self.clock.now();
        let subscription = self.subscription.lock().await;

        if subscription.is_current(now) {
            subscription.tier
        } else {
            Tier::Free
        }
    }

    /// Entitlement listed on the subscription record itself
    pub async fn has_feature(&self, feature: &str) -> bool {
        let now = self.clock.now();
        let subscription = self.subscription.lock().await;
        subscription.is_current(now) && subscription.features.iter().any(|f| f == feature)
    }

    async fn tier_includes(&self, feature: &str) -> bool {
        self.current_tier().await.plan().features.contains(&feature)
    }

    pub async fn can_attach_media(&self) -> bool {
        self.tier_includes(FEATURE_MEDIA_ATTACHMENTS).await
    }

    pub async fn can_password_protect(&self) -> bool {
        self.tier_includes(FEATURE_PASSWORD_PROTECTION).await
    }

    pub async fn can_bulk_export(&self) -> bool {
        self.tier_includes(FEATURE_BULK_EXPORT).await
    }

    pub async fn can_remove_branding(&self) -> bool {
        self.current_tier().await >= Tier::Plus
    }

    /// Basic themes are open to everyone; catalog themes need a paid tier
    pub async fn can_use_theme(&self, theme_id: &str) -> bool {
        if BASIC_THEMES.contains(&theme_id) {
            return true;
        }
        find_theme(theme_id).is_some() && self.current_tier().await != Tier::Free
    }

    /// Catalog seals need a paid tier; unknown ids are never usable
    pub async fn can_use_custom_seal(&self, seal_id: &str) -> bool {
        find_custom_seal(seal_id).is_some() && self.current_tier().await != Tier::Free
    }

    /// Counters for the current month; a record from an earlier month reads as zero
    fn month_usage(&self, stored: &UsageStats) -> UsageStats {
        let month = month_key(&self.clock);
        if stored.month == month {
            stored.clone()
        } else {
            UsageStats::empty(month)
        }
    }

    pub async fn usage_stats(&self) -> UsageSummary {
        let stats = self.month_usage(&*self.usage.lock().await);
        let limits = self.current_tier().await.plan().limits;

        UsageSummary {
            letters_this_month: stats.letters_this_month,
            scheduled_letters: stats.scheduled_letters,
            max_letters: limits.letters_per_month,
            max_scheduled: limits.scheduled_letters,
        }
    }

    pub async fn can_create_letter(&self) -> bool {
        let usage = self.usage_stats().await;
        usage.max_letters.allows(usage.letters_this_month)
    }

    pub async fn can_schedule_letter(&self) -> bool {
        let usage = self.usage_stats().await;
        usage.max_scheduled.allows(usage.scheduled_letters)
    }

    /// Check the allowances and count a new letter in one step.
    ///
    /// The usage lock is held across check and write, so concurrent
    /// callers can never claim more slots than the tier allows.
    pub async fn try_reserve_letter(&self, scheduled: bool) -> Result<Reservation> {
        let limits = self.current_tier().await.plan().limits;
        let mut usage = self.usage.lock().await;
        let mut next = self.month_usage(&usage);

        if !limits.letters_per_month.allows(next.letters_this_month) {
            return Ok(Reservation::LimitReached(LimitKind::Letters));
        }
        if scheduled && !limits.scheduled_letters.allows(next.scheduled_letters) {
            return Ok(Reservation::LimitReached(LimitKind::Scheduled));
        }

        next.letters_this_month = next.letters_this_month.saturating_add(1);
        if scheduled {
            next.scheduled_letters = next.scheduled_letters.saturating_add(1);
        }

        self.repo.set_json(USAGE_STATS_KEY, &next).await?;
        *usage = next.clone();

        Ok(Reservation::Granted { usage: next })
    }

    /// Give back a slot claimed by `try_reserve_letter`
    pub async fn release_letter(&self, scheduled: bool) -> Result<UsageStats> {
        self.update_usage(|stats| {
            stats.letters_this_month = stats.letters_this_month.saturating_sub(1);
            if scheduled {
                stats.scheduled_letters = stats.scheduled_letters.saturating_sub(1);
            }
        })
        .await
    }

    pub async fn record_letter_created(&self) -> Result<UsageStats> {
        self.update_usage(|stats| {
            stats.letters_this_month = stats.letters_this_month.saturating_add(1);
        })
        .await
    }

    pub async fn record_letter_scheduled(&self) -> Result<UsageStats> {
        self.update_usage(|stats| {
            stats.scheduled_letters = stats.scheduled_letters.saturating_add(1);
        })
        .await
    }

    /// Apply `change` to this month's counters; memory changes only once stored
    async fn update_usage<F>(&self, change: F) -> Result<UsageStats>
    where
        F: FnOnce(&mut UsageStats),
    {
        let mut usage = self.usage.lock().await;
        let mut next = self.month_usage(&usage);
        change(&mut next);

        self.repo.set_json(USAGE_STATS_KEY, &next).await?;
        *usage = next.clone();
        Ok(next)
    }

    /// Switch to `tier_id` for a fresh 30-day period.
    ///
    /// Upgrading to the tier already held restarts the period from now.
    pub async fn upgrade(&self, tier_id: &str) -> Result<UpgradeOutcome> {
        let tier = match tier_id.parse::<Tier>() {
            Ok(tier) => tier,
            Err(_) => {
                tracing::warn!("Rejected upgrade to unknown tier {:?}", tier_id);
                return Ok(UpgradeOutcome::Rejected {
                    message: format!("invalid tier: {}", tier_id),
                });
            }
        };

        let upgraded = Subscription {
            tier,
            status: SubscriptionStatus::Active,
            expires_at: self.clock.now() + Duration::days(SUBSCRIPTION_PERIOD_DAYS),
            features: tier.plan().features.iter().map(|f| f.to_string()).collect(),
        };

        let mut subscription = self.subscription.lock().await;
        let previous = subscription.tier;

        self.repo
            .replace_subscription(
                SUBSCRIPTION_KEY,
                &serde_json::to_string(&upgraded)?,
                Some(previous.as_str()),
                tier.as_str(),
                upgraded.expires_at,
            )
            .await?;
        *subscription = upgraded.clone();

        tracing::info!("Subscription changed {} -> {}", previous, tier);
        Ok(UpgradeOutcome::Upgraded {
            subscription: upgraded,
        })
    }

    /// Mark the subscription cancelled; gated features stop immediately
    pub async fn cancel(&self) -> Result<Subscription> {
        let mut subscription = self.subscription.lock().await;

        let mut cancelled = subscription.clone();
        cancelled.status = SubscriptionStatus::Cancelled;

        self.repo
            .replace_subscription(
                SUBSCRIPTION_KEY,
                &serde_json::to_string(&cancelled)?,
                Some(cancelled.tier.as_str()),
                Tier::Free.as_str(),
                cancelled.expires_at,
            )
            .await?;
        *subscription = cancelled.clone();

        tracing::info!("Subscription {} cancelled", cancelled.tier);
        Ok(cancelled)
    }

    pub async fn history(&self) -> Result<Vec<SubscriptionAuditEntry>> {
        self.repo.list_subscription_history().await
    }
}

/// `YYYY-MM` of the clock's local date
fn month_key(clock: &SharedClock) -> String {
    clock.local_now().format("%Y-%m").to_string()
}

fn default_subscription(clock: &SharedClock) -> Subscription {
    Subscription {
        tier: Tier::Free,
        status: SubscriptionStatus::Active,
        expires_at: clock.now() + Duration::days(FREE_PERIOD_DAYS),
        features: Tier::Free
            .plan()
            .features
            .iter()
            .map(|f| f.to_string())
            .collect(),
    }
}
