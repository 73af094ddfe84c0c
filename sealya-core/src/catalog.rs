//! Product catalog
//!
//! Subscription tiers with their limits and entitled features, plus the
//! premium themes and custom seals offered to paid tiers.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Subscription level, ordered free < plus < pro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Plus,
    Pro,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Plus => "plus",
            Tier::Pro => "pro",
        }
    }

    /// Catalog entry for this tier
    pub fn plan(self) -> &'static TierPlan {
        match self {
            Tier::Free => &TIERS[0],
            Tier::Plus => &TIERS[1],
            Tier::Pro => &TIERS[2],
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "plus" => Ok(Tier::Plus),
            "pro" => Ok(Tier::Pro),
            other => Err(format!("invalid tier: {}", other)),
        }
    }
}

/// A numeric quota or no quota at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Count(u32),
    Unlimited,
}

impl Limit {
    /// Whether `used` still leaves room for one more
    pub fn allows(self, used: u32) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Count(max) => used < max,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Count(n) => serializer.serialize_u32(*n),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub letters_per_month: Limit,
    pub scheduled_letters: Limit,
    pub themes: Limit,
    pub custom_seals: Limit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPlan {
    pub tier: Tier,
    pub name: &'static str,
    /// Monthly price in USD cents
    pub price_cents: u32,
    pub features: &'static [&'static str],
    pub limits: TierLimits,
    pub popular: bool,
}

pub const FEATURE_PDF_EXPORT: &str = "PDF export";
pub const FEATURE_REMOVE_BRANDING: &str = "Remove branding";
pub const FEATURE_MEDIA_ATTACHMENTS: &str = "Attach images, videos, or audio";
pub const FEATURE_PASSWORD_PROTECTION: &str = "Password-protected letters";
pub const FEATURE_BULK_EXPORT: &str = "Bulk export";
pub const FEATURE_ANALYTICS: &str = "Advanced analytics";

pub static TIERS: [TierPlan; 3] = [
    TierPlan {
        tier: Tier::Free,
        name: "Basic (Free)",
        price_cents: 0,
        features: &[
            "20 letters per month",
            "2 scheduled letters",
            "Standard letter themes",
            "Basic fonts only",
            FEATURE_PDF_EXPORT,
        ],
        limits: TierLimits {
            letters_per_month: Limit::Count(20),
            scheduled_letters: Limit::Count(2),
            themes: Limit::Count(3),
            custom_seals: Limit::Count(0),
        },
        popular: false,
    },
    TierPlan {
        tier: Tier::Plus,
        name: "Plus",
        price_cents: 249,
        features: &[
            "200 letters per month",
            "20 scheduled letters",
            "10+ premium themes & fonts",
            "Early access to new features",
            FEATURE_REMOVE_BRANDING,
            "Priority support",
        ],
        limits: TierLimits {
            letters_per_month: Limit::Count(200),
            scheduled_letters: Limit::Count(20),
            themes: Limit::Count(15),
            custom_seals: Limit::Count(5),
        },
        popular: true,
    },
    TierPlan {
        tier: Tier::Pro,
        name: "Pro",
        price_cents: 599,
        features: &[
            "Unlimited letters & scheduling",
            "All premium themes, fonts & seals",
            FEATURE_MEDIA_ATTACHMENTS,
            FEATURE_PASSWORD_PROTECTION,
            "Priority support & customization",
            FEATURE_ANALYTICS,
            FEATURE_BULK_EXPORT,
            "Early access to features",
        ],
        limits: TierLimits {
            letters_per_month: Limit::Unlimited,
            scheduled_letters: Limit::Unlimited,
            themes: Limit::Unlimited,
            custom_seals: Limit::Unlimited,
        },
        popular: false,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeCategory {
    Elegant,
    Vintage,
    Modern,
    Artistic,
}

#[derive(Debug, Clone, Serialize)]
pub struct PremiumTheme {
    pub id: &'static str,
    pub name: &'static str,
    pub preview: &'static str,
    pub category: ThemeCategory,
    pub price_cents: u32,
}

pub static PREMIUM_THEMES: [PremiumTheme; 6] = [
    PremiumTheme {
        id: "vintage-romance",
        name: "Vintage Romance",
        preview: "\u{1f339}",
        category: ThemeCategory::Vintage,
        price_cents: 199,
    },
    PremiumTheme {
        id: "corporate-minimal",
        name: "Corporate Minimal",
        preview: "\u{1f4bc}",
        category: ThemeCategory::Modern,
        price_cents: 199,
    },
    PremiumTheme {
        id: "diwali-festive",
        name: "Diwali Festive",
        preview: "\u{1fa94}",
        category: ThemeCategory::Artistic,
        price_cents: 299,
    },
    PremiumTheme {
        id: "new-year-gold",
        name: "New Year Gold",
        preview: "\u{2728}",
        category: ThemeCategory::Elegant,
        price_cents: 299,
    },
    PremiumTheme {
        id: "holiday-winter",
        name: "Holiday Winter",
        preview: "\u{2744}\u{fe0f}",
        category: ThemeCategory::Artistic,
        price_cents: 249,
    },
    PremiumTheme {
        id: "minimalist-zen",
        name: "Minimalist Zen",
        preview: "\u{1f9d8}",
        category: ThemeCategory::Modern,
        price_cents: 199,
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct CustomSeal {
    pub id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub price_cents: u32,
}

pub static CUSTOM_SEALS: [CustomSeal; 8] = [
    CustomSeal {
        id: "golden-lotus",
        name: "Golden Lotus",
        emoji: "\u{1fab7}",
        price_cents: 99,
    },
    CustomSeal {
        id: "silver-moon",
        name: "Silver Moon",
        emoji: "\u{1f319}",
        price_cents: 99,
    },
    CustomSeal {
        id: "ruby-heart",
        name: "Ruby Heart",
        emoji: "\u{1f48e}",
        price_cents: 199,
    },
    CustomSeal {
        id: "emerald-leaf",
        name: "Emerald Leaf",
        emoji: "\u{1f343}",
        price_cents: 99,
    },
    CustomSeal {
        id: "sapphire-star",
        name: "Sapphire Star",
        emoji: "\u{2b50}",
        price_cents: 149,
    },
    CustomSeal {
        id: "rose-gold-crown",
        name: "Rose Gold Crown",
        emoji: "\u{1f451}",
        price_cents: 299,
    },
    CustomSeal {
        id: "peacock-feather",
        name: "Peacock Feather",
        emoji: "\u{1fab6}",
        price_cents: 199,
    },
    CustomSeal {
        id: "crystal-butterfly",
        name: "Crystal Butterfly",
        emoji: "\u{1f98b}",
        price_cents: 249,
    },
];

pub fn find_theme(id: &str) -> Option<&'static PremiumTheme> {
    PREMIUM_THEMES.iter().find(|theme| theme.id == id)
}

pub fn find_custom_seal(id: &str) -> Option<&'static CustomSeal> {
    CUSTOM_SEALS.iter().find(|seal| seal.id == id)
}
