//! Plan Tiers and the Price Catalog
//!
//! Maps Stripe price IDs to PostPilot plan tiers. The catalog is built at
//! startup from configuration; an unknown price ID maps to no tier and the
//! lifecycle handler parks the account on Free with a warning rather than
//! guessing an entitlement.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

/// PostPilot plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// No active subscription
    Free,
    /// Entry paid tier
    Starter,
    /// Full-feature tier
    Pro,
}

impl PlanTier {
    /// Monthly AI post-generation quota for the tier.
    pub fn monthly_post_quota(&self) -> u32 {
        match self {
            Self::Free => 5,
            Self::Starter => 60,
            Self::Pro => 500,
        }
    }

    /// Whether the content calendar and competitor tracking are unlocked.
    pub fn has_growth_tools(&self) -> bool {
        matches!(self, Self::Pro)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
        };
        f.write_str(name)
    }
}

/// Environment variable listing Starter price IDs (comma-separated).
pub const ENV_STARTER_PRICES: &str = "STRIPE_STARTER_PRICE_IDS";
/// Environment variable listing Pro price IDs (comma-separated).
pub const ENV_PRO_PRICES: &str = "STRIPE_PRO_PRICE_IDS";

/// Lookup from Stripe price ID to plan tier.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    tiers_by_price: HashMap<String, PlanTier>,
}

impl PlanCatalog {
    /// Build a catalog from explicit price lists.
    pub fn new<I, J>(starter_prices: I, pro_prices: J) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        let mut tiers_by_price = HashMap::new();
        for price in starter_prices {
            tiers_by_price.insert(price.into(), PlanTier::Starter);
        }
        for price in pro_prices {
            tiers_by_price.insert(price.into(), PlanTier::Pro);
        }
        Self { tiers_by_price }
    }

    /// Build a catalog from `STRIPE_STARTER_PRICE_IDS` / `STRIPE_PRO_PRICE_IDS`.
    /// Missing variables yield an empty list for that tier.
    pub fn from_env() -> Self {
        Self::new(
            read_price_list(ENV_STARTER_PRICES),
            read_price_list(ENV_PRO_PRICES),
        )
    }

    /// Catalog with well-known test price IDs.
    pub fn test_catalog() -> Self {
        Self::new(["price_starter_monthly"], ["price_pro_monthly"])
    }

    /// Tier for a price ID, or `None` for prices not in the catalog.
    pub fn tier_for_price(&self, price_id: &str) -> Option<PlanTier> {
        self.tiers_by_price.get(price_id).copied()
    }

    /// Number of configured prices.
    pub fn len(&self) -> usize {
        self.tiers_by_price.len()
    }

    /// True when no prices are configured.
    pub fn is_empty(&self) -> bool {
        self.tiers_by_price.is_empty()
    }
}

fn read_price_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let catalog = PlanCatalog::test_catalog();
        assert_eq!(
            catalog.tier_for_price("price_starter_monthly"),
            Some(PlanTier::Starter)
        );
        assert_eq!(
            catalog.tier_for_price("price_pro_monthly"),
            Some(PlanTier::Pro)
        );
        assert_eq!(catalog.tier_for_price("price_unknown"), None);
    }

    #[test]
    fn test_tier_quotas_increase() {
        assert!(PlanTier::Free.monthly_post_quota() < PlanTier::Starter.monthly_post_quota());
        assert!(PlanTier::Starter.monthly_post_quota() < PlanTier::Pro.monthly_post_quota());
        assert!(PlanTier::Pro.has_growth_tools());
        assert!(!PlanTier::Starter.has_growth_tools());
    }

    #[test]
    fn test_multiple_prices_per_tier() {
        let catalog = PlanCatalog::new(
            ["price_starter_monthly", "price_starter_yearly"],
            ["price_pro_monthly"],
        );
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.tier_for_price("price_starter_yearly"),
            Some(PlanTier::Starter)
        );
    }
}
