//! Account Directory and the Subscription Lifecycle Handler
//!
//! The directory is the service's view of which customer is entitled to
//! which plan. [`DirectoryBillingHandler`] applies webhook events to it; the
//! idempotency guard upstream guarantees each event is applied at most once,
//! so the handler can use plain last-write transitions without compensating
//! for redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::billing::plans::{PlanCatalog, PlanTier};
use crate::webhook::events::{CheckoutSession, Invoice, Subscription, SubscriptionStatus};
use crate::webhook::processor::BillingHandler;

/// Billing state for one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Stripe customer ID (`cus_...`)
    pub customer_id: String,
    /// PostPilot user ID, when checkout carried one
    pub user_id: Option<String>,
    /// Current plan tier
    pub tier: PlanTier,
    /// Active subscription ID, if any
    pub subscription_id: Option<String>,
    /// Last known subscription status
    pub status: Option<SubscriptionStatus>,
    /// End of the paid period (entitlement lasts until here even after a
    /// scheduled cancellation)
    pub current_period_end: Option<DateTime<Utc>>,
    /// Last webhook-driven change
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    fn free(customer_id: &str) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            user_id: None,
            tier: PlanTier::Free,
            subscription_id: None,
            status: None,
            current_period_end: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether the account currently gets paid features.
    pub fn is_entitled(&self) -> bool {
        self.status.map(|s| s.is_entitled()).unwrap_or(false)
    }
}

/// In-process map of customer billing state.
#[derive(Debug, Default)]
pub struct AccountDirectory {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl AccountDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a customer's record.
    pub fn get(&self, customer_id: &str) -> Option<AccountRecord> {
        self.accounts.read().get(customer_id).cloned()
    }

    /// Number of known customers.
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// True when no customer has been seen.
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    fn update<F>(&self, customer_id: &str, apply: F)
    where
        F: FnOnce(&mut AccountRecord),
    {
        let mut accounts = self.accounts.write();
        let record = accounts
            .entry(customer_id.to_string())
            .or_insert_with(|| AccountRecord::free(customer_id));
        apply(record);
        record.updated_at = Utc::now();
    }
}

/// Applies webhook events to an [`AccountDirectory`].
pub struct DirectoryBillingHandler {
    directory: Arc<AccountDirectory>,
    catalog: PlanCatalog,
}

impl DirectoryBillingHandler {
    /// Create a handler over the given directory and price catalog.
    pub fn new(directory: Arc<AccountDirectory>, catalog: PlanCatalog) -> Self {
        Self { directory, catalog }
    }

    fn tier_for_subscription(&self, subscription: &Subscription) -> PlanTier {
        match subscription.price_id() {
            Some(price_id) => match self.catalog.tier_for_price(price_id) {
                Some(tier) => tier,
                None => {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        price_id,
                        "Price not in catalog, parking account on free tier"
                    );
                    PlanTier::Free
                }
            },
            None => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    "Subscription has no items, parking account on free tier"
                );
                PlanTier::Free
            }
        }
    }

    fn apply_subscription(&self, subscription: &Subscription) {
        let tier = self.tier_for_subscription(subscription);
        let period_end = Utc
            .timestamp_opt(subscription.current_period_end, 0)
            .single();

        self.directory.update(&subscription.customer, |record| {
            record.tier = tier;
            record.subscription_id = Some(subscription.id.clone());
            record.status = Some(subscription.status);
            record.current_period_end = period_end;
        });

        tracing::info!(
            customer_id = %subscription.customer,
            subscription_id = %subscription.id,
            tier = %tier,
            status = ?subscription.status,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Subscription applied to directory"
        );
    }
}

#[async_trait::async_trait]
impl BillingHandler for DirectoryBillingHandler {
    async fn on_checkout_completed(&self, session: &CheckoutSession) -> anyhow::Result<()> {
        // The subscription.created event carries the authoritative plan; the
        // checkout event links the Stripe customer to the PostPilot user.
        let Some(customer_id) = session.customer.as_deref() else {
            anyhow::bail!("checkout session {} has no customer", session.id);
        };

        let user_id = session.client_reference_id.clone();
        let subscription_id = session.subscription.clone();
        self.directory.update(customer_id, |record| {
            if user_id.is_some() {
                record.user_id = user_id.clone();
            }
            if record.subscription_id.is_none() {
                record.subscription_id = subscription_id.clone();
            }
        });

        tracing::info!(
            customer_id,
            session_id = %session.id,
            user_id = ?session.client_reference_id,
            "Checkout completed"
        );
        Ok(())
    }

    async fn on_subscription_created(&self, subscription: &Subscription) -> anyhow::Result<()> {
        self.apply_subscription(subscription);
        Ok(())
    }

    async fn on_subscription_updated(&self, subscription: &Subscription) -> anyhow::Result<()> {
        self.apply_subscription(subscription);
        Ok(())
    }

    async fn on_subscription_deleted(&self, subscription: &Subscription) -> anyhow::Result<()> {
        self.directory.update(&subscription.customer, |record| {
            record.tier = PlanTier::Free;
            record.subscription_id = None;
            record.status = Some(SubscriptionStatus::Canceled);
            record.current_period_end = None;
        });

        tracing::info!(
            customer_id = %subscription.customer,
            subscription_id = %subscription.id,
            "Subscription deleted, account downgraded to free"
        );
        Ok(())
    }

    async fn on_payment_succeeded(&self, invoice: &Invoice) -> anyhow::Result<()> {
        tracing::info!(
            customer_id = %invoice.customer,
            invoice_id = %invoice.id,
            amount_paid = invoice.amount_paid,
            currency = %invoice.currency,
            "Payment succeeded"
        );
        Ok(())
    }

    async fn on_payment_failed(&self, invoice: &Invoice) -> anyhow::Result<()> {
        // Stripe follows up with a subscription.updated carrying past_due;
        // the directory transition happens there. This is the alerting hook.
        tracing::warn!(
            customer_id = %invoice.customer,
            invoice_id = %invoice.id,
            amount_due = invoice.amount_due,
            currency = %invoice.currency,
            "Payment failed"
        );
        Ok(())
    }
}
