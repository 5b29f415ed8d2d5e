//! Stripe Event Types
//!
//! Typed views over the Stripe webhook envelope for the event families the
//! billing pipeline consumes: Checkout completions (how PostPilot sells
//! plans), subscription lifecycle changes, and invoice payment outcomes.
//! Everything else parses losslessly into [`EventKind::Unknown`] and is
//! acknowledged without side effects.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WebhookError;

/// Stripe event families the billing pipeline acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `checkout.session.completed` - a customer bought a plan
    #[serde(rename = "checkout.session.completed")]
    CheckoutCompleted,

    /// `customer.subscription.created`
    #[serde(rename = "customer.subscription.created")]
    SubscriptionCreated,
    /// `customer.subscription.updated`
    #[serde(rename = "customer.subscription.updated")]
    SubscriptionUpdated,
    /// `customer.subscription.deleted`
    #[serde(rename = "customer.subscription.deleted")]
    SubscriptionDeleted,

    /// `invoice.payment_succeeded`
    #[serde(rename = "invoice.payment_succeeded")]
    PaymentSucceeded,
    /// `invoice.payment_failed`
    #[serde(rename = "invoice.payment_failed")]
    PaymentFailed,

    /// Any event type the pipeline does not act on
    #[serde(other)]
    Unknown,
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::PaymentSucceeded,
            "invoice.payment_failed" => Self::PaymentFailed,
            _ => Self::Unknown,
        })
    }
}

impl EventKind {
    /// String form as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "checkout.session.completed",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::PaymentSucceeded => "invoice.payment_succeeded",
            Self::PaymentFailed => "invoice.payment_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the pipeline has a handler for this kind.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Raw Stripe event envelope as delivered to the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    /// Globally unique event identifier (`evt_...`); the idempotency key
    pub id: String,

    /// Event type string
    #[serde(rename = "type")]
    pub event_type: String,

    /// Creation time (Unix timestamp)
    pub created: i64,

    /// Whether this is a live-mode event
    pub livemode: bool,

    /// Remaining delivery attempts Stripe will make
    #[serde(default)]
    pub pending_webhooks: u32,

    /// Event payload
    pub data: EventData,
}

/// Payload container inside the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The event's object (checkout session, subscription, invoice, ...)
    pub object: serde_json::Value,

    /// Previous values of changed fields (only on `*.updated` events)
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Parse an envelope from the raw (signature-verified) body bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WebhookError> {
        let event: Self = serde_json::from_slice(bytes)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        if event.id.is_empty() {
            return Err(WebhookError::InvalidPayload(
                "event id must not be empty".to_string(),
            ));
        }
        Ok(event)
    }

    /// The typed event kind.
    pub fn kind(&self) -> EventKind {
        // FromStr is infallible, Unknown catches the rest
        EventKind::from_str(&self.event_type).unwrap()
    }

    /// Project the payload as a completed Checkout session.
    pub fn as_checkout(&self) -> Result<CheckoutSession, WebhookError> {
        self.project(EventKind::CheckoutCompleted == self.kind(), "checkout")
    }

    /// Project the payload as a subscription object.
    pub fn as_subscription(&self) -> Result<Subscription, WebhookError> {
        let ok = matches!(
            self.kind(),
            EventKind::SubscriptionCreated
                | EventKind::SubscriptionUpdated
                | EventKind::SubscriptionDeleted
        );
        self.project(ok, "subscription")
    }

    /// Project the payload as an invoice object.
    pub fn as_invoice(&self) -> Result<Invoice, WebhookError> {
        let ok = matches!(
            self.kind(),
            EventKind::PaymentSucceeded | EventKind::PaymentFailed
        );
        self.project(ok, "invoice")
    }

    fn project<T: serde::de::DeserializeOwned>(
        &self,
        kind_matches: bool,
        family: &str,
    ) -> Result<T, WebhookError> {
        if !kind_matches {
            return Err(WebhookError::InvalidPayload(format!(
                "event {} is not a {family} event",
                self.event_type
            )));
        }
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }
}

/// Completed Checkout session (the purchase moment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session ID (`cs_...`)
    pub id: String,
    /// Customer ID (`cus_...`), absent for guest checkouts
    pub customer: Option<String>,
    /// Subscription created by this session, if any
    pub subscription: Option<String>,
    /// PostPilot user ID passed through at session creation
    pub client_reference_id: Option<String>,
    /// Customer email captured at checkout
    pub customer_email: Option<String>,
    /// Session metadata (carries the purchased price ID for one-step lookup)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Subscription object, trimmed to the fields the lifecycle guard consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID (`sub_...`)
    pub id: String,
    /// Owning customer ID
    pub customer: String,
    /// Current status
    pub status: SubscriptionStatus,
    /// End of the current billing period (Unix timestamp)
    pub current_period_end: i64,
    /// Whether the customer has scheduled a cancellation
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Items on the subscription (the plan's price lives here)
    pub items: SubscriptionItems,
}

impl Subscription {
    /// The price ID of the first subscription item, which is the plan.
    /// PostPilot subscriptions carry exactly one item.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current
    Active,
    /// Latest invoice failed; Stripe is retrying collection
    PastDue,
    /// Collection retries exhausted
    Unpaid,
    /// Ended, by the customer or by dunning
    Canceled,
    /// First payment not yet confirmed
    Incomplete,
    /// First payment window expired
    IncompleteExpired,
    /// In a trial period
    Trialing,
    /// Collection paused
    Paused,
    /// A status this build does not know
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Whether the subscription entitles the customer to paid features.
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Whether the customer should be nudged about payment.
    pub fn needs_payment_attention(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid | Self::Incomplete)
    }
}

/// Subscription items container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItems {
    /// Items on the subscription
    pub data: Vec<SubscriptionItem>,
}

/// One subscription item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItem {
    /// Item ID (`si_...`)
    pub id: String,
    /// The purchased price
    pub price: PriceRef,
}

/// Price reference on a subscription item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRef {
    /// Price ID (`price_...`), mapped to a plan tier by the catalog
    pub id: String,
    /// Unit amount in the currency's minor unit
    pub unit_amount: Option<i64>,
    /// ISO currency code
    pub currency: String,
}

/// Invoice, trimmed to payment-outcome fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID (`in_...`)
    pub id: String,
    /// Owning customer ID
    pub customer: String,
    /// Subscription the invoice bills, if any
    pub subscription: Option<String>,
    /// Amount paid in the currency's minor unit
    pub amount_paid: i64,
    /// Amount still owed
    pub amount_due: i64,
    /// ISO currency code
    pub currency: String,
    /// Why the invoice was created (`subscription_cycle`, ...)
    pub billing_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subscription_event_json(event_type: &str) -> String {
        format!(
            r#"{{
                "id": "evt_sub_1",
                "type": "{event_type}",
                "created": 1700000000,
                "livemode": false,
                "pending_webhooks": 1,
                "data": {{
                    "object": {{
                        "id": "sub_1",
                        "customer": "cus_1",
                        "status": "active",
                        "current_period_end": 1702592000,
                        "cancel_at_period_end": false,
                        "items": {{
                            "data": [{{
                                "id": "si_1",
                                "price": {{
                                    "id": "price_pro_monthly",
                                    "unit_amount": 2900,
                                    "currency": "usd"
                                }}
                            }}]
                        }}
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(
            EventKind::from_str("checkout.session.completed").unwrap(),
            EventKind::CheckoutCompleted
        );
        assert_eq!(
            EventKind::from_str("invoice.payment_failed").unwrap(),
            EventKind::PaymentFailed
        );
        assert_eq!(
            EventKind::from_str("charge.refunded").unwrap(),
            EventKind::Unknown
        );
        assert!(!EventKind::Unknown.is_handled());
    }

    #[test]
    fn test_parse_subscription_event() {
        let event =
            StripeEvent::from_bytes(subscription_event_json("customer.subscription.created").as_bytes())
                .unwrap();
        assert_eq!(event.id, "evt_sub_1");
        assert_eq!(event.kind(), EventKind::SubscriptionCreated);

        let sub = event.as_subscription().unwrap();
        assert_eq!(sub.customer, "cus_1");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.price_id(), Some("price_pro_monthly"));
    }

    #[test]
    fn test_wrong_family_projection_rejected() {
        let event =
            StripeEvent::from_bytes(subscription_event_json("customer.subscription.updated").as_bytes())
                .unwrap();
        assert!(event.as_invoice().is_err());
        assert!(event.as_checkout().is_err());
    }

    #[test]
    fn test_parse_checkout_event() {
        let json = r#"{
            "id": "evt_co_1",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "livemode": true,
            "data": {
                "object": {
                    "id": "cs_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "client_reference_id": "user_42",
                    "customer_email": "maker@example.com",
                    "metadata": {"price_id": "price_starter_monthly"}
                }
            }
        }"#;

        let event = StripeEvent::from_bytes(json.as_bytes()).unwrap();
        let session = event.as_checkout().unwrap();
        assert_eq!(session.client_reference_id.as_deref(), Some("user_42"));
        assert_eq!(session.subscription.as_deref(), Some("sub_1"));
    }

    #[test]
    fn test_parse_invoice_event() {
        let json = r#"{
            "id": "evt_in_1",
            "type": "invoice.payment_failed",
            "created": 1700000000,
            "livemode": false,
            "data": {
                "object": {
                    "id": "in_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "amount_paid": 0,
                    "amount_due": 2900,
                    "currency": "usd",
                    "billing_reason": "subscription_cycle"
                }
            }
        }"#;

        let event = StripeEvent::from_bytes(json.as_bytes()).unwrap();
        let invoice = event.as_invoice().unwrap();
        assert_eq!(invoice.amount_due, 2900);
        assert_eq!(invoice.billing_reason.as_deref(), Some("subscription_cycle"));
    }

    #[test]
    fn test_empty_event_id_rejected() {
        let json = r#"{
            "id": "",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "livemode": false,
            "data": {"object": {}}
        }"#;

        let err = StripeEvent::from_bytes(json.as_bytes()).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidPayload(_)));
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let json = subscription_event_json("customer.subscription.updated")
            .replace("\"active\"", "\"some_future_status\"");
        let event = StripeEvent::from_bytes(json.as_bytes()).unwrap();
        let sub = event.as_subscription().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Unknown);
        assert!(!sub.status.is_entitled());
    }

    #[test]
    fn test_entitlement_helpers() {
        assert!(SubscriptionStatus::Active.is_entitled());
        assert!(SubscriptionStatus::Trialing.is_entitled());
        assert!(!SubscriptionStatus::Canceled.is_entitled());

        assert!(SubscriptionStatus::PastDue.needs_payment_attention());
        assert!(!SubscriptionStatus::Active.needs_payment_attention());
    }
}
