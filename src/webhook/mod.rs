//! Webhook Intake Pipeline
//!
//! Everything between an inbound provider delivery and the billing side
//! effects it triggers:
//!
//! ```text
//! Request -> Signature Verify -> Idempotency Guard -> Ack (200) -> Async Process
//!                  |                     |                              |
//!                  v                     v                              v
//!             400/401            200 (duplicate)              Background Task
//! ```
//!
//! The idempotency guard is the correctness core: providers deliver
//! at-least-once, so each event ID is reserved atomically before any side
//! effect runs, and a delivery whose ID was already reserved is acknowledged
//! without re-executing anything. A guard storage failure fails the whole
//! request so the provider redelivers.
//!
//! Signing secrets come from the environment and signature comparison is
//! constant-time; see [`signature`].

pub mod config;
pub mod events;
pub mod handler;
pub mod idempotency;
pub mod processor;
pub mod signature;

// Re-export commonly used items
pub use config::WebhookConfig;
pub use events::{EventKind, Invoice, StripeEvent, Subscription, SubscriptionStatus};
pub use handler::{
    webhook_router, LoggingUpdateHandler, TelegramUpdate, TelegramUpdateHandler, WebhookState,
};
pub use idempotency::{EventSource, EventStatus, IdempotencyStore, InMemoryIdempotencyStore};
pub use processor::{BillingHandler, EventProcessor, NoOpBillingHandler, ProcessorHandle};
pub use signature::SignatureVerifier;
