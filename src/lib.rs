//! PostPilot Billing - Webhook Event-Integrity Service
//!
//! The backend that keeps PostPilot's billing correct under webhook
//! redelivery: it verifies Stripe (and Telegram) deliveries, deduplicates
//! them with an idempotency guard, and applies subscription lifecycle
//! changes to the account directory exactly once.
//!
//! # Architecture
//!
//! ```text
//! Stripe/Telegram ──▶ Webhook Router ──▶ Signature Verify
//!                                              │
//!                                              ▼
//!                                      Idempotency Guard ──▶ duplicate? ack 200
//!                                              │
//!                                              ▼
//!                                       Async Processor
//!                                              │
//!                                              ▼
//!                                     BillingHandler ──▶ Account Directory
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use postpilot_billing::billing::{AccountDirectory, DirectoryBillingHandler, PlanCatalog};
//! use postpilot_billing::handlers::ServiceState;
//! use postpilot_billing::webhook::{
//!     webhook_router, EventProcessor, InMemoryIdempotencyStore, LoggingUpdateHandler,
//!     WebhookConfig, WebhookState,
//! };
//!
//! #[tokio::main]
//! async fn main() -> postpilot_billing::Result<()> {
//!     let config = WebhookConfig::from_env()?;
//!     let store = Arc::new(InMemoryIdempotencyStore::new());
//!     let directory = Arc::new(AccountDirectory::new());
//!     let handler = Arc::new(DirectoryBillingHandler::new(
//!         directory,
//!         PlanCatalog::from_env(),
//!     ));
//!     let metrics = Arc::new(ServiceState::new());
//!
//!     let (processor, handle) =
//!         EventProcessor::new(handler, store.clone(), metrics.clone(), config.clone());
//!     tokio::spawn(async move { handle.run().await });
//!
//!     let state = Arc::new(WebhookState::new(
//!         config,
//!         store,
//!         processor,
//!         Arc::new(LoggingUpdateHandler),
//!         metrics,
//!     ));
//!     let app = webhook_router(state);
//!     // ... serve with axum
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod billing;
pub mod error;
pub mod handlers;
pub mod webhook;

// Re-exports for convenience
pub use billing::{AccountDirectory, DirectoryBillingHandler, PlanCatalog, PlanTier};
pub use error::{Error, Result};
pub use webhook::{
    webhook_router, EventProcessor, IdempotencyStore, InMemoryIdempotencyStore, WebhookConfig,
    WebhookState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
