//! Subscription Lifecycle
//!
//! The business side of the webhook pipeline: plan tiers, the price
//! catalog, and the account directory that webhook events are applied to.

pub mod directory;
pub mod plans;

pub use directory::{AccountDirectory, AccountRecord, DirectoryBillingHandler};
pub use plans::{PlanCatalog, PlanTier};
