//! HTTP handlers for service observability endpoints.

pub mod status;

pub use status::{status_router, LatencyHistogram, ServiceState, StatusResponse, WebhookCounters};
