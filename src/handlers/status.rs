//! Status and health check handlers for the billing service.
//!
//! HTTP endpoints for monitoring:
//! - `/status` - webhook counters, memory, and latency percentiles
//! - `/health` - simple liveness probe for systemd/load balancers
//! - `/ready` - readiness probe
//!
//! The counters here describe the webhook pipeline: deliveries received,
//! duplicates skipped by the idempotency guard, events processed, and
//! events that exhausted their retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument};

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Liveness probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Detailed status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Webhook pipeline counters
    pub webhooks: WebhookCounters,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Request latency statistics (percentiles)
    pub latency: LatencyMetrics,

    /// Server status (always "running" if responding)
    pub status: String,

    /// ISO8601 timestamp of when status was generated
    pub timestamp: String,
}

/// Counters describing the webhook pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookCounters {
    /// Total deliveries that passed signature verification
    pub received: u64,
    /// Deliveries skipped as duplicates by the idempotency guard
    pub duplicates_skipped: u64,
    /// Events whose business logic completed
    pub processed: u64,
    /// Events that exhausted their retries
    pub failed: u64,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size - actual physical memory used (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Request latency percentile metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile (median) latency in milliseconds
    pub p50_ms: f64,

    /// 95th percentile latency in milliseconds
    pub p95_ms: f64,

    /// 99th percentile latency in milliseconds
    pub p99_ms: f64,

    /// Total number of requests recorded
    pub total_requests: u64,

    /// Maximum latency recorded in milliseconds
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram for recording request timings.
///
/// Tracks latencies from 1us to 60 seconds with 3 significant figures.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency value in microseconds. Values outside the histogram
    /// bounds are silently ignored.
    pub fn record(&self, latency_us: u64) {
        let mut hist = self.inner.write();
        let _ = hist.record(latency_us);
    }

    /// Record a latency duration.
    pub fn record_duration(&self, duration: std::time::Duration) {
        self.record(duration.as_micros() as u64);
    }

    /// Get complete latency metrics, converted to milliseconds.
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_requests: hist.len(),
            max_ms: hist.max() as f64 / 1000.0,
        }
    }

    /// Get the total count of recorded values.
    pub fn count(&self) -> u64 {
        self.inner.read().len()
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Service State
// ============================================================================

/// Shared service state for metrics and status tracking.
///
/// All fields are thread-safe and accessed concurrently by the webhook
/// handlers and the background processor.
#[derive(Debug)]
pub struct ServiceState {
    /// Server start time for uptime calculation
    start_time: Instant,

    /// Deliveries that passed verification
    events_received: AtomicU64,

    /// Deliveries skipped as duplicates
    duplicates_skipped: AtomicU64,

    /// Events processed to completion
    events_processed: AtomicU64,

    /// Events that exhausted retries
    events_failed: AtomicU64,

    /// Request latency histogram
    latency_histogram: LatencyHistogram,
}

impl ServiceState {
    /// Create a new state instance; start time is now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            latency_histogram: LatencyHistogram::new(),
        }
    }

    /// Server uptime in seconds.
    #[inline]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Count a verified delivery.
    #[inline]
    pub fn record_received(&self) -> u64 {
        self.events_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a delivery the guard skipped as a duplicate.
    #[inline]
    pub fn record_duplicate(&self) -> u64 {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count an event processed to completion.
    #[inline]
    pub fn record_processed(&self) -> u64 {
        self.events_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count an event that exhausted its retries.
    #[inline]
    pub fn record_failed(&self) -> u64 {
        self.events_failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Verified deliveries so far.
    #[inline]
    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Duplicates skipped so far.
    #[inline]
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    /// Events processed so far.
    #[inline]
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    /// Events failed so far.
    #[inline]
    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    /// Record a request latency duration.
    #[inline]
    pub fn record_latency(&self, duration: std::time::Duration) {
        self.latency_histogram.record_duration(duration);
    }

    /// Current latency metrics.
    #[inline]
    pub fn latency_metrics(&self) -> LatencyMetrics {
        self.latency_histogram.metrics()
    }

    /// Snapshot of the webhook counters.
    pub fn webhook_counters(&self) -> WebhookCounters {
        WebhookCounters {
            received: self.events_received(),
            duplicates_skipped: self.duplicates_skipped(),
            processed: self.events_processed(),
            failed: self.events_failed(),
        }
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process using sysinfo.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health` - liveness probe, always 200 while the process runs.
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// `GET /status` - detailed status with webhook counters, memory, and
/// latency percentiles.
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    debug!("Status check requested");

    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        uptime_seconds: state.uptime_seconds(),
        webhooks: state.webhook_counters(),
        memory: collect_memory_metrics(),
        latency: state.latency_metrics(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// `GET /ready` - readiness probe. Mirrors the health check; the service
/// has no external dependencies to wait on with the in-memory store.
#[instrument(skip_all)]
pub async fn readiness_handler() -> impl IntoResponse {
    debug!("Readiness check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

// ============================================================================
// Router Setup
// ============================================================================

/// Router with all health and status endpoints.
pub fn status_router(state: Arc<ServiceState>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/ready", get(readiness_handler))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
