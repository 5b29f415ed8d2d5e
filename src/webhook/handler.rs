//! Webhook HTTP Endpoints
//!
//! Intake for provider deliveries:
//! - `POST /webhooks/stripe` - signature-verified Stripe events
//! - `POST /webhooks/telegram` - secret-token-gated Telegram updates
//!
//! Response contract (what the provider's retry machinery sees):
//! - 200: delivery accepted, or recognized duplicate - no redelivery wanted
//! - 400: malformed request - redelivery would fail again
//! - 401: signature/secret rejected
//! - 500: the guard could not answer (storage failure) - provider should
//!   redeliver, since we do not know whether this event ran
//!
//! Bodies are taken as raw bytes because signature verification must see
//! the exact bytes Stripe signed.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::WebhookError;
use crate::handlers::ServiceState;
use crate::webhook::config::WebhookConfig;
use crate::webhook::events::StripeEvent;
use crate::webhook::idempotency::{EventSource, IdempotencyStore};
use crate::webhook::processor::EventProcessor;
use crate::webhook::signature::{
    verify_telegram_secret, SignatureVerifier, STRIPE_SIGNATURE_HEADER, TELEGRAM_SECRET_HEADER,
};

/// Acknowledgment body returned to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    /// Delivery was accepted
    pub received: bool,
    /// Delivery was a duplicate; no side effects were run
    pub duplicate: bool,
}

impl WebhookAck {
    fn accepted() -> Self {
        Self {
            received: true,
            duplicate: false,
        }
    }

    fn duplicate() -> Self {
        Self {
            received: true,
            duplicate: true,
        }
    }
}

/// Receiver of deduplicated Telegram updates.
#[async_trait::async_trait]
pub trait TelegramUpdateHandler: Send + Sync + 'static {
    /// Called at most once per `update_id`.
    async fn on_update(&self, update: &TelegramUpdate) -> anyhow::Result<()>;
}

/// Telegram update, keeping the raw payload alongside the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    /// Monotonic per-bot update identifier; the idempotency key
    pub update_id: i64,
    /// The full update payload for the handler
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// Update handler that only logs; used until the bot backend plugs in.
#[derive(Clone, Default)]
pub struct LoggingUpdateHandler;

#[async_trait::async_trait]
impl TelegramUpdateHandler for LoggingUpdateHandler {
    async fn on_update(&self, update: &TelegramUpdate) -> anyhow::Result<()> {
        tracing::info!(update_id = update.update_id, "Telegram update received");
        Ok(())
    }
}

/// Shared state for the webhook endpoints.
pub struct WebhookState {
    config: WebhookConfig,
    verifier: SignatureVerifier,
    store: Arc<dyn IdempotencyStore>,
    processor: EventProcessor,
    telegram_handler: Arc<dyn TelegramUpdateHandler>,
    metrics: Arc<ServiceState>,
}

impl WebhookState {
    /// Wire up the endpoint state.
    pub fn new(
        config: WebhookConfig,
        store: Arc<dyn IdempotencyStore>,
        processor: EventProcessor,
        telegram_handler: Arc<dyn TelegramUpdateHandler>,
        metrics: Arc<ServiceState>,
    ) -> Self {
        let verifier =
            SignatureVerifier::new(config.signing_secret.clone(), config.timestamp_tolerance);
        Self {
            config,
            verifier,
            store,
            processor,
            telegram_handler,
            metrics,
        }
    }
}

/// Router with both webhook endpoints.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/stripe", post(stripe_webhook_handler))
        .route("/webhooks/telegram", post(telegram_webhook_handler))
        .with_state(state)
}

/// `POST /webhooks/stripe`
#[instrument(skip_all)]
pub async fn stripe_webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = handle_stripe_delivery(&state, &headers, &body).await;
    state.metrics.record_latency(started.elapsed());

    match response {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_stripe_delivery(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookAck, Rejection> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Rejection::from(WebhookError::MissingSignature))?;

    state
        .verifier
        .verify(body, signature, chrono::Utc::now().timestamp())?;

    let event = StripeEvent::from_bytes(body)?;
    state.metrics.record_received();

    let fresh = state
        .store
        .should_process(EventSource::Stripe, &event.id)
        .await
        .map_err(Rejection::storage)?;

    if !fresh {
        state.metrics.record_duplicate();
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Duplicate Stripe delivery acknowledged"
        );
        return Ok(WebhookAck::duplicate());
    }

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        livemode = event.livemode,
        "Stripe event accepted"
    );
    state.processor.enqueue(event).await?;

    Ok(WebhookAck::accepted())
}

/// `POST /webhooks/telegram`
#[instrument(skip_all)]
pub async fn telegram_webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = handle_telegram_delivery(&state, &headers, &body).await;
    state.metrics.record_latency(started.elapsed());

    match response {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_telegram_delivery(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookAck, Rejection> {
    let Some(expected) = state.config.telegram_secret.as_deref() else {
        return Err(Rejection {
            status: StatusCode::NOT_FOUND,
            message: "telegram endpoint disabled".to_string(),
        });
    };

    let presented = headers
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Rejection::from(WebhookError::MissingSignature))?;
    verify_telegram_secret(expected, presented)?;

    let update: TelegramUpdate = serde_json::from_slice(body)
        .map_err(|e| Rejection::from(WebhookError::InvalidPayload(e.to_string())))?;
    state.metrics.record_received();

    let update_key = update.update_id.to_string();
    let fresh = state
        .store
        .should_process(EventSource::Telegram, &update_key)
        .await
        .map_err(Rejection::storage)?;

    if !fresh {
        state.metrics.record_duplicate();
        tracing::info!(update_id = update.update_id, "Duplicate Telegram update acknowledged");
        return Ok(WebhookAck::duplicate());
    }

    // Telegram updates are handled inline; the bot-side work is light and
    // Telegram's timeout is generous.
    if let Err(e) = state.telegram_handler.on_update(&update).await {
        state
            .store
            .mark_failed(EventSource::Telegram, &update_key, &e.to_string())
            .await
            .map_err(Rejection::storage)?;
        return Err(Rejection::from(WebhookError::ProcessingFailed(
            e.to_string(),
        )));
    }
    state
        .store
        .mark_completed(EventSource::Telegram, &update_key)
        .await
        .map_err(Rejection::storage)?;
    state.metrics.record_processed();

    Ok(WebhookAck::accepted())
}

/// Error response carrying the provider-facing status code.
#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    /// Storage failures are 500 so the provider redelivers (the guard could
    /// not answer; the delivery must not be acknowledged).
    fn storage(err: crate::error::StorageError) -> Self {
        tracing::error!(error = %err, "Idempotency store failure");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "idempotency store unavailable".to_string(),
        }
    }
}

impl From<WebhookError> for Rejection {
    fn from(err: WebhookError) -> Self {
        let status = match &err {
            WebhookError::MissingSignature | WebhookError::MalformedSignature(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::SignatureMismatch | WebhookError::StaleTimestamp { .. } => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::QueueFailed(_) | WebhookError::ProcessingFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::warn!(error = %err, status = %status, "Webhook delivery rejected");
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_shapes() {
        let ack = WebhookAck::accepted();
        assert!(ack.received);
        assert!(!ack.duplicate);

        let dup = WebhookAck::duplicate();
        assert!(dup.received);
        assert!(dup.duplicate);
    }

    #[test]
    fn test_rejection_status_mapping() {
        let cases = [
            (WebhookError::MissingSignature, StatusCode::BAD_REQUEST),
            (WebhookError::SignatureMismatch, StatusCode::UNAUTHORIZED),
            (
                WebhookError::StaleTimestamp { age_secs: 600 },
                StatusCode::UNAUTHORIZED,
            ),
            (
                WebhookError::InvalidPayload("bad json".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                WebhookError::QueueFailed("closed".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(Rejection::from(err).status, expected);
        }
    }

    #[test]
    fn test_telegram_update_keeps_payload() {
        let json = r#"{"update_id": 42, "message": {"text": "/start"}}"#;
        let update: TelegramUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 42);
        assert_eq!(update.payload["message"]["text"], "/start");
    }
}
