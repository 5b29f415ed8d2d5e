//! Async Event Processing
//!
//! The webhook endpoint acknowledges quickly and hands verified,
//! reservation-winning events to this processor. Processing happens in
//! background tasks with bounded retries and a per-attempt timeout.
//!
//! ```text
//! [HTTP handler]                    [background]
//!  verify -> guard -> queue ----->  dispatch -> BillingHandler
//!                     200 OK           |  ok        |  retries exhausted
//!                                      v            v
//!                               mark_completed   mark_failed
//! ```
//!
//! The idempotency reservation already happened in the HTTP handler, so the
//! processor never re-checks it; its store writes are the completion and
//! failure markers only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::WebhookError;
use crate::handlers::ServiceState;
use crate::webhook::config::WebhookConfig;
use crate::webhook::events::{EventKind, Invoice, StripeEvent, Subscription};
use crate::webhook::idempotency::{EventSource, IdempotencyStore};

/// Receiver of billing side effects, called at most once per event.
#[async_trait::async_trait]
pub trait BillingHandler: Send + Sync + 'static {
    /// A customer completed Checkout for a plan
    async fn on_checkout_completed(
        &self,
        session: &crate::webhook::events::CheckoutSession,
    ) -> anyhow::Result<()>;

    /// Subscription created
    async fn on_subscription_created(&self, subscription: &Subscription) -> anyhow::Result<()>;

    /// Subscription changed (plan, status, cancellation schedule)
    async fn on_subscription_updated(&self, subscription: &Subscription) -> anyhow::Result<()>;

    /// Subscription ended
    async fn on_subscription_deleted(&self, subscription: &Subscription) -> anyhow::Result<()>;

    /// Recurring payment collected
    async fn on_payment_succeeded(&self, invoice: &Invoice) -> anyhow::Result<()>;

    /// Recurring payment failed
    async fn on_payment_failed(&self, invoice: &Invoice) -> anyhow::Result<()>;
}

/// Queues events for background processing.
#[derive(Clone)]
pub struct EventProcessor {
    task_sender: mpsc::Sender<StripeEvent>,
}

impl EventProcessor {
    /// Create the processor and the handle that drives it.
    ///
    /// Spawn [`ProcessorHandle::run`] on the runtime; the returned
    /// `EventProcessor` is the cheap cloneable queueing side.
    pub fn new(
        handler: Arc<dyn BillingHandler>,
        store: Arc<dyn IdempotencyStore>,
        metrics: Arc<ServiceState>,
        config: WebhookConfig,
    ) -> (Self, ProcessorHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let processor = Self { task_sender: tx };
        let handle = ProcessorHandle {
            handler,
            store,
            metrics,
            config,
            task_receiver: rx,
        };

        (processor, handle)
    }

    /// Queue an event for async processing. Returns once the event is in
    /// the queue; processing happens in the background.
    pub async fn enqueue(&self, event: StripeEvent) -> Result<(), WebhookError> {
        self.task_sender
            .send(event)
            .await
            .map_err(|e| WebhookError::QueueFailed(e.to_string()))
    }
}

/// Background side of the processor; owns the queue receiver.
pub struct ProcessorHandle {
    handler: Arc<dyn BillingHandler>,
    store: Arc<dyn IdempotencyStore>,
    metrics: Arc<ServiceState>,
    config: WebhookConfig,
    task_receiver: mpsc::Receiver<StripeEvent>,
}

impl ProcessorHandle {
    /// Run the dispatcher until the queue side is dropped.
    ///
    /// Spawn as a tokio task:
    ///
    /// ```rust,ignore
    /// tokio::spawn(async move { handle.run().await });
    /// ```
    pub async fn run(mut self) {
        tracing::info!("Starting webhook event processor");

        while let Some(event) = self.task_receiver.recv().await {
            let handler = self.handler.clone();
            let store = self.store.clone();
            let metrics = self.metrics.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                process_with_retry(handler, store, metrics, event, &config).await;
            });
        }

        tracing::info!("Webhook event processor shutting down");
    }
}

/// Drive one event to completion or terminal failure.
async fn process_with_retry(
    handler: Arc<dyn BillingHandler>,
    store: Arc<dyn IdempotencyStore>,
    metrics: Arc<ServiceState>,
    event: StripeEvent,
    config: &WebhookConfig,
) {
    let event_id = event.id.clone();
    let event_type = event.event_type.clone();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.retry_delay(attempt - 1);
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                attempt,
                delay_ms = delay.as_millis(),
                "Retrying event processing"
            );
            tokio::time::sleep(delay).await;
        }

        match process_single_event(&handler, &store, &event, config).await {
            Ok(()) => {
                metrics.record_processed();
                tracing::info!(
                    event_id = %event_id,
                    event_type = %event_type,
                    attempts = attempt + 1,
                    "Event processed"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event_id,
                    event_type = %event_type,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    error = %e,
                    "Event processing failed"
                );

                if attempt == config.max_retries {
                    metrics.record_failed();
                    if let Err(mark_err) = store
                        .mark_failed(EventSource::Stripe, &event_id, &e.to_string())
                        .await
                    {
                        tracing::error!(
                            event_id = %event_id,
                            error = %mark_err,
                            "Failed to record terminal failure"
                        );
                    }
                }
            }
        }
    }
}

/// One processing attempt: dispatch by kind, then mark completion.
pub(crate) async fn process_single_event(
    handler: &Arc<dyn BillingHandler>,
    store: &Arc<dyn IdempotencyStore>,
    event: &StripeEvent,
    config: &WebhookConfig,
) -> Result<(), WebhookError> {
    let failed = |e: anyhow::Error| WebhookError::ProcessingFailed(e.to_string());

    let dispatch = async {
        match event.kind() {
            EventKind::CheckoutCompleted => {
                let session = event.as_checkout()?;
                handler.on_checkout_completed(&session).await.map_err(failed)
            }
            EventKind::SubscriptionCreated => {
                let sub = event.as_subscription()?;
                handler.on_subscription_created(&sub).await.map_err(failed)
            }
            EventKind::SubscriptionUpdated => {
                let sub = event.as_subscription()?;
                handler.on_subscription_updated(&sub).await.map_err(failed)
            }
            EventKind::SubscriptionDeleted => {
                let sub = event.as_subscription()?;
                handler.on_subscription_deleted(&sub).await.map_err(failed)
            }
            EventKind::PaymentSucceeded => {
                let invoice = event.as_invoice()?;
                handler.on_payment_succeeded(&invoice).await.map_err(failed)
            }
            EventKind::PaymentFailed => {
                let invoice = event.as_invoice()?;
                handler.on_payment_failed(&invoice).await.map_err(failed)
            }
            EventKind::Unknown => {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Ignoring unhandled event type"
                );
                Ok(())
            }
        }
    };

    match timeout(config.processing_timeout, dispatch).await {
        Ok(Ok(())) => {
            store
                .mark_completed(EventSource::Stripe, &event.id)
                .await
                .map_err(|e| WebhookError::ProcessingFailed(e.to_string()))?;
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(WebhookError::ProcessingFailed(format!(
            "processing timed out after {:?}",
            config.processing_timeout
        ))),
    }
}

/// Handler that does nothing; used in tests and as a wiring placeholder.
#[derive(Clone, Default)]
pub struct NoOpBillingHandler;

#[async_trait::async_trait]
impl BillingHandler for NoOpBillingHandler {
    async fn on_checkout_completed(
        &self,
        _session: &crate::webhook::events::CheckoutSession,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_subscription_created(&self, _subscription: &Subscription) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_subscription_updated(&self, _subscription: &Subscription) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_subscription_deleted(&self, _subscription: &Subscription) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_payment_succeeded(&self, _invoice: &Invoice) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_payment_failed(&self, _invoice: &Invoice) -> anyhow::Result<()> {
        Ok(())
    }
}
