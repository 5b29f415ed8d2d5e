//! Webhook Delivery Deduplication
//!
//! Stripe and Telegram both deliver webhooks at-least-once: a slow
//! acknowledgment or a transient network failure triggers redelivery of the
//! same logical event. The guard in this module makes the rest of the
//! pipeline safe under that contract by reserving each event ID exactly once
//! before any side effects run.
//!
//! # Contract
//!
//! For a given `(source, event_id)` pair, [`IdempotencyStore::should_process`]
//! returns `true` exactly once - on the call that wins the reservation - and
//! `false` on every later (or concurrently losing) call. The reservation is
//! an atomic insert-if-absent: two concurrent first deliveries of the same
//! event cannot both observe `true`. Storage failures propagate as errors and
//! are never collapsed into a boolean, so a caller can fail the webhook
//! request and let the provider redeliver.
//!
//! Reserved IDs are never released. The set grows without bound; persistent
//! backends must enforce the reservation with a unique key so the
//! insert-or-fail semantics survive multiple processes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Upstream system that delivered the event.
///
/// Used to namespace event IDs so a Stripe event ID can never collide with
/// a Telegram update ID in the shared reservation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Stripe billing webhooks (`evt_...` identifiers)
    Stripe,
    /// Telegram bot updates (numeric `update_id`)
    Telegram,
}

impl EventSource {
    /// Key namespace prefix for this source.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Telegram => "telegram",
        }
    }

    /// Build the namespaced storage key for an event ID.
    pub fn key_for(&self, event_id: &str) -> String {
        format!("{}:{}", self.prefix(), event_id)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Processing state of a reserved event.
///
/// Only the reservation itself carries the at-most-once guarantee; these
/// states are bookkeeping on top of it, written by the async processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Reserved; business logic has not finished yet
    Pending,
    /// Business logic completed successfully
    Completed,
    /// Business logic exhausted its retries
    Failed,
}

/// Stored record for one reserved event ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Current processing state
    pub status: EventStatus,
    /// When the reservation was won
    pub first_seen: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Terminal error message, set when `status` is `Failed`
    pub error: Option<String>,
}

impl EventRecord {
    fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: EventStatus::Pending,
            first_seen: now,
            updated_at: now,
            error: None,
        }
    }
}

/// Durable set of processed webhook event IDs.
///
/// Implementations must provide atomic insert-or-fail semantics for
/// [`should_process`](Self::should_process): under concurrent calls with the
/// same new event ID, exactly one caller wins the reservation. A plain
/// select-then-insert pair is not an acceptable implementation.
#[async_trait::async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Decide whether the caller should execute this event's side effects.
    ///
    /// Returns `Ok(true)` if this call won the reservation for the event ID,
    /// `Ok(false)` if the ID was already reserved (duplicate delivery), and
    /// `Err` if storage could not answer - the caller must fail the webhook
    /// request rather than guess.
    ///
    /// A known duplicate performs no write.
    async fn should_process(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<bool, StorageError>;

    /// Record that the event's business logic finished successfully.
    async fn mark_completed(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<(), StorageError>;

    /// Record that the event's business logic failed terminally.
    async fn mark_failed(
        &self,
        source: EventSource,
        event_id: &str,
        reason: &str,
    ) -> Result<(), StorageError>;

    /// Look up the processing state of an event ID, if it was ever reserved.
    async fn status(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<Option<EventStatus>, StorageError>;
}

/// In-process reference implementation of [`IdempotencyStore`].
///
/// The reservation is a single write-locked `HashMap::entry` insert, which
/// gives the required insert-or-fail atomicity within one process. Duplicate
/// lookups take only the read lock, so the hot path for redeliveries never
/// contends with writers.
///
/// Suitable for a single-instance deployment and for tests. A multi-instance
/// deployment needs a backend where the reservation is a unique-key insert
/// shared across processes.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<String, EventRecord>>,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reserved event IDs. The set never shrinks; operators can
    /// watch this to size a future retention sweep.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True if no event has ever been reserved.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn should_process(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<bool, StorageError> {
        let key = source.key_for(event_id);

        // Fast path: redeliveries of known events take the read lock only
        // and perform no write.
        if self.records.read().contains_key(&key) {
            tracing::debug!(source = %source, event_id, "Duplicate delivery, skipping");
            return Ok(false);
        }

        // Reservation: a single locked insert-if-absent. A concurrent caller
        // that raced past the read check above lands on the occupied arm.
        let mut records = self.records.write();
        match records.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(EventRecord::pending(Utc::now()));
                Ok(true)
            }
        }
    }

    async fn mark_completed(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<(), StorageError> {
        let key = source.key_for(event_id);
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| StorageError::UnknownEvent(key.clone()))?;
        record.status = EventStatus::Completed;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        source: EventSource,
        event_id: &str,
        reason: &str,
    ) -> Result<(), StorageError> {
        let key = source.key_for(event_id);
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| StorageError::UnknownEvent(key.clone()))?;
        record.status = EventStatus::Failed;
        record.updated_at = Utc::now();
        record.error = Some(reason.to_string());
        Ok(())
    }

    async fn status(
        &self,
        source: EventSource,
        event_id: &str,
    ) -> Result<Option<EventStatus>, StorageError> {
        let key = source.key_for(event_id);
        Ok(self.records.read().get(&key).map(|r| r.status))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_first_delivery_wins_reservation() {
        let store = InMemoryIdempotencyStore::new();

        assert!(store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap());
        assert!(!store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap());
        assert!(!store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_distinct_ids_are_independent() {
        let store = InMemoryIdempotencyStore::new();

        assert!(store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap());
        assert!(store
            .should_process(EventSource::Stripe, "evt_2")
            .await
            .unwrap());
        assert!(!store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap());
        assert!(!store
            .should_process(EventSource::Stripe, "evt_2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sources_do_not_collide() {
        let store = InMemoryIdempotencyStore::new();

        // Same raw identifier from two providers is two distinct events.
        assert!(store
            .should_process(EventSource::Stripe, "12345")
            .await
            .unwrap());
        assert!(store
            .should_process(EventSource::Telegram, "12345")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = InMemoryIdempotencyStore::new();

        assert_eq!(
            store.status(EventSource::Stripe, "evt_1").await.unwrap(),
            None
        );

        store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap();
        assert_eq!(
            store.status(EventSource::Stripe, "evt_1").await.unwrap(),
            Some(EventStatus::Pending)
        );

        store
            .mark_completed(EventSource::Stripe, "evt_1")
            .await
            .unwrap();
        assert_eq!(
            store.status(EventSource::Stripe, "evt_1").await.unwrap(),
            Some(EventStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_mark_failed_records_reason() {
        let store = InMemoryIdempotencyStore::new();

        store
            .should_process(EventSource::Stripe, "evt_1")
            .await
            .unwrap();
        store
            .mark_failed(EventSource::Stripe, "evt_1", "handler exploded")
            .await
            .unwrap();

        assert_eq!(
            store.status(EventSource::Stripe, "evt_1").await.unwrap(),
            Some(EventStatus::Failed)
        );
        let records = store.records.read();
        let record = records.get("stripe:evt_1").unwrap();
        assert_eq!(record.error.as_deref(), Some("handler exploded"));
    }

    #[tokio::test]
    async fn test_mark_on_unreserved_event_is_an_error() {
        let store = InMemoryIdempotencyStore::new();

        let err = store
            .mark_completed(EventSource::Stripe, "evt_never_seen")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownEvent(_)));
    }

    #[tokio::test]
    async fn test_concurrent_first_deliveries_single_winner() {
        let store = Arc::new(InMemoryIdempotencyStore::new());

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .should_process(EventSource::Stripe, "evt_contended")
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_key_namespacing() {
        assert_eq!(EventSource::Stripe.key_for("evt_1"), "stripe:evt_1");
        assert_eq!(EventSource::Telegram.key_for("99"), "telegram:99");
    }
}
