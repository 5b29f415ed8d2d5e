//! Property tests for the idempotency guard
//!
//! Encodes the guard's contract over arbitrary event identifiers:
//! exactly one `true` per identifier, independence between identifiers,
//! and a single winner under concurrent first deliveries.

use std::sync::Arc;

use proptest::prelude::*;

use postpilot_billing::webhook::{EventSource, IdempotencyStore, InMemoryIdempotencyStore};

/// Identifier shape matching Stripe event IDs and Telegram update IDs.
fn event_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,48}"
}

proptest! {
    #[test]
    fn first_call_true_all_later_calls_false(id in event_id_strategy(), extra_calls in 1usize..8) {
        tokio_test::block_on(async {
            let store = InMemoryIdempotencyStore::new();

            prop_assert!(store.should_process(EventSource::Stripe, &id).await.unwrap());
            for _ in 0..extra_calls {
                prop_assert!(!store.should_process(EventSource::Stripe, &id).await.unwrap());
            }
            Ok(())
        })?;
    }

    #[test]
    fn distinct_ids_are_independent(id in event_id_strategy()) {
        tokio_test::block_on(async {
            let store = InMemoryIdempotencyStore::new();
            let other = format!("{id}_x");

            prop_assert!(store.should_process(EventSource::Stripe, &id).await.unwrap());
            prop_assert!(store.should_process(EventSource::Stripe, &other).await.unwrap());
            prop_assert!(!store.should_process(EventSource::Stripe, &id).await.unwrap());
            prop_assert!(!store.should_process(EventSource::Stripe, &other).await.unwrap());
            Ok(())
        })?;
    }

    #[test]
    fn sources_namespace_the_keyspace(id in event_id_strategy()) {
        tokio_test::block_on(async {
            let store = InMemoryIdempotencyStore::new();

            prop_assert!(store.should_process(EventSource::Stripe, &id).await.unwrap());
            prop_assert!(store.should_process(EventSource::Telegram, &id).await.unwrap());
            prop_assert!(!store.should_process(EventSource::Telegram, &id).await.unwrap());
            Ok(())
        })?;
    }

    #[test]
    fn concurrent_first_deliveries_have_one_winner(
        id in event_id_strategy(),
        concurrency in 2usize..32,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();

        let winners = runtime.block_on(async {
            let store = Arc::new(InMemoryIdempotencyStore::new());
            let mut tasks = Vec::with_capacity(concurrency);
            for _ in 0..concurrency {
                let store = store.clone();
                let id = id.clone();
                tasks.push(tokio::spawn(async move {
                    store.should_process(EventSource::Stripe, &id).await.unwrap()
                }));
            }

            let mut winners = 0u32;
            for task in tasks {
                if task.await.unwrap() {
                    winners += 1;
                }
            }
            winners
        });

        prop_assert_eq!(winners, 1);
    }
}
