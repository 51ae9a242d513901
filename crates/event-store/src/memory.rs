use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_batch},
};

/// In-memory event store for tests and single-process deployments.
///
/// Streams are keyed by aggregate ID; the version check and the append
/// happen under one write lock, so the conflict semantics match Postgres.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<EventEnvelope>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }

    /// Simulates an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        self.check_available()?;
        validate_batch(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new = events[0].version;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_default();
        let current = stream.last().map(|e| e.version).unwrap_or_default();

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Mirrors the unique (aggregate_id, version) constraint.
        if first_new != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let last = events.last().map(|e| e.version).unwrap_or(current);
        stream.extend(events);
        Ok(last)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        self.check_available()?;
        Ok(self
            .streams
            .read()
            .await
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        self.check_available()?;
        Ok(self
            .streams
            .read()
            .await
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventStoreExt;

    fn create_test_event(aggregate_id: AggregateId, version: Version) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type("TestEvent")
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_load() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                vec![
                    create_test_event(id, Version::new(1)),
                    create_test_event(id, Version::new(2)),
                ],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        let events = store.get_events_for_aggregate(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].version, Version::new(2));
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(
                vec![create_test_event(id, Version::first())],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        // A second writer that also loaded the empty stream.
        let result = store
            .append(
                vec![create_test_event(id, Version::first())],
                AppendOptions::expect_new(),
            )
            .await;

        match result {
            Err(EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unchecked_append_still_rejects_version_gaps() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let result = store
            .append(
                vec![create_test_event(id, Version::new(3))],
                AppendOptions::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn version_and_existence() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        assert_eq!(store.get_aggregate_version(id).await.unwrap(), None);
        assert!(!store.aggregate_exists(id).await.unwrap());

        store
            .append(
                vec![create_test_event(id, Version::first())],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::first())
        );
        assert!(store.aggregate_exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn outage_fails_reads_and_writes() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.set_unavailable(true);

        let err = store.get_events_for_aggregate(id).await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert!(store.get_events_for_aggregate(id).await.unwrap().is_empty());
    }
}
