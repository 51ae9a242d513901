use std::sync::Arc;

use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Concurrency expectation for an append.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Version the writer last observed. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Appends unconditionally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the aggregate to be at exactly `version`.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the aggregate to have no events yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Persistence for event-sourced aggregates.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a contiguous batch of events for one aggregate, atomically.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version` does
    /// not match the stored version. Returns the aggregate's new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Returns all events for an aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Returns the current version, or `None` if the aggregate has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        (**self).append(events, options).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub(crate) fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidBatch(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidBatch(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidBatch(format!(
                "versions must be consecutive: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("Test")
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_batch(&[]),
            Err(EventStoreError::InvalidBatch(_))
        ));
    }

    #[test]
    fn gaps_are_rejected() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn mixed_aggregates_are_rejected() {
        let batch = vec![envelope(AggregateId::new(), 1), envelope(AggregateId::new(), 2)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn consecutive_batch_is_accepted() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        assert!(validate_batch(&batch).is_ok());
    }
}
