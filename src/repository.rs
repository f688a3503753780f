//! Orchestration of aggregate loading and persistence.
//!
//! [`Repository`] ties the pieces together: `get_by_id` seeds from the
//! snapshot cache when one is attached and replays the remaining events;
//! `save` appends uncommitted events with optimistic concurrency. The cache
//! is never required for correctness — a stale or absent snapshot only makes
//! a load slower, never wrong.

use thiserror::Error;

use crate::{
    aggregate::{Aggregate, AggregateState},
    event::{AggregateVersion, AppendMeta, EventDecodeError, EventPayload, EventSet as _},
    projector::SnapshotCache,
    store::{AppendError, ConcurrencyConflict, EventLog},
};

/// Error from [`Repository::get_by_id`].
#[derive(Debug, Error)]
pub enum LoadError<E>
where
    E: std::error::Error,
{
    /// The event log backend failed.
    #[error("event log backend error: {0}")]
    Backend(#[source] E),
    /// A stored event of a recognized kind failed to deserialize.
    #[error("failed to decode stored event: {0}")]
    Decode(#[source] EventDecodeError),
}

/// Error from [`Repository::save`].
#[derive(Debug, Error)]
pub enum SaveError<E>
where
    E: std::error::Error,
{
    /// Another writer moved the aggregate; reload and retry. Propagated
    /// unchanged from the log — the repository never retries or merges.
    #[error(transparent)]
    Conflict(ConcurrencyConflict),
    /// The event log backend failed.
    #[error("event log backend error: {0}")]
    Backend(#[source] E),
    /// An uncommitted event failed to serialize.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Repository over an event log and one aggregate state type.
pub struct Repository<L, S: AggregateState> {
    log: L,
    cache: Option<SnapshotCache<S>>,
}

impl<L, S> Repository<L, S>
where
    L: EventLog,
    S: AggregateState,
{
    #[must_use]
    pub const fn new(log: L) -> Self {
        Self { log, cache: None }
    }

    /// Attach a snapshot cache, normally one maintained by a
    /// [`SnapshotProjector`](crate::projector::SnapshotProjector).
    #[must_use]
    pub fn with_snapshots(mut self, cache: SnapshotCache<S>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub const fn event_log(&self) -> &L {
        &self.log
    }

    /// Load the current aggregate for an entity id.
    ///
    /// Starts from the cached snapshot when present (a fresh zero-state
    /// aggregate otherwise), replays every event past the starting version,
    /// and offers the result back to the cache. Replay always continues to
    /// the true current version, so the answer is independent of cache
    /// freshness.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Backend`] when the log fails, or
    /// [`LoadError::Decode`] when a stored event of a recognized kind is
    /// corrupt. Unknown event kinds are skipped, not errors.
    pub async fn get_by_id(&self, id: impl Into<String>) -> Result<Aggregate<S>, LoadError<L::Error>> {
        let aggregate_id = S::aggregate_id(id);

        let mut aggregate = self
            .cache
            .as_ref()
            .and_then(|cache| cache.try_get(&aggregate_id))
            .unwrap_or_else(|| Aggregate::new(aggregate_id.clone()));

        let events = self
            .log
            .read_events(&aggregate_id, aggregate.version().next())
            .await
            .map_err(LoadError::Backend)?;

        let mut last_position = None;
        for resolved in &events {
            aggregate.fold_resolved(resolved).map_err(LoadError::Decode)?;
            last_position = Some(resolved.position);
        }

        if let (Some(cache), Some(position)) = (&self.cache, last_position) {
            cache.offer(aggregate.clone(), position);
        }

        Ok(aggregate)
    }

    /// Persist an aggregate's uncommitted events.
    ///
    /// On success the aggregate's uncommitted buffer is cleared, its version
    /// set to the value assigned by the log, and the snapshot cache (if
    /// attached) refreshed. Saving with zero uncommitted events is a legal
    /// no-op that confirms the current version.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Conflict`] when the aggregate's version is stale
    /// (the caller must reload and retry), [`SaveError::Encode`] when an
    /// event fails to serialize, or [`SaveError::Backend`] when the log
    /// fails. On any error both the log and the aggregate are unchanged; the
    /// events stay buffered, so a retry against a reloaded aggregate remains
    /// possible.
    pub async fn save(
        &self,
        aggregate: &mut Aggregate<S>,
        meta: &AppendMeta,
    ) -> Result<(), SaveError<L::Error>> {
        if aggregate.uncommitted().is_empty() {
            tracing::trace!(aggregate_id = %aggregate.id(), "nothing to save");
            return Ok(());
        }

        let mut payloads: Vec<EventPayload> = Vec::with_capacity(aggregate.uncommitted().len());
        for event in aggregate.uncommitted() {
            payloads.push(event.encode().map_err(SaveError::Encode)?);
        }

        let committed = self
            .log
            .append_events(aggregate.id(), payloads, aggregate.version(), meta)
            .await
            .map_err(|err| match err {
                AppendError::Conflict(conflict) => SaveError::Conflict(conflict),
                AppendError::Backend(backend) => SaveError::Backend(backend),
            })?;

        aggregate.mark_committed(committed.version);
        tracing::debug!(
            aggregate_id = %aggregate.id(),
            version = %committed.version,
            "aggregate saved"
        );

        if let Some(cache) = &self.cache {
            cache.offer(aggregate.clone(), committed.position);
        }

        Ok(())
    }

    /// The aggregate's current version as recorded by the log.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when the lookup fails.
    pub async fn current_version(
        &self,
        id: impl Into<String>,
    ) -> Result<AggregateVersion, L::Error> {
        self.log.current_version(&S::aggregate_id(id)).await
    }
}
