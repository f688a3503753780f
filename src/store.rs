//! Event log abstraction and its error taxonomy.
//!
//! [`EventLog`] is the contract implemented by storage backends: atomic,
//! version-checked appends and ordered historical reads. Backends that can
//! push newly committed events to live subscribers additionally implement
//! [`SubscribableLog`]. The crate ships a reference backend in [`inmemory`].

use std::{pin::Pin, sync::Arc};

use futures_core::Stream;
use thiserror::Error;

use crate::event::{
    AggregateId, AggregateVersion, AppendMeta, EventPayload, ResolvedEvent, StreamPosition,
    SubscribeFrom,
};

pub mod inmemory;

/// Error indicating a stale expected version during append.
///
/// The only recoverable failure of an append: the caller must reload the
/// aggregate and retry its command. The log never retries internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict: expected version {expected}, found {actual} (hint: another writer \
     moved the stream; reload and retry)"
)]
pub struct ConcurrencyConflict {
    /// The version the caller assumed.
    pub expected: AggregateVersion,
    /// The aggregate's actual current version.
    pub actual: AggregateVersion,
}

/// Error from version-checked appends.
#[derive(Debug, Error)]
pub enum AppendError<E>
where
    E: std::error::Error,
{
    /// Another writer moved the aggregate since the caller last read it.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// The storage backend failed; fatal to this call, surfaced unchanged.
    #[error("event log backend error: {0}")]
    Backend(#[source] E),
}

/// Result of a successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Committed {
    /// The aggregate's version after the append.
    pub version: AggregateVersion,
    /// Log head position after the append: every event of this aggregate at
    /// or below this position is committed.
    pub position: StreamPosition,
}

/// Which committed events a subscription should see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Events of a single aggregate instance.
    Aggregate(AggregateId),
    /// Events of every aggregate in a category.
    Category(String),
    /// Events of one kind, across all aggregates.
    EventKind(String),
}

impl SubscriptionFilter {
    /// Whether a committed event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &ResolvedEvent) -> bool {
        match self {
            Self::Aggregate(id) => event.aggregate_id == *id,
            Self::Category(category) => event.aggregate_id.category() == category,
            Self::EventKind(kind) => event.payload.kind == *kind,
        }
    }
}

/// Boxed stream of resolved events delivered to one subscriber.
///
/// Items arrive in global position order. A graceful end of the subscription
/// completes the stream; an abnormal backend failure surfaces as one terminal
/// `Err` to this subscriber only.
pub type EventStream<'a, L> = Pin<
    Box<dyn Stream<Item = Result<Arc<ResolvedEvent>, <L as EventLog>::Error>> + Send + 'a>,
>;

/// Append-only, per-aggregate event storage with optimistic concurrency.
///
/// Implementations must serialize all appends through one writer critical
/// section per log instance, so that version check, version/position
/// assignment, and publication happen as one indivisible step.
pub trait EventLog: Send + Sync {
    /// Backend-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append events to an aggregate, atomically, in input order.
    ///
    /// Every event receives the next sequential aggregate version and the
    /// next global position. An empty batch is a legal no-op that merely
    /// confirms the current version (the version check still applies).
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Conflict`] when the aggregate's current version
    /// differs from `expected_version` — the log is left unchanged — or
    /// [`AppendError::Backend`] when the backend fails.
    fn append_events<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        events: Vec<EventPayload>,
        expected_version: AggregateVersion,
        meta: &'a AppendMeta,
    ) -> impl Future<Output = Result<Committed, AppendError<Self::Error>>> + Send + 'a;

    /// Read an aggregate's committed events with version ≥ `from_version`,
    /// in version order.
    ///
    /// An aggregate with no events yields an empty vec, not an error.
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when the read fails.
    fn read_events<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        from_version: AggregateVersion,
    ) -> impl Future<Output = Result<Vec<Arc<ResolvedEvent>>, Self::Error>> + Send + 'a;

    /// The aggregate's current version ([`AggregateVersion::INITIAL`] when it
    /// has no events).
    ///
    /// # Errors
    ///
    /// Returns a backend-specific error when the lookup fails.
    fn current_version<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
    ) -> impl Future<Output = Result<AggregateVersion, Self::Error>> + Send + 'a;
}

/// An event log that can push newly committed events to live subscribers.
pub trait SubscribableLog: EventLog {
    /// Subscribe to committed events matching `filter`.
    ///
    /// The stream first delivers every already-committed matching event
    /// selected by `from` (catch-up), then transitions to live delivery with
    /// no gap and no duplicate at the boundary: the subscriber is registered
    /// inside the same critical section that seals the catch-up snapshot.
    ///
    /// Dropping the stream unsubscribes; the fan-out slot is reclaimed on the
    /// next append.
    fn subscribe(&self, filter: SubscriptionFilter, from: SubscribeFrom) -> EventStream<'_, Self>
    where
        Self: Sized;
}
