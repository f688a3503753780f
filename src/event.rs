//! Event identity, ordering primitives, and the static event type registry.
//!
//! Events cross the log boundary as [`EventPayload`] (kind discriminator plus
//! serialized data) and come back enriched as [`ResolvedEvent`]. The
//! [`EventSet`] trait is the statically-built registry that maps kind strings
//! to decode functions; each domain implements it on its event enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Globally monotonic position of an event within the log.
///
/// Positions are assigned by the event log in commit order and are strictly
/// increasing across the whole log, regardless of which aggregate an event
/// belongs to. Position `0` ([`StreamPosition::START`]) is a sentinel meaning
/// "before the first event"; real events start at position 1.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamPosition(pub u64);

impl StreamPosition {
    /// Sentinel position preceding every event in the log.
    pub const START: Self = Self(0);

    /// The position immediately following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a subscription should begin delivering events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeFrom {
    /// Deliver every committed event, then go live.
    Start,
    /// Deliver committed events with position greater than or equal to the
    /// given position, then go live.
    Position(StreamPosition),
    /// Skip history entirely; deliver only events committed after the
    /// subscription is registered.
    End,
}

/// Per-aggregate sequence number of committed events.
///
/// Starts at 0 for an aggregate with no events and increases by exactly 1 for
/// each committed event, with no gaps.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AggregateVersion(pub u64);

impl AggregateVersion {
    /// The version of an aggregate with no committed events.
    pub const INITIAL: Self = Self(0);

    /// The version assigned to the next committed event.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for AggregateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one aggregate instance: an opaque entity id plus the category
/// grouping all aggregates of its kind.
///
/// The `Display` form (`category-id`) is stable and suitable as a storage key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId {
    category: String,
    id: String,
}

impl AggregateId {
    /// Create an aggregate id from a category name and an entity id.
    #[must_use]
    pub fn new(category: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            id: id.into(),
        }
    }

    /// The category grouping all aggregates of this kind.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The entity id within the category.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.category, self.id)
    }
}

/// Serialized event data ready to be written to the log.
///
/// This is the boundary between domain events and storage: the repository
/// encodes events to this form via [`EventSet::encode`], and the event log
/// adds identity, version, and position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Kind discriminator used to route the data back to a concrete type.
    pub kind: String,
    /// Serialized event data.
    pub data: serde_json::Value,
}

/// Observability identifiers threaded through an append.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppendMeta {
    /// Groups events belonging to the same business process.
    pub correlation_id: Option<Uuid>,
    /// The event that caused this append, if any.
    pub causation_id: Option<Uuid>,
}

/// An event as committed to the log, enriched with identity and ordering.
///
/// Resolved events are produced only by the event log; callers never construct
/// them directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedEvent {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// The aggregate version resulting from this event.
    pub version: AggregateVersion,
    /// Global position of this event within the log.
    pub position: StreamPosition,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// The serialized event.
    pub payload: EventPayload,
    /// Correlation id supplied at append time.
    pub correlation_id: Option<Uuid>,
    /// Causation id supplied at append time.
    pub causation_id: Option<Uuid>,
}

/// Error returned when decoding a stored event fails.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The event kind was not recognized by the event set.
    ///
    /// Replay treats this as a skippable condition so that consumers stay
    /// forward-compatible with event kinds introduced after they were built.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        /// The unrecognized kind string.
        kind: String,
        /// The kinds this event set can decode.
        expected: &'static [&'static str],
    },
    /// The event data failed to deserialize.
    #[error("failed to decode event data: {0}")]
    Data(#[source] serde_json::Error),
}

impl EventDecodeError {
    /// Whether this error marks an event that replay should skip.
    #[must_use]
    pub const fn is_unknown_kind(&self) -> bool {
        matches!(self, Self::UnknownKind { .. })
    }
}

/// Marker trait for concrete domain events.
///
/// Each event carries a unique [`Self::KIND`] so stored bytes can be routed
/// back to the correct type during replay.
pub trait DomainEvent {
    /// Kind discriminator stored alongside the event data.
    const KIND: &'static str;
}

/// A closed set of event types sharing one aggregate category.
///
/// Implemented by a domain's event enum, this is an explicit, statically-built
/// registry from kind discriminators to decode functions. Unknown kinds are
/// reported as [`EventDecodeError::UnknownKind`] rather than aborting replay.
///
/// ```
/// use foldstream::{DomainEvent, EventDecodeError, EventPayload, EventSet};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct ValueAdded {
///     amount: i64,
/// }
///
/// impl DomainEvent for ValueAdded {
///     const KIND: &'static str = "value-added";
/// }
///
/// #[derive(Clone, Debug)]
/// enum CounterEvent {
///     Added(ValueAdded),
/// }
///
/// impl EventSet for CounterEvent {
///     const KINDS: &'static [&'static str] = &[ValueAdded::KIND];
///
///     fn kind(&self) -> &'static str {
///         match self {
///             Self::Added(_) => ValueAdded::KIND,
///         }
///     }
///
///     fn encode(&self) -> Result<EventPayload, serde_json::Error> {
///         let data = match self {
///             Self::Added(e) => serde_json::to_value(e)?,
///         };
///         Ok(EventPayload {
///             kind: self.kind().to_string(),
///             data,
///         })
///     }
///
///     fn decode(payload: &EventPayload) -> Result<Self, EventDecodeError> {
///         match payload.kind.as_str() {
///             ValueAdded::KIND => serde_json::from_value(payload.data.clone())
///                 .map(Self::Added)
///                 .map_err(EventDecodeError::Data),
///             other => Err(EventDecodeError::UnknownKind {
///                 kind: other.to_string(),
///                 expected: Self::KINDS,
///             }),
///         }
///     }
/// }
/// ```
pub trait EventSet: Sized {
    /// The kinds this set can decode.
    const KINDS: &'static [&'static str];

    /// The kind discriminator of this event instance.
    fn kind(&self) -> &'static str;

    /// Serialize this event to its storable form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if serialization fails.
    fn encode(&self) -> Result<EventPayload, serde_json::Error>;

    /// Deserialize an event from its storable form.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::UnknownKind`] for kinds outside
    /// [`Self::KINDS`], or [`EventDecodeError::Data`] if deserialization
    /// fails.
    fn decode(payload: &EventPayload) -> Result<Self, EventDecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_display_is_category_dash_id() {
        let id = AggregateId::new("counter", "c1");
        assert_eq!(id.to_string(), "counter-c1");
        assert_eq!(id.category(), "counter");
        assert_eq!(id.id(), "c1");
    }

    #[test]
    fn start_sentinel_precedes_first_position() {
        assert!(StreamPosition::START < StreamPosition::START.next());
        assert_eq!(StreamPosition::START.next(), StreamPosition(1));
    }

    #[test]
    fn initial_version_increments_by_one() {
        let v = AggregateVersion::INITIAL;
        assert_eq!(v.next(), AggregateVersion(1));
        assert_eq!(v.next().next(), AggregateVersion(2));
    }

    #[test]
    fn unknown_kind_error_is_skippable() {
        let err = EventDecodeError::UnknownKind {
            kind: "mystery".to_string(),
            expected: &["value-added"],
        };
        assert!(err.is_unknown_kind());
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn data_error_is_not_skippable() {
        let err: serde_json::Error =
            serde_json::from_str::<i32>("not a number").expect_err("must fail");
        assert!(!EventDecodeError::Data(err).is_unknown_kind());
    }
}
