//! Command-side domain primitives.
//!
//! An [`Aggregate`] pairs an identity with state folded from committed events
//! and a buffer of events awaiting commit. New events go through the state's
//! validation policy ([`AggregateState::validate`]); replay bypasses
//! validation entirely, so history that was accepted once always folds.

use thiserror::Error;

use crate::event::{
    AggregateId, AggregateVersion, EventDecodeError, EventSet, ResolvedEvent,
};

/// Outcome of validating a new event against the current state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Apply the event and buffer it for commit.
    Fire,
    /// Accept the call but change nothing.
    ///
    /// Callers cannot distinguish a skipped event from one that fired without
    /// inspecting [`Aggregate::uncommitted`] before and after.
    Skip,
    /// Reject the event; the aggregate is left untouched.
    Fail(String),
}

/// Error raised when a state's validation policy rejects an event.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("event rejected by validation policy: {reason}")]
pub struct ValidationError {
    /// The reason given by the validation policy.
    pub reason: String,
}

/// State folded from an aggregate's committed events.
///
/// The category name is an explicit per-type descriptor: it names the stream
/// namespace shared by every aggregate of this kind, and combines with an
/// entity id via [`AggregateState::aggregate_id`].
pub trait AggregateState: Default + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Category grouping all aggregates of this type. Lowercase kebab-case by
    /// convention: `"counter"`, `"user-account"`.
    const CATEGORY: &'static str;

    /// The closed set of events this state folds.
    type Event: EventSet + Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Fold one event into the state.
    fn apply(&mut self, event: &Self::Event);

    /// Business-rule gate for *new* events. Replay never consults this.
    ///
    /// The default policy always fires.
    fn validate(&self, _event: &Self::Event) -> Validation {
        Validation::Fire
    }

    /// Build the [`AggregateId`] for an entity of this type.
    #[must_use]
    fn aggregate_id(id: impl Into<String>) -> AggregateId {
        AggregateId::new(Self::CATEGORY, id)
    }
}

/// One aggregate instance: identity, committed version, folded state, and
/// events pending commit.
#[derive(Clone, Debug)]
pub struct Aggregate<S: AggregateState> {
    id: AggregateId,
    version: AggregateVersion,
    state: S,
    uncommitted: Vec<S::Event>,
}

impl<S: AggregateState> Aggregate<S> {
    /// Create a zero-state aggregate at version 0 with no uncommitted events.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: AggregateVersion::INITIAL,
            state: S::default(),
            uncommitted: Vec::new(),
        }
    }

    /// This aggregate's identity.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Version of the last committed event folded into [`Self::state`].
    #[must_use]
    pub const fn version(&self) -> AggregateVersion {
        self.version
    }

    /// The current folded state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Events applied to the state but not yet committed to the log, in
    /// application order.
    #[must_use]
    pub fn uncommitted(&self) -> &[S::Event] {
        &self.uncommitted
    }

    /// Add a new event via the state's validation policy.
    ///
    /// A `Fire` outcome applies the event and buffers it for commit; `Skip`
    /// returns `Ok` with no observable change; `Fail` returns a
    /// [`ValidationError`] and leaves the aggregate untouched. The committed
    /// version never changes here; versions are assigned by the log on
    /// append.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the validation policy fails the
    /// event.
    pub fn add_event(&mut self, event: S::Event) -> Result<(), ValidationError> {
        match self.state.validate(&event) {
            Validation::Fire => {
                self.state.apply(&event);
                self.uncommitted.push(event);
                Ok(())
            }
            Validation::Skip => {
                tracing::trace!(aggregate_id = %self.id, "event skipped by validation policy");
                Ok(())
            }
            Validation::Fail(reason) => Err(ValidationError { reason }),
        }
    }

    /// Fold a committed event during replay.
    ///
    /// Unconditional: validation encodes business rules for new events, not
    /// for history that was already accepted. Sets the version to the event's
    /// resulting version.
    pub fn apply_resolved(&mut self, event: &S::Event, version: AggregateVersion) {
        self.state.apply(event);
        self.version = version;
    }

    /// Advance the committed version without folding an event.
    ///
    /// Used when replay skips an event of an unknown kind, so later events
    /// keep their correct versions.
    pub fn advance_to(&mut self, version: AggregateVersion) {
        self.version = version;
    }

    /// Decode and fold one resolved event from the log.
    ///
    /// Events of unknown kinds are logged and skipped, advancing the version
    /// only, so ordering of subsequent events survives.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError::Data`] when a recognized kind fails to
    /// deserialize; that indicates corrupt storage rather than a
    /// forward-compatibility gap.
    pub fn fold_resolved(&mut self, resolved: &ResolvedEvent) -> Result<(), EventDecodeError> {
        match S::Event::decode(&resolved.payload) {
            Ok(event) => {
                self.apply_resolved(&event, resolved.version);
                Ok(())
            }
            Err(EventDecodeError::UnknownKind { kind, .. }) => {
                tracing::warn!(
                    kind = %kind,
                    aggregate_id = %resolved.aggregate_id,
                    version = %resolved.version,
                    "skipping event of unknown kind during replay"
                );
                self.advance_to(resolved.version);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Clear the uncommitted buffer and adopt the version assigned by the
    /// log. Called by the repository after a successful append.
    pub(crate) fn mark_committed(&mut self, version: AggregateVersion) {
        self.version = version;
        self.uncommitted.clear();
    }
}

impl<S> PartialEq for Aggregate<S>
where
    S: AggregateState + PartialEq,
    S::Event: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.state == other.state
            && self.uncommitted == other.uncommitted
    }
}

impl<S> Eq for Aggregate<S>
where
    S: AggregateState + Eq,
    S::Event: Eq,
{
}
