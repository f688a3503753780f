//! Event-sourcing core: an append-only, per-aggregate event log with
//! optimistic concurrency, pure fold-based aggregate reconstruction, and a
//! live snapshot projector.
//!
//! - [`event`] - Identity, ordering, and the static event type registry
//!   ([`EventSet`])
//! - [`aggregate`] - The validate-then-apply command path and the
//!   unconditional replay path ([`Aggregate`], [`AggregateState`])
//! - [`store`] - The [`EventLog`] contract and the in-memory reference
//!   backend ([`store::inmemory`])
//! - [`repository`] - Load (snapshot + replay) and persist (append +
//!   refresh) orchestration ([`Repository`])
//! - [`projector`] - The background task maintaining a live
//!   [`SnapshotCache`]
//!
//! # Example
//!
//! ```
//! use foldstream::{Repository, store::inmemory};
//! # use foldstream::{AggregateState, DomainEvent, EventDecodeError, EventPayload, EventSet};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Clone, Debug, Serialize, Deserialize)]
//! # struct ValueAdded { amount: i64 }
//! # impl DomainEvent for ValueAdded { const KIND: &'static str = "value-added"; }
//! # #[derive(Clone, Debug)]
//! # enum CounterEvent { Added(ValueAdded) }
//! # impl EventSet for CounterEvent {
//! #     const KINDS: &'static [&'static str] = &[ValueAdded::KIND];
//! #     fn kind(&self) -> &'static str { ValueAdded::KIND }
//! #     fn encode(&self) -> Result<EventPayload, serde_json::Error> {
//! #         let Self::Added(e) = self;
//! #         Ok(EventPayload { kind: ValueAdded::KIND.to_string(), data: serde_json::to_value(e)? })
//! #     }
//! #     fn decode(payload: &EventPayload) -> Result<Self, EventDecodeError> {
//! #         serde_json::from_value(payload.data.clone()).map(Self::Added).map_err(EventDecodeError::Data)
//! #     }
//! # }
//! # #[derive(Clone, Debug, Default)]
//! # struct Counter { value: i64 }
//! # impl AggregateState for Counter {
//! #     const CATEGORY: &'static str = "counter";
//! #     type Event = CounterEvent;
//! #     fn apply(&mut self, event: &Self::Event) {
//! #         let CounterEvent::Added(e) = event;
//! #         self.value += e.amount;
//! #     }
//! # }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log = inmemory::Log::new();
//! let repository: Repository<_, Counter> = Repository::new(log);
//!
//! let mut counter = repository.get_by_id("c1").await.unwrap();
//! counter
//!     .add_event(CounterEvent::Added(ValueAdded { amount: 2 }))
//!     .unwrap();
//! repository.save(&mut counter, &Default::default()).await.unwrap();
//! assert_eq!(counter.version().0, 1);
//! # }
//! ```

pub mod aggregate;
pub mod event;
pub mod projector;
pub mod repository;
pub mod store;

pub use crate::{
    aggregate::{Aggregate, AggregateState, Validation, ValidationError},
    event::{
        AggregateId, AggregateVersion, AppendMeta, DomainEvent, EventDecodeError, EventPayload,
        EventSet, ResolvedEvent, StreamPosition, SubscribeFrom,
    },
    projector::{ProjectorHandle, SnapshotCache, SnapshotProjector},
    repository::{LoadError, Repository, SaveError},
    store::{
        AppendError, Committed, ConcurrencyConflict, EventLog, EventStream, SubscribableLog,
        SubscriptionFilter,
    },
};
