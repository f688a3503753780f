//! Live snapshot projection.
//!
//! [`SnapshotProjector`] is a long-running task, one per aggregate state
//! type, that subscribes to its category's event feed and folds every
//! delivered event into a [`SnapshotCache`]. The cache is purely a
//! read-through optimization: if the projector dies, lookups miss and the
//! repository falls back to full replay.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, RwLock},
};

use tokio::{sync::oneshot, task::JoinHandle};
use tokio_stream::StreamExt as _;

use crate::{
    aggregate::{Aggregate, AggregateState},
    event::{AggregateId, StreamPosition, SubscribeFrom},
    store::{SubscribableLog, SubscriptionFilter},
};

/// Cached, possibly stale, pre-folded aggregates for one state type.
///
/// Lookups never block on I/O. A cached version may lag the log but never
/// leads it: entries are only replaced by strictly newer versions, and every
/// write originates from data read out of the log.
pub struct SnapshotCache<S: AggregateState> {
    inner: Arc<RwLock<CacheInner<S>>>,
}

impl<S: AggregateState> Clone for SnapshotCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AggregateState> Default for SnapshotCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheInner<S: AggregateState> {
    entries: HashMap<AggregateId, CacheEntry<S>>,
    /// Highest log position the projector has folded through.
    cursor: StreamPosition,
}

struct CacheEntry<S: AggregateState> {
    aggregate: Aggregate<S>,
    /// Log position up to which this entry has been folded.
    position: StreamPosition,
}

impl<S: AggregateState> SnapshotCache<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                entries: HashMap::new(),
                cursor: StreamPosition::START,
            })),
        }
    }

    /// Look up the cached aggregate for an id, if present.
    ///
    /// Read-only and purely in-memory; absence just means the caller replays
    /// from scratch.
    #[must_use]
    pub fn try_get(&self, id: &AggregateId) -> Option<Aggregate<S>> {
        self.inner
            .read()
            .expect("snapshot cache lock poisoned")
            .entries
            .get(id)
            .map(|entry| entry.aggregate.clone())
    }

    /// The projector's recorded cursor: the position through which the feed
    /// has been folded. A restarted projector resumes just past it.
    #[must_use]
    pub fn last_position(&self) -> StreamPosition {
        self.inner
            .read()
            .expect("snapshot cache lock poisoned")
            .cursor
    }

    /// Number of cached aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("snapshot cache lock poisoned")
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a freshly loaded aggregate as a refresh.
    ///
    /// Only strictly newer versions replace an existing entry, which keeps
    /// the repository's refresh path and the projector convergent no matter
    /// how their writes interleave. Aggregates carrying uncommitted events
    /// are declined outright.
    pub fn offer(&self, aggregate: Aggregate<S>, position: StreamPosition) {
        if !aggregate.uncommitted().is_empty() {
            return;
        }
        let mut inner = self.inner.write().expect("snapshot cache lock poisoned");
        Self::store_entry(&mut inner.entries, aggregate, position);
    }

    /// Projector-only write: refresh the entry and advance the cursor.
    fn record(&self, aggregate: Aggregate<S>, position: StreamPosition) {
        let mut inner = self.inner.write().expect("snapshot cache lock poisoned");
        Self::store_entry(&mut inner.entries, aggregate, position);
        if position > inner.cursor {
            inner.cursor = position;
        }
    }

    /// Projector-only write: advance the cursor past an event that was
    /// already folded via [`Self::offer`].
    fn advance_cursor(&self, position: StreamPosition) {
        let mut inner = self.inner.write().expect("snapshot cache lock poisoned");
        if position > inner.cursor {
            inner.cursor = position;
        }
    }

    fn store_entry(
        entries: &mut HashMap<AggregateId, CacheEntry<S>>,
        aggregate: Aggregate<S>,
        position: StreamPosition,
    ) {
        match entries.entry(aggregate.id().clone()) {
            Entry::Occupied(mut occupied) => {
                if aggregate.version() > occupied.get().aggregate.version() {
                    occupied.insert(CacheEntry {
                        aggregate,
                        position,
                    });
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    aggregate,
                    position,
                });
            }
        }
    }
}

/// Handle to a running [`SnapshotProjector`] task.
///
/// Dropping the handle does **not** stop the projector; call
/// [`stop()`](Self::stop) for graceful shutdown.
pub struct ProjectorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProjectorHandle {
    /// Stop the projector gracefully and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await
            && err.is_panic()
        {
            tracing::error!("snapshot projector task panicked");
        }
    }

    /// Whether the projector task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Background task that keeps a [`SnapshotCache`] current for one aggregate
/// state type.
pub struct SnapshotProjector<L, S: AggregateState> {
    log: L,
    cache: SnapshotCache<S>,
}

impl<L, S> SnapshotProjector<L, S>
where
    L: SubscribableLog + Send + Sync + 'static,
    S: AggregateState,
{
    /// Create a projector with a fresh, empty cache.
    #[must_use]
    pub fn new(log: L) -> Self {
        Self {
            log,
            cache: SnapshotCache::new(),
        }
    }

    /// Create a projector over an existing cache.
    ///
    /// The subscription resumes just past the cache's recorded cursor, so a
    /// restarted projector relies on the log's catch-up guarantee instead of
    /// refolding everything.
    #[must_use]
    pub fn with_cache(log: L, cache: SnapshotCache<S>) -> Self {
        Self { log, cache }
    }

    /// A handle to the cache this projector maintains, for attaching to a
    /// [`Repository`](crate::repository::Repository).
    #[must_use]
    pub fn cache(&self) -> SnapshotCache<S> {
        self.cache.clone()
    }

    /// Spawn the projection task.
    ///
    /// The task subscribes to the state type's category starting just past
    /// the cache cursor, folds each delivered event into the cache, and
    /// advances the cursor. Subscription termination is fatal to the
    /// projector only: the cache goes stale and lookups eventually miss.
    pub fn spawn(self) -> ProjectorHandle {
        let Self { log, cache } = self;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let from = SubscribeFrom::Position(cache.last_position().next());
            let mut stream =
                log.subscribe(SubscriptionFilter::Category(S::CATEGORY.to_string()), from);
            tracing::debug!(category = S::CATEGORY, ?from, "snapshot projector started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => {
                        tracing::debug!(category = S::CATEGORY, "snapshot projector stopped");
                        break;
                    }
                    next = stream.next() => {
                        let Some(result) = next else {
                            tracing::debug!(
                                category = S::CATEGORY,
                                "snapshot projector subscription ended"
                            );
                            break;
                        };
                        let resolved = match result {
                            Ok(resolved) => resolved,
                            Err(err) => {
                                tracing::error!(
                                    category = S::CATEGORY,
                                    error = %err,
                                    "snapshot projector subscription failed"
                                );
                                break;
                            }
                        };

                        let mut aggregate = cache
                            .try_get(&resolved.aggregate_id)
                            .unwrap_or_else(|| Aggregate::new(resolved.aggregate_id.clone()));

                        if resolved.version <= aggregate.version() {
                            // Already folded in via a repository refresh.
                            cache.advance_cursor(resolved.position);
                            continue;
                        }

                        match aggregate.fold_resolved(&resolved) {
                            Ok(()) => cache.record(aggregate, resolved.position),
                            Err(err) => {
                                tracing::error!(
                                    category = S::CATEGORY,
                                    aggregate_id = %resolved.aggregate_id,
                                    error = %err,
                                    "snapshot projector failed to decode event"
                                );
                                break;
                            }
                        }
                    }
                }
            }
        });

        ProjectorHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}
