//! In-memory event log, the crate's reference [`EventLog`] backend.
//!
//! Suitable for tests, examples, and single-process deployments. One global
//! write lock is the append critical section required by the [`EventLog`]
//! contract: version check, version/position assignment, publication, and
//! fan-out to live subscribers all happen under it, so readers and
//! subscribers never observe a partial append.
//!
//! # Example
//!
//! ```
//! use foldstream::store::inmemory;
//!
//! let log = inmemory::Log::new();
//! ```

use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    pin::Pin,
    sync::{Arc, RwLock},
    task::{Context, Poll},
};

use chrono::Utc;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::{
    event::{
        AggregateId, AggregateVersion, AppendMeta, EventPayload, ResolvedEvent, StreamPosition,
        SubscribeFrom,
    },
    store::{
        AppendError, Committed, ConcurrencyConflict, EventLog, EventStream, SubscribableLog,
        SubscriptionFilter,
    },
};

/// In-memory event log with live fan-out.
///
/// `Clone` is cheap and clones share the same log.
#[derive(Clone)]
pub struct Log {
    inner: Arc<RwLock<Inner>>,
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    /// Every committed event, in global position order.
    events: Vec<Arc<ResolvedEvent>>,
    /// Current version per aggregate.
    versions: HashMap<AggregateId, AggregateVersion>,
    /// Position assigned to the next committed event; positions start at 1.
    next_position: u64,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    filter: SubscriptionFilter,
    tx: mpsc::UnboundedSender<Arc<ResolvedEvent>>,
}

impl Log {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                events: Vec::new(),
                versions: HashMap::new(),
                next_position: 1,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Global position of the most recently committed event
    /// ([`StreamPosition::START`] when the log is empty).
    #[must_use]
    pub fn head_position(&self) -> StreamPosition {
        let inner = self.inner.read().expect("in-memory log lock poisoned");
        StreamPosition(inner.next_position - 1)
    }
}

impl EventLog for Log {
    type Error = Infallible;

    #[tracing::instrument(
        skip(self, aggregate_id, events, meta),
        fields(aggregate_id = %aggregate_id, event_count = events.len())
    )]
    fn append_events<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        events: Vec<EventPayload>,
        expected_version: AggregateVersion,
        meta: &'a AppendMeta,
    ) -> impl Future<Output = Result<Committed, AppendError<Self::Error>>> + Send + 'a {
        let result = (|| {
            let mut inner = self.inner.write().expect("in-memory log lock poisoned");

            let current = inner
                .versions
                .get(aggregate_id)
                .copied()
                .unwrap_or(AggregateVersion::INITIAL);
            if current != expected_version {
                tracing::debug!(
                    expected = %expected_version,
                    actual = %current,
                    "version mismatch, rejecting append"
                );
                return Err(ConcurrencyConflict {
                    expected: expected_version,
                    actual: current,
                }
                .into());
            }

            if events.is_empty() {
                // No-op append: the version check above is the whole point.
                return Ok(Committed {
                    version: current,
                    position: StreamPosition(inner.next_position - 1),
                });
            }

            let mut version = current;
            let mut committed = Vec::with_capacity(events.len());
            for payload in events {
                version = version.next();
                let position = StreamPosition(inner.next_position);
                inner.next_position += 1;
                committed.push(Arc::new(ResolvedEvent {
                    aggregate_id: aggregate_id.clone(),
                    version,
                    position,
                    timestamp: Utc::now(),
                    payload,
                    correlation_id: meta.correlation_id,
                    causation_id: meta.causation_id,
                }));
            }

            inner.versions.insert(aggregate_id.clone(), version);
            inner.events.extend(committed.iter().cloned());

            // Fan out in commit order; subscribers whose receiver is gone are
            // pruned here.
            for event in &committed {
                inner.subscribers.retain(|sub| {
                    if sub.filter.matches(event) {
                        sub.tx.send(Arc::clone(event)).is_ok()
                    } else {
                        !sub.tx.is_closed()
                    }
                });
            }

            let head = StreamPosition(inner.next_position - 1);
            drop(inner);
            tracing::debug!(new_version = %version, "events committed");
            Ok(Committed {
                version,
                position: head,
            })
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, aggregate_id), fields(aggregate_id = %aggregate_id))]
    fn read_events<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        from_version: AggregateVersion,
    ) -> impl Future<Output = Result<Vec<Arc<ResolvedEvent>>, Self::Error>> + Send + 'a {
        let inner = self.inner.read().expect("in-memory log lock poisoned");
        let events: Vec<Arc<ResolvedEvent>> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == *aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        drop(inner);
        tracing::trace!(events_read = events.len(), "read aggregate events");
        std::future::ready(Ok(events))
    }

    fn current_version<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
    ) -> impl Future<Output = Result<AggregateVersion, Self::Error>> + Send + 'a {
        let inner = self.inner.read().expect("in-memory log lock poisoned");
        let version = inner
            .versions
            .get(aggregate_id)
            .copied()
            .unwrap_or(AggregateVersion::INITIAL);
        drop(inner);
        std::future::ready(Ok(version))
    }
}

impl SubscribableLog for Log {
    fn subscribe(&self, filter: SubscriptionFilter, from: SubscribeFrom) -> EventStream<'_, Self> {
        // The write lock makes catch-up snapshot and live registration one
        // step: every event is either in the backlog or will arrive on the
        // channel, never both, never neither.
        let mut inner = self.inner.write().expect("in-memory log lock poisoned");

        let backlog: VecDeque<Arc<ResolvedEvent>> = match from {
            SubscribeFrom::End => VecDeque::new(),
            SubscribeFrom::Start => inner
                .events
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            SubscribeFrom::Position(position) => inner
                .events
                .iter()
                .filter(|e| e.position >= position && filter.matches(e))
                .cloned()
                .collect(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber { filter, tx });
        drop(inner);

        Box::pin(Subscription { backlog, rx })
    }
}

/// One subscriber's view of the log: buffered catch-up events followed by
/// live delivery.
struct Subscription {
    backlog: VecDeque<Arc<ResolvedEvent>>,
    rx: mpsc::UnboundedReceiver<Arc<ResolvedEvent>>,
}

impl Stream for Subscription {
    type Item = Result<Arc<ResolvedEvent>, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.backlog.pop_front() {
            return Poll::Ready(Some(Ok(event)));
        }
        self.rx.poll_recv(cx).map(|next| next.map(Ok))
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt as _;

    use super::*;

    fn payload(kind: &str, value: i64) -> EventPayload {
        EventPayload {
            kind: kind.to_string(),
            data: serde_json::json!({ "value": value }),
        }
    }

    fn counter(id: &str) -> AggregateId {
        AggregateId::new("counter", id)
    }

    #[tokio::test]
    async fn default_log_starts_positions_at_one() {
        let log = Log::default();
        assert_eq!(log.head_position(), StreamPosition::START);

        let committed = log
            .append_events(
                &counter("c1"),
                vec![payload("v", 1)],
                AggregateVersion::INITIAL,
                &AppendMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(committed.position, StreamPosition(1));
        assert_eq!(log.head_position(), StreamPosition(1));
    }

    #[tokio::test]
    async fn append_assigns_sequential_versions_and_positions() {
        let log = Log::new();
        let id = counter("c1");

        let committed = log
            .append_events(
                &id,
                vec![payload("v", 1), payload("v", 2), payload("v", 3)],
                AggregateVersion::INITIAL,
                &AppendMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(committed.version, AggregateVersion(3));
        assert_eq!(committed.position, StreamPosition(3));

        let events = log.read_events(&id, AggregateVersion(1)).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version.0).collect();
        let positions: Vec<u64> = events.iter().map(|e| e.position.0).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn positions_are_global_across_aggregates() {
        let log = Log::new();
        let meta = AppendMeta::default();

        log.append_events(&counter("a"), vec![payload("v", 1)], AggregateVersion(0), &meta)
            .await
            .unwrap();
        log.append_events(&counter("b"), vec![payload("v", 2)], AggregateVersion(0), &meta)
            .await
            .unwrap();
        let committed = log
            .append_events(&counter("a"), vec![payload("v", 3)], AggregateVersion(1), &meta)
            .await
            .unwrap();

        assert_eq!(committed.version, AggregateVersion(2));
        assert_eq!(committed.position, StreamPosition(3));

        let events = log
            .read_events(&counter("a"), AggregateVersion(1))
            .await
            .unwrap();
        let positions: Vec<u64> = events.iter().map(|e| e.position.0).collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_and_leaves_log_unchanged() {
        let log = Log::new();
        let id = counter("c1");
        let meta = AppendMeta::default();

        log.append_events(
            &id,
            vec![payload("v", 1), payload("v", 2), payload("v", 3)],
            AggregateVersion(0),
            &meta,
        )
        .await
        .unwrap();

        let err = log
            .append_events(&id, vec![payload("v", 4)], AggregateVersion(0), &meta)
            .await
            .unwrap_err();
        match err {
            AppendError::Conflict(conflict) => {
                assert_eq!(conflict.expected, AggregateVersion(0));
                assert_eq!(conflict.actual, AggregateVersion(3));
            }
        }

        assert_eq!(
            log.current_version(&id).await.unwrap(),
            AggregateVersion(3)
        );
        assert_eq!(log.head_position(), StreamPosition(3));
        let events = log.read_events(&id, AggregateVersion(1)).await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn empty_append_confirms_version_without_committing() {
        let log = Log::new();
        let id = counter("c1");
        let meta = AppendMeta::default();

        log.append_events(&id, vec![payload("v", 1)], AggregateVersion(0), &meta)
            .await
            .unwrap();

        let committed = log
            .append_events(&id, Vec::new(), AggregateVersion(1), &meta)
            .await
            .unwrap();
        assert_eq!(committed.version, AggregateVersion(1));
        assert_eq!(log.head_position(), StreamPosition(1));

        // The version check still guards the no-op.
        let err = log
            .append_events(&id, Vec::new(), AggregateVersion(0), &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::Conflict(_)));
    }

    #[tokio::test]
    async fn read_unknown_aggregate_is_empty_not_an_error() {
        let log = Log::new();
        let events = log
            .read_events(&counter("ghost"), AggregateVersion(1))
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(
            log.current_version(&counter("ghost")).await.unwrap(),
            AggregateVersion::INITIAL
        );
    }

    #[tokio::test]
    async fn read_from_version_skips_earlier_events() {
        let log = Log::new();
        let id = counter("c1");

        log.append_events(
            &id,
            vec![payload("v", 1), payload("v", 2), payload("v", 3)],
            AggregateVersion(0),
            &AppendMeta::default(),
        )
        .await
        .unwrap();

        let events = log.read_events(&id, AggregateVersion(3)).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version.0).collect();
        assert_eq!(versions, vec![3]);
    }

    #[tokio::test]
    async fn racing_appends_on_the_same_expected_version_admit_exactly_one() {
        let log = Log::new();
        let id = counter("c1");

        let a = {
            let log = log.clone();
            let id = id.clone();
            tokio::spawn(async move {
                log.append_events(
                    &id,
                    vec![payload("v", 1)],
                    AggregateVersion(0),
                    &AppendMeta::default(),
                )
                .await
            })
        };
        let b = {
            let log = log.clone();
            let id = id.clone();
            tokio::spawn(async move {
                log.append_events(
                    &id,
                    vec![payload("v", 2)],
                    AggregateVersion(0),
                    &AppendMeta::default(),
                )
                .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AppendError::Conflict(_))))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(
            log.current_version(&id).await.unwrap(),
            AggregateVersion(1)
        );
    }

    #[tokio::test]
    async fn append_meta_is_stamped_onto_every_event() {
        let log = Log::new();
        let id = counter("c1");
        let correlation = uuid::Uuid::new_v4();
        let causation = uuid::Uuid::new_v4();

        log.append_events(
            &id,
            vec![payload("v", 1), payload("v", 2)],
            AggregateVersion(0),
            &AppendMeta {
                correlation_id: Some(correlation),
                causation_id: Some(causation),
            },
        )
        .await
        .unwrap();

        let events = log.read_events(&id, AggregateVersion(1)).await.unwrap();
        for event in &events {
            assert_eq!(event.correlation_id, Some(correlation));
            assert_eq!(event.causation_id, Some(causation));
        }
    }

    #[tokio::test]
    async fn subscribe_from_end_sees_only_later_appends() {
        let log = Log::new();
        let meta = AppendMeta::default();

        log.append_events(&counter("c1"), vec![payload("v", 1)], AggregateVersion(0), &meta)
            .await
            .unwrap();

        let mut stream = log.subscribe(
            SubscriptionFilter::Category("counter".to_string()),
            SubscribeFrom::End,
        );

        log.append_events(&counter("c1"), vec![payload("v", 2)], AggregateVersion(1), &meta)
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.position, StreamPosition(2));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_append() {
        let log = Log::new();
        let meta = AppendMeta::default();

        let stream = log.subscribe(
            SubscriptionFilter::Category("counter".to_string()),
            SubscribeFrom::Start,
        );
        drop(stream);

        log.append_events(&counter("c1"), vec![payload("v", 1)], AggregateVersion(0), &meta)
            .await
            .unwrap();

        let inner = log.inner.read().unwrap();
        assert!(inner.subscribers.is_empty());
    }
}
