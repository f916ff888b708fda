use std::sync::Arc;
use std::time::Duration;

use nostr::{Event, Filter};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{DEFAULT_PUBLISH_TIMEOUT, DEFAULT_QUERY_TIMEOUT, FEED_BUFFER, MAX_CONCURRENT_QUERIES};
use crate::relay::endpoint::{RelayLiveness, RelaySet};
use crate::relay::transport::{PublishOutcome, PublishStatus, RelayUnit};

/// One message from a long-lived subscription's merged stream.
#[derive(Debug)]
pub enum SubscriptionUpdate {
    Event(Box<Event>),
    /// Fired exactly once, after every relay in the set has finished its
    /// stored-data replay. Later pushes arrive as `Event`s.
    EndOfStoredEvents,
}

/// Handle for a long-lived subscription. Dropping it (or calling
/// [`SubscriptionHandle::close`]) tears down the per-relay feeds.
pub struct SubscriptionHandle {
    id: String,
    updates: mpsc::Receiver<SubscriptionUpdate>,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next update, in arbitrary cross-relay order. `None` once every
    /// relay feed has ended and the handle is drained.
    pub async fn recv(&mut self) -> Option<SubscriptionUpdate> {
        self.updates.recv().await
    }

    pub fn close(self) {
        // Drop does the work
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Fans queries, subscriptions and publishes out across a [`RelaySet`] and
/// merges the per-relay results.
///
/// One-shot queries (`get`, `get_many`) are gated by a counting semaphore so
/// pagination bursts cannot open unbounded subscriptions; `subscribe` and
/// `publish` are not gated. An empty relay set makes every operation resolve
/// immediately with its empty value.
pub struct RelayExecutor {
    relays: RelaySet,
    limiter: Arc<Semaphore>,
}

impl RelayExecutor {
    pub fn new(relays: RelaySet) -> Self {
        Self {
            relays,
            limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_QUERIES)),
        }
    }

    pub fn relays(&self) -> &RelaySet {
        &self.relays
    }

    /// Fetch a single event matching `filter`.
    ///
    /// Resolves with the first match any relay delivers, or `None` once
    /// every relay finished its replay empty-handed or `timeout` elapsed.
    /// Timing out is not an error.
    pub async fn get(&self, filter: Filter, timeout: Option<Duration>) -> Option<Event> {
        if self.relays.is_empty() {
            warn!("get: relay set is empty, skipping network");
            return None;
        }
        let Ok(_permit) = self.limiter.clone().acquire_owned().await else {
            return None;
        };

        let timeout = timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT);
        let filter = filter.limit(1);
        if let Ok(json) = serde_json::to_string(&filter) {
            debug!(filter = %json, relays = self.relays.len(), "get: querying relay set");
        }
        let (tx, mut rx) = mpsc::channel(FEED_BUFFER);
        let tasks = self.spawn_pumps(vec![filter], tx, true);

        let deadline = Instant::now() + timeout;
        let result = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(RelayUnit::Event(event))) => break Some(*event),
                Ok(Some(RelayUnit::EndOfStoredEvents)) => continue,
                // All relays replayed without a match, or the clock ran out
                Ok(None) => break None,
                Err(_) => break None,
            }
        };
        abort_all(&tasks);
        result
    }

    /// Fetch every stored event matching `filter` across the whole set.
    ///
    /// Opens an ephemeral subscription per relay and accumulates pushes
    /// until every relay signaled replay-complete or `timeout` elapsed.
    /// The returned batch is unsorted and may contain the same event id
    /// more than once; callers dedup at merge time.
    pub async fn get_many(&self, filter: Filter, timeout: Option<Duration>) -> Vec<Event> {
        if self.relays.is_empty() {
            warn!("get_many: relay set is empty, skipping network");
            return Vec::new();
        }
        let Ok(_permit) = self.limiter.clone().acquire_owned().await else {
            return Vec::new();
        };

        let timeout = timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT);
        if let Ok(json) = serde_json::to_string(&filter) {
            debug!(filter = %json, relays = self.relays.len(), "get_many: querying relay set");
        }
        let (tx, mut rx) = mpsc::channel(FEED_BUFFER);
        let tasks = self.spawn_pumps(vec![filter], tx, true);

        let mut pending = self.relays.len();
        let mut batch = Vec::new();
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(RelayUnit::Event(event))) => batch.push(*event),
                Ok(Some(RelayUnit::EndOfStoredEvents)) => {
                    pending -= 1;
                    if pending == 0 {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(collected = batch.len(), "get_many: timed out, returning partial batch");
                    break;
                }
            }
        }
        abort_all(&tasks);
        batch
    }

    /// Open a long-lived subscription across the whole set.
    ///
    /// Events arrive in arbitrary cross-relay order and the same id may be
    /// delivered by more than one relay. A single
    /// [`SubscriptionUpdate::EndOfStoredEvents`] is emitted after the first
    /// full replay-completion round; it is never re-emitted.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> SubscriptionHandle {
        let id = Uuid::new_v4().to_string();
        let (out_tx, out_rx) = mpsc::channel(FEED_BUFFER);

        if self.relays.is_empty() {
            warn!("subscribe: relay set is empty, returning inert handle");
            return SubscriptionHandle {
                id,
                updates: out_rx,
                tasks: Vec::new(),
            };
        }

        let (tx, mut rx) = mpsc::channel(FEED_BUFFER);
        let mut tasks = self.spawn_pumps(filters, tx, false);

        let mut pending = self.relays.len();
        let merge = tokio::spawn(async move {
            let mut eose_fired = false;
            while let Some(unit) = rx.recv().await {
                match unit {
                    RelayUnit::Event(event) => {
                        if out_tx.send(SubscriptionUpdate::Event(event)).await.is_err() {
                            break;
                        }
                    }
                    RelayUnit::EndOfStoredEvents => {
                        pending = pending.saturating_sub(1);
                        if pending == 0 && !eose_fired {
                            eose_fired = true;
                            if out_tx
                                .send(SubscriptionUpdate::EndOfStoredEvents)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            }
        });
        tasks.push(merge);

        SubscriptionHandle {
            id,
            updates: out_rx,
            tasks,
        }
    }

    /// Broadcast a signed event to every relay in the set.
    ///
    /// Best-effort and never atomic: each relay gets its own outcome and a
    /// bounded wait, so the caller sees partial success as-is.
    pub async fn publish(&self, event: &Event) -> Vec<PublishOutcome> {
        if self.relays.is_empty() {
            warn!("publish: relay set is empty, dropping event");
            return Vec::new();
        }

        let futures = self.relays.iter().map(|endpoint| {
            let endpoint = endpoint.clone();
            let event = event.clone();
            async move {
                endpoint.touch_used();
                let status = match tokio::time::timeout(
                    DEFAULT_PUBLISH_TIMEOUT,
                    endpoint.transport().publish(&event),
                )
                .await
                {
                    Ok(Ok(())) => PublishStatus::Accepted,
                    Ok(Err(e)) => PublishStatus::Rejected(e.to_string()),
                    Err(_) => PublishStatus::TimedOut,
                };
                PublishOutcome {
                    url: endpoint.url(),
                    status,
                }
            }
        });
        futures::future::join_all(futures).await
    }

    /// Spawn one feed pump per relay, all funneling into `tx`.
    ///
    /// Every pump sends exactly one `EndOfStoredEvents` marker: on the
    /// relay's replay-complete signal, or when its feed dies before one
    /// arrives (a relay that cannot answer is indistinguishable from one
    /// with no data). With `stop_at_eose` the pump ends at the marker,
    /// otherwise it keeps forwarding live pushes.
    fn spawn_pumps(
        &self,
        filters: Vec<Filter>,
        tx: mpsc::Sender<RelayUnit>,
        stop_at_eose: bool,
    ) -> Vec<JoinHandle<()>> {
        self.relays
            .iter()
            .map(|endpoint| {
                let endpoint = endpoint.clone();
                let filters = filters.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    endpoint.touch_used();
                    let mut feed = match endpoint.transport().open(filters).await {
                        Ok(feed) => feed,
                        Err(e) => {
                            debug!(url = %endpoint.url(), error = %e, "relay open failed");
                            endpoint.set_liveness(RelayLiveness::Error);
                            let _ = tx.send(RelayUnit::EndOfStoredEvents).await;
                            return;
                        }
                    };
                    endpoint.set_liveness(RelayLiveness::Connected);

                    let mut replay_done = false;
                    while let Some(unit) = feed.recv().await {
                        match unit {
                            RelayUnit::Event(event) => {
                                endpoint.record_event();
                                if tx.send(RelayUnit::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                            RelayUnit::EndOfStoredEvents => {
                                if !replay_done {
                                    replay_done = true;
                                    if tx.send(RelayUnit::EndOfStoredEvents).await.is_err() {
                                        return;
                                    }
                                }
                                if stop_at_eose {
                                    return;
                                }
                            }
                        }
                    }
                    if !replay_done {
                        let _ = tx.send(RelayUnit::EndOfStoredEvents).await;
                    }
                    if !stop_at_eose {
                        endpoint.set_liveness(RelayLiveness::Disconnected);
                    }
                })
            })
            .collect()
    }
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::transport::{RelayFeed, RelayTransport};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use nostr::{EventBuilder, Keys, Kind, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_event(keys: &Keys, created_at: u64, content: &str) -> Event {
        EventBuilder::text_note(content)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[derive(Clone, Copy)]
    enum PublishBehavior {
        Accept,
        Reject,
        Hang,
    }

    /// Scripted relay: replays `stored` then EOSE, then pushes `live`
    /// entries after their delays.
    struct MockRelay {
        url: String,
        stored: Vec<Event>,
        live: Vec<(Duration, Event)>,
        open_delay: Duration,
        fail_open: bool,
        publish_behavior: PublishBehavior,
        opens_in_flight: Option<Arc<AtomicUsize>>,
        max_opens: Option<Arc<AtomicUsize>>,
    }

    impl MockRelay {
        fn new(url: &str, stored: Vec<Event>) -> Self {
            Self {
                url: url.to_string(),
                stored,
                live: Vec::new(),
                open_delay: Duration::ZERO,
                fail_open: false,
                publish_behavior: PublishBehavior::Accept,
                opens_in_flight: None,
                max_opens: None,
            }
        }

        fn with_live(mut self, live: Vec<(Duration, Event)>) -> Self {
            self.live = live;
            self
        }

        fn with_open_delay(mut self, delay: Duration) -> Self {
            self.open_delay = delay;
            self
        }

        fn with_publish(mut self, behavior: PublishBehavior) -> Self {
            self.publish_behavior = behavior;
            self
        }

        fn tracking(mut self, in_flight: Arc<AtomicUsize>, max: Arc<AtomicUsize>) -> Self {
            self.opens_in_flight = Some(in_flight);
            self.max_opens = Some(max);
            self
        }
    }

    #[async_trait]
    impl RelayTransport for MockRelay {
        fn url(&self) -> &str {
            &self.url
        }

        async fn open(&self, _filters: Vec<Filter>) -> Result<RelayFeed> {
            if self.fail_open {
                return Err(anyhow!("connection refused"));
            }
            if let (Some(in_flight), Some(max)) = (&self.opens_in_flight, &self.max_opens) {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
            }
            tokio::time::sleep(self.open_delay).await;
            if let Some(in_flight) = &self.opens_in_flight {
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }

            let (tx, rx) = mpsc::channel(FEED_BUFFER);
            let stored = self.stored.clone();
            let live = self.live.clone();
            tokio::spawn(async move {
                for event in stored {
                    if tx.send(RelayUnit::Event(Box::new(event))).await.is_err() {
                        return;
                    }
                }
                if tx.send(RelayUnit::EndOfStoredEvents).await.is_err() {
                    return;
                }
                for (delay, event) in live {
                    tokio::time::sleep(delay).await;
                    if tx.send(RelayUnit::Event(Box::new(event))).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        async fn publish(&self, _event: &Event) -> Result<()> {
            match self.publish_behavior {
                PublishBehavior::Accept => Ok(()),
                PublishBehavior::Reject => Err(anyhow!("blocked: rate limited")),
                PublishBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    fn executor_of(relays: Vec<MockRelay>) -> RelayExecutor {
        let transports: Vec<Arc<dyn RelayTransport>> = relays
            .into_iter()
            .map(|r| Arc::new(r) as Arc<dyn RelayTransport>)
            .collect();
        RelayExecutor::new(RelaySet::new(transports))
    }

    #[tokio::test]
    async fn test_get_returns_first_match() {
        let keys = Keys::generate();
        let event = test_event(&keys, 100, "hello");
        let executor = executor_of(vec![
            MockRelay::new("wss://a.example", vec![]),
            MockRelay::new("wss://b.example", vec![event.clone()]),
        ]);

        let found = executor.get(Filter::new().kind(Kind::TextNote), None).await;
        assert_eq!(found.map(|e| e.id), Some(event.id));
    }

    #[tokio::test]
    async fn test_get_empty_set_resolves_none_without_network() {
        let executor = executor_of(vec![]);
        let found = executor.get(Filter::new().kind(Kind::TextNote), None).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_get_resolves_none_when_all_relays_replay_empty() {
        let executor = executor_of(vec![
            MockRelay::new("wss://a.example", vec![]),
            MockRelay::new("wss://b.example", vec![]),
        ]);
        let found = executor.get(Filter::new().kind(Kind::TextNote), None).await;
        assert!(found.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_resolves_none_at_deadline_on_hung_relay() {
        let executor = executor_of(vec![MockRelay::new("wss://stuck.example", vec![])
            .with_open_delay(Duration::from_secs(60))]);

        let started = Instant::now();
        let found = executor.get(Filter::new().kind(Kind::TextNote), None).await;
        assert!(found.is_none());
        assert!(started.elapsed() >= DEFAULT_QUERY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_get_many_accumulates_across_relays_with_duplicates() {
        let keys = Keys::generate();
        let e1 = test_event(&keys, 100, "one");
        let e2 = test_event(&keys, 90, "two");
        let executor = executor_of(vec![
            MockRelay::new("wss://a.example", vec![e1.clone(), e2.clone()]),
            MockRelay::new("wss://b.example", vec![e1.clone()]),
        ]);

        let batch = executor
            .get_many(Filter::new().kind(Kind::TextNote), None)
            .await;
        // Raw batch keeps duplicates; dedup is the merger's job
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.iter().filter(|e| e.id == e1.id).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_many_returns_partial_batch_on_timeout() {
        let keys = Keys::generate();
        let e1 = test_event(&keys, 100, "fast");
        let executor = executor_of(vec![
            MockRelay::new("wss://fast.example", vec![e1.clone()]),
            MockRelay::new("wss://stuck.example", vec![]).with_open_delay(Duration::from_secs(60)),
        ]);

        let batch = executor
            .get_many(
                Filter::new().kind(Kind::TextNote),
                Some(Duration::from_secs(2)),
            )
            .await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, e1.id);
    }

    #[tokio::test]
    async fn test_get_many_counts_failed_relay_as_replay_complete() {
        let keys = Keys::generate();
        let e1 = test_event(&keys, 100, "ok");
        let mut broken = MockRelay::new("wss://down.example", vec![]);
        broken.fail_open = true;
        let executor = executor_of(vec![MockRelay::new("wss://up.example", vec![e1]), broken]);

        let batch = executor
            .get_many(Filter::new().kind(Kind::TextNote), None)
            .await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_fires_eose_once_after_all_relays() {
        let keys = Keys::generate();
        let stored = test_event(&keys, 100, "stored");
        let pushed = test_event(&keys, 200, "pushed");
        let executor = executor_of(vec![
            MockRelay::new("wss://a.example", vec![stored.clone()])
                .with_live(vec![(Duration::from_secs(1), pushed.clone())]),
            MockRelay::new("wss://b.example", vec![]),
        ]);

        let mut sub = executor
            .subscribe(vec![Filter::new().kind(Kind::TextNote)])
            .await;

        let mut events_before_eose = 0;
        let mut eose_count = 0;
        let mut events_after_eose = 0;
        while let Some(update) = sub.recv().await {
            match update {
                SubscriptionUpdate::Event(_) if eose_count == 0 => events_before_eose += 1,
                SubscriptionUpdate::Event(_) => {
                    events_after_eose += 1;
                    break;
                }
                SubscriptionUpdate::EndOfStoredEvents => eose_count += 1,
            }
        }
        assert_eq!(events_before_eose, 1);
        assert_eq!(eose_count, 1);
        assert_eq!(events_after_eose, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_reports_per_relay_outcomes() {
        let keys = Keys::generate();
        let event = test_event(&keys, 100, "out");
        let executor = executor_of(vec![
            MockRelay::new("wss://yes.example", vec![]).with_publish(PublishBehavior::Accept),
            MockRelay::new("wss://no.example", vec![]).with_publish(PublishBehavior::Reject),
            MockRelay::new("wss://slow.example", vec![]).with_publish(PublishBehavior::Hang),
        ]);

        let outcomes = executor.publish(&event).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, PublishStatus::Accepted);
        assert!(matches!(outcomes[1].status, PublishStatus::Rejected(_)));
        assert_eq!(outcomes[2].status, PublishStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_publish_empty_set_returns_no_outcomes() {
        let keys = Keys::generate();
        let event = test_event(&keys, 100, "out");
        let executor = executor_of(vec![]);
        assert!(executor.publish(&event).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(executor_of(vec![MockRelay::new("wss://a.example", vec![])
            .with_open_delay(Duration::from_millis(100))
            .tracking(in_flight.clone(), max.clone())]));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .get_many(Filter::new().kind(Kind::TextNote), None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max.load(Ordering::SeqCst) <= MAX_CONCURRENT_QUERIES);
        assert!(max.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_endpoint_bookkeeping_counts_events() {
        let keys = Keys::generate();
        let event = test_event(&keys, 100, "counted");
        let executor = executor_of(vec![MockRelay::new("wss://a.example", vec![event])]);

        executor
            .get_many(Filter::new().kind(Kind::TextNote), None)
            .await;

        let infos = executor.relays().endpoint_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].events_received, 1);
        assert!(infos[0].last_used_at.is_some());
        assert_eq!(infos[0].liveness, RelayLiveness::Connected);
    }
}
