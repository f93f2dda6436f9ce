//! Subscription engine.
//!
//! Subscriptions without a callback join the poll group, a single listener
//! drained by the wait calls. Subscriptions with a callback (or a stream) get
//! their own worker: a listener task that filters raw notifications into a
//! bounded queue, and a dispatcher task that pulls the notified variable and
//! delivers it. Both kinds of listener reconnect on connection loss and
//! re-register their patterns; notifications published while disconnected are
//! lost. Worker tasks race every blocking step against their shutdown signal,
//! so a consumer that stops reading never blocks teardown.

use crate::connection::StoreHandle;
use crate::error::SmaxError;
use crate::retry::{exhausted, with_retry};
use crate::store::{RawNotification, Subscriber};
use crate::types::{Pattern, SmaxValue, split_path, strip_channel_prefix};
use crate::Result;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A callback invoked with every value pulled for its subscription.
pub type Callback = Arc<dyn Fn(SmaxValue) + Send + Sync>;

/// A raw notification, as returned by the `*_notification` wait calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The channel without its namespace prefix: the full name of what changed.
    pub channel: String,
    /// The matching wildcard subscription, without prefix, if any.
    pub pattern: Option<String>,
    /// Message body; store updates carry the writer's origin.
    pub payload: String,
}

impl Notification {
    fn from_raw(raw: RawNotification) -> Self {
        let unprefixed = |name: String| match strip_channel_prefix(&name) {
            Some(rest) => rest.to_string(),
            None => name,
        };
        Self {
            channel: unprefixed(raw.channel),
            pattern: raw.pattern.map(unprefixed),
            payload: String::from_utf8_lossy(&raw.payload).into_owned(),
        }
    }

    /// The `(table, key)` named by the channel.
    #[must_use]
    pub fn target(&self) -> Option<(String, String)> {
        split_path(&self.channel)
    }
}

/// Accepts namespaced channels, further filtered by `filter` when given.
fn accepts(raw: &RawNotification, filter: Option<&Pattern>) -> bool {
    strip_channel_prefix(&raw.channel)
        .is_some_and(|name| filter.is_none_or(|pattern| pattern.matches(name)))
}

async fn register(listener: &mut dyn Subscriber, pattern: &Pattern) -> Result<()> {
    if pattern.is_wildcard() {
        listener.subscribe_pattern(&pattern.channel()).await
    } else {
        listener.subscribe_exact(&pattern.channel()).await
    }
}

async fn unregister(listener: &mut dyn Subscriber, pattern: &Pattern) -> Result<()> {
    if pattern.is_wildcard() {
        listener.unsubscribe_pattern(&pattern.channel()).await
    } else {
        listener.unsubscribe_exact(&pattern.channel()).await
    }
}

/// Opens a listener registered on every pattern, retrying connection failures.
async fn open_listener(handle: &StoreHandle, patterns: &[Pattern]) -> Result<Box<dyn Subscriber>> {
    with_retry(&handle.retry, "subscribe", || async move {
        handle.store.ping().await?;
        let mut listener = handle.store.subscriber().await?;
        for pattern in patterns {
            register(listener.as_mut(), pattern).await?;
        }
        Ok(listener)
    })
    .await
}

async fn reopen_listener(handle: &StoreHandle, patterns: &[Pattern]) -> Result<Box<dyn Subscriber>> {
    open_listener(handle, patterns).await.map_err(|e| {
        if e.is_connection() {
            exhausted("subscriber reconnect", &e)
        } else {
            e
        }
    })
}

// ============================================================================
// Callback workers
// ============================================================================

/// Where a worker sends the values it pulls.
pub(crate) enum Delivery {
    Callback(Callback),
    Stream(mpsc::Sender<SmaxValue>),
}

impl Delivery {
    /// Returns false once the consumer is gone.
    async fn deliver(&self, pattern: &Pattern, value: SmaxValue) -> bool {
        match self {
            Self::Callback(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                    error!("callback for {} panicked", pattern);
                }
                true
            }
            Self::Stream(tx) => tx.send(value).await.is_ok(),
        }
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Worker {
    fn signal(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn stop(self) {
        self.signal();
        for task in [self.listener, self.dispatcher] {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("subscription worker panicked: {}", e);
                }
            }
        }
    }
}

async fn run_listener(
    handle: StoreHandle,
    pattern: Pattern,
    mut listener: Box<dyn Subscriber>,
    tx: mpsc::Sender<RawNotification>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = listener.next_message(None) => next,
        };
        match next {
            Ok(Some(raw)) => {
                if !accepts(&raw, Some(&pattern)) {
                    debug!("listener for {} ignored {}", pattern, raw.channel);
                    continue;
                }
                let sent = tokio::select! {
                    _ = shutdown.changed() => break,
                    sent = tx.send(raw) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_connection() => {
                warn!("listener for {} lost its connection: {}", pattern, e);
                let reopened = tokio::select! {
                    _ = shutdown.changed() => break,
                    reopened = reopen_listener(&handle, std::slice::from_ref(&pattern)) => reopened,
                };
                match reopened {
                    Ok(fresh) => {
                        info!("listener for {} reconnected", pattern);
                        listener = fresh;
                    }
                    Err(e) => {
                        error!("listener for {} stopped: {}", pattern, e);
                        break;
                    }
                }
            }
            Err(e) => warn!("listener for {} skipped a message: {}", pattern, e),
        }
    }
    debug!("listener for {} exited", pattern);
}

/// Store serials identifying one written state of `value`.
///
/// A struct's root record is written once, so its leaves' serials are summed;
/// they only grow. `None` when the store reported no serials.
fn version_of(value: &SmaxValue) -> Option<u64> {
    value
        .leaves()
        .iter()
        .try_fold(0_u64, |sum, leaf| Some(sum.saturating_add(leaf.meta.seq?)))
}

/// Pulls and delivers what each notification points at.
///
/// Every notification triggers a pull of the current state, so a burst of
/// writes landing before the pull reads the same state several times. Such
/// repeats are dropped: consumers see each written state at most once, in
/// write order, and a burst may coalesce into its last state.
async fn run_dispatcher(
    handle: StoreHandle,
    pattern: Pattern,
    mut rx: mpsc::Receiver<RawNotification>,
    delivery: Delivery,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last: Option<(String, u64)> = None;
    loop {
        let raw = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            raw = rx.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        // Wildcards pull the struct they cover, exact names pull themselves.
        let target = if pattern.is_wildcard() {
            pattern.pull_target()
        } else {
            strip_channel_prefix(&raw.channel).and_then(split_path)
        };
        let Some((table, key)) = target else {
            warn!("no variable to pull for {} on {}", raw.channel, pattern);
            continue;
        };
        let pulled = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            pulled = handle.pull(&table, &key) => pulled,
        };
        let value = match pulled {
            Ok(value) => value,
            Err(e) => {
                warn!("pull of {}:{} for {} failed: {}", table, key, pattern, e);
                continue;
            }
        };

        let seen = version_of(&value).map(|version| (value.name().to_string(), version));
        if seen.is_some() && seen == last {
            debug!("{} unchanged since its last delivery, skipping", value.name());
            continue;
        }
        let delivered = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            delivered = delivery.deliver(&pattern, value) => delivered,
        };
        if !delivered {
            break;
        }
        if seen.is_some() {
            last = seen;
        }
    }
    debug!("dispatcher for {} exited", pattern);
}

// ============================================================================
// Engine
// ============================================================================

/// Poll-group state; `listener` is `None` until (re)connected.
#[derive(Default)]
struct PollGroup {
    listener: Option<Box<dyn Subscriber>>,
    patterns: Vec<Pattern>,
}

/// Owns every subscription of one client.
pub(crate) struct SubscriptionEngine {
    handle: StoreHandle,
    capacity: usize,
    poll: Mutex<PollGroup>,
    workers: StdMutex<HashMap<String, Vec<Worker>>>,
}

impl SubscriptionEngine {
    pub(crate) fn new(handle: StoreHandle, capacity: usize) -> Self {
        Self {
            handle,
            capacity: capacity.max(1),
            poll: Mutex::new(PollGroup::default()),
            workers: StdMutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Vec<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `pattern` to the poll group.
    pub(crate) async fn subscribe(&self, pattern: Pattern) -> Result<()> {
        let mut group = self.poll.lock().await;
        if group.patterns.contains(&pattern) {
            return Ok(());
        }
        group.patterns.push(pattern.clone());

        if let Some(listener) = group.listener.as_mut() {
            match register(listener.as_mut(), &pattern).await {
                Ok(()) => {
                    info!("subscribed to {}", pattern);
                    return Ok(());
                }
                Err(e) if e.is_connection() => {
                    warn!("poll listener lost while subscribing to {}: {}", pattern, e);
                    group.listener = None;
                }
                Err(e) => {
                    group.patterns.retain(|p| p != &pattern);
                    return Err(e);
                }
            }
        }

        match open_listener(&self.handle, &group.patterns).await {
            Ok(listener) => {
                group.listener = Some(listener);
                info!("subscribed to {}", pattern);
                Ok(())
            }
            Err(e) => {
                group.patterns.retain(|p| p != &pattern);
                Err(e)
            }
        }
    }

    /// Starts a worker delivering every matching update to `delivery`.
    pub(crate) async fn subscribe_worker(&self, pattern: Pattern, delivery: Delivery) -> Result<()> {
        let listener = open_listener(&self.handle, std::slice::from_ref(&pattern)).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(self.capacity);

        let listener = tokio::spawn(run_listener(
            self.handle.clone(),
            pattern.clone(),
            listener,
            tx,
            shutdown_rx.clone(),
        ));
        let dispatcher = tokio::spawn(run_dispatcher(
            self.handle.clone(),
            pattern.clone(),
            rx,
            delivery,
            shutdown_rx,
        ));

        self.workers()
            .entry(pattern.as_str().to_string())
            .or_default()
            .push(Worker {
                shutdown,
                listener,
                dispatcher,
            });
        info!("subscribed to {} with a callback", pattern);
        Ok(())
    }

    /// Blocks until a poll-group notification passes `filter`.
    ///
    /// # Errors
    ///
    /// - [`SmaxError::NotSubscribed`] with an empty poll group
    /// - [`SmaxError::Timeout`] once `timeout` elapses; subscriptions stay intact
    /// - [`SmaxError::Connection`] when reconnecting exhausts the retry budget
    pub(crate) async fn wait(
        &self,
        filter: Option<&Pattern>,
        timeout: Option<Duration>,
    ) -> Result<Notification> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut group = self.poll.lock().await;
        if group.patterns.is_empty() {
            return Err(SmaxError::NotSubscribed);
        }

        loop {
            let remaining = match (deadline, timeout) {
                (Some(deadline), Some(waited)) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(SmaxError::Timeout { waited });
                    }
                    Some(left)
                }
                _ => None,
            };

            if group.listener.is_none() {
                let patterns = group.patterns.clone();
                let reopen = reopen_listener(&self.handle, &patterns);
                let reopened = match (deadline, timeout) {
                    // Left disconnected on expiry; the next wait resumes reconnecting.
                    (Some(deadline), Some(waited)) => tokio::time::timeout_at(deadline, reopen)
                        .await
                        .map_err(|_| SmaxError::Timeout { waited })?,
                    _ => reopen.await,
                };
                group.listener = Some(reopened?);
                info!("poll listener reconnected");
            }
            let Some(listener) = group.listener.as_mut() else {
                continue;
            };

            match listener.next_message(remaining).await {
                Ok(Some(raw)) if accepts(&raw, filter) => {
                    debug!("notification on {}", raw.channel);
                    return Ok(Notification::from_raw(raw));
                }
                Ok(Some(raw)) => debug!("ignoring notification on {}", raw.channel),
                Ok(None) => {}
                Err(e) if e.is_connection() => {
                    warn!("poll listener lost its connection: {}", e);
                    group.listener = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Waits like [`Self::wait`], then pulls what the notification points at.
    ///
    /// With a filter, the filter's own target is pulled, so a wildcard on a
    /// struct returns the whole struct. Without one, the notified channel is.
    pub(crate) async fn wait_value(
        &self,
        filter: Option<&Pattern>,
        timeout: Option<Duration>,
    ) -> Result<SmaxValue> {
        let notification = self.wait(filter, timeout).await?;
        let target = match filter {
            Some(pattern) => pattern.pull_target(),
            None => notification.target(),
        };
        let (table, key) = target.ok_or_else(|| {
            SmaxError::protocol(
                "wait",
                format!("cannot derive a table and key from '{}'", notification.channel),
            )
        })?;
        self.handle.pull(&table, &key).await
    }

    /// Removes `pattern`, or everything when `None`, and stops affected workers.
    pub(crate) async fn unsubscribe(&self, pattern: Option<&Pattern>) -> Result<()> {
        {
            let mut group = self.poll.lock().await;
            let PollGroup { listener, patterns } = &mut *group;
            match pattern {
                None => {
                    // Closing the listener drops every registration with it.
                    *listener = None;
                    patterns.clear();
                }
                Some(pattern) if patterns.contains(pattern) => {
                    patterns.retain(|p| p != pattern);
                    if patterns.is_empty() {
                        *listener = None;
                    } else if let Some(active) = listener.as_mut() {
                        match unregister(active.as_mut(), pattern).await {
                            Ok(()) => {}
                            Err(e) if e.is_connection() => *listener = None,
                            Err(e) => return Err(e),
                        }
                    }
                }
                Some(_) => {}
            }
        }

        let stopped: Vec<Worker> = {
            let mut workers = self.workers();
            match pattern {
                None => workers.drain().flat_map(|(_, list)| list).collect(),
                Some(pattern) => workers.remove(pattern.as_str()).unwrap_or_default(),
            }
        };
        for worker in stopped {
            worker.stop().await;
        }

        match pattern {
            Some(pattern) => info!("unsubscribed from {}", pattern),
            None => info!("unsubscribed from everything"),
        }
        Ok(())
    }

    /// Signals every worker to stop without waiting for it.
    pub(crate) fn signal_shutdown(&self) {
        for worker in self.workers().values().flatten() {
            worker.signal();
        }
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.workers().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmaxConfig;
    use crate::connection::SmaxClient;
    use crate::store::{MemoryStore, Store};
    use crate::types::Value;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> SmaxConfig {
        let mut config = SmaxConfig::default();
        config.retry.max_attempts = 3;
        config.retry.initial_backoff_ms = 5;
        config.retry.max_backoff_ms = 20;
        config
    }

    fn client() -> (Arc<MemoryStore>, SmaxClient) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let store = Arc::new(MemoryStore::new());
        let client = SmaxClient::with_store(store.clone(), "test:subscribe", &test_config());
        (store, client)
    }

    /// A second client on the same store, for writes from a spawned task.
    fn writer(store: &Arc<MemoryStore>) -> SmaxClient {
        SmaxClient::with_store(store.clone(), "test:writer", &test_config())
    }

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn notifications_strip_the_namespace() {
        let raw = RawNotification {
            channel: "smax:test:swarm:bee".into(),
            pattern: Some("smax:test:swarm*".into()),
            payload: b"host:prog".to_vec(),
        };
        assert!(accepts(&raw, None));
        assert!(accepts(&raw, Pattern::new("test:swarm*").ok().as_ref()));
        assert!(!accepts(&raw, Pattern::new("test:hive*").ok().as_ref()));

        let notification = Notification::from_raw(raw);
        assert_eq!(notification.channel, "test:swarm:bee");
        assert_eq!(notification.pattern.as_deref(), Some("test:swarm*"));
        assert_eq!(notification.payload, "host:prog");
        assert_eq!(
            notification.target(),
            Some(("test:swarm".to_string(), "bee".to_string()))
        );

        let foreign = RawNotification {
            channel: "other:thing".into(),
            pattern: None,
            payload: Vec::new(),
        };
        assert!(!accepts(&foreign, None));
    }

    #[tokio::test]
    async fn wait_without_subscriptions_fails() {
        let (_store, client) = client();
        let result = client.wait_on_any_subscribed(Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(SmaxError::NotSubscribed)));
    }

    #[tokio::test]
    async fn timeout_leaves_subscription_usable() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:timeout:value").await?;

        let started = std::time::Instant::now();
        let result = client.wait_on_any_subscribed(Some(Duration::from_millis(500))).await;
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(SmaxError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(450), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");

        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = writer.share("test:timeout", "value", 42_i32).await;
        });
        let value = client.wait_on_any_subscribed(Some(Duration::from_secs(2))).await?;
        assert_eq!(value.value(), Some(&Value::from(42_i32)));
        assert_eq!(value.name(), "test:timeout:value");
        Ok(())
    }

    #[tokio::test]
    async fn wait_on_subscribed_filters_channels() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:filter*").await?;

        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = writer.share("test:filter:a", "x", 1_i8).await;
            let _ = writer.share("test:filter:b", "y", 2_i8).await;
        });
        let notification = client
            .wait_on_subscribed_notification("test:filter:b*", Some(Duration::from_secs(2)))
            .await?;
        assert_eq!(notification.channel, "test:filter:b:y");
        assert_eq!(notification.payload, "test:writer");
        Ok(())
    }

    #[tokio::test]
    async fn wildcard_wait_pulls_the_covered_struct() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:swarm*").await?;

        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let bee = Value::structure().with_field("x", 1.5_f64).with_field("y", 2_i8);
            let _ = writer
                .share("test", "swarm", Value::structure().with_field("bee", bee))
                .await;
        });
        let tree = client
            .wait_on_subscribed("test:swarm*", Some(Duration::from_secs(2)))
            .await?;
        assert!(tree.is_struct());
        assert_eq!(tree.name(), "test:swarm");
        assert_eq!(
            tree.get_path("bee:x").and_then(SmaxValue::value),
            Some(&Value::from(1.5_f64))
        );
        Ok(())
    }

    #[tokio::test]
    async fn callbacks_are_isolated_and_ordered() -> TestResult {
        let (_store, client) = client();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        client
            .subscribe_with_callback("test:iso:a", move |v: SmaxValue| {
                let _ = a_tx.send(v);
            })
            .await?;
        client
            .subscribe_with_callback("test:iso:b", move |v: SmaxValue| {
                let _ = b_tx.send(v);
            })
            .await?;

        // Interleaved, back to back.
        for i in 0..5_i32 {
            client.share("test:iso", "a", i).await?;
            client.share("test:iso", "b", 100 + i).await?;
        }

        async fn drain(
            rx: &mut mpsc::UnboundedReceiver<SmaxValue>,
        ) -> std::result::Result<Vec<SmaxValue>, Box<dyn std::error::Error>> {
            let mut seen = Vec::new();
            while seen.last().and_then(|v: &SmaxValue| v.meta.seq) != Some(5) {
                match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await? {
                    Some(value) => seen.push(value),
                    None => break,
                }
            }
            Ok(seen)
        }
        let seen_a = drain(&mut a_rx).await?;
        let seen_b = drain(&mut b_rx).await?;

        for (seen, name, base) in [(&seen_a, "test:iso:a", 0), (&seen_b, "test:iso:b", 100)] {
            assert!(!seen.is_empty());
            assert!(seen.iter().all(|v| v.name() == name));
            let seqs: Vec<u64> = seen.iter().filter_map(|v| v.meta.seq).collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{name} saw {seqs:?}");
            assert_eq!(seqs.last(), Some(&5));
            // Each state carries the value written with its serial.
            for value in seen {
                let seq = value.meta.seq.and_then(|s| i64::try_from(s).ok());
                let data = value.value().and_then(Value::as_i64);
                assert_eq!(data, seq.map(|s| base + s - 1));
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn unread_stream_does_not_block_unsubscribe() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config();
        config.client.channel_capacity = 1;
        let client = SmaxClient::with_store(store.clone(), "test:stall", &config);

        let _stream = client.subscribe_stream("test:stall:v").await?;
        for i in 0..6_i8 {
            client.share("test:stall", "v", i).await?;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(3), client.unsubscribe(None)).await??;
        assert_eq!(client.worker_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn wait_deadline_bounds_reconnect() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        // Default budget: backoff 0.5s, 1s, 2s.
        let client = SmaxClient::with_store(store.clone(), "test:slow", &SmaxConfig::default());
        client.subscribe("test:slow:v").await?;
        store.set_offline(true);
        store.drop_subscribers();

        let started = Instant::now();
        let result = client.wait_on_any_subscribed(Some(Duration::from_millis(500))).await;
        assert!(matches!(result, Err(SmaxError::Timeout { .. })), "{result:?}");
        assert!(started.elapsed() < Duration::from_millis(1500));

        store.set_offline(false);
        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = writer.share("test:slow", "v", 4_i8).await;
        });
        let value = client.wait_on_any_subscribed(Some(Duration::from_secs(3))).await?;
        assert_eq!(value.value(), Some(&Value::from(4_i8)));
        Ok(())
    }

    #[tokio::test]
    async fn panicking_callback_keeps_its_worker() -> TestResult {
        let (_store, client) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        client
            .subscribe_with_callback("test:panic:v", move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first delivery fails");
                }
            })
            .await?;

        client.share("test:panic", "v", 1_i8).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.share("test:panic", "v", 2_i8).await?;

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn poll_group_reconnects_after_connection_loss() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:reconnect:v").await?;
        store.drop_subscribers();

        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = writer.share("test:reconnect", "v", 7_i8).await;
        });
        let value = client.wait_on_any_subscribed(Some(Duration::from_secs(2))).await?;
        assert_eq!(value.value(), Some(&Value::from(7_i8)));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_reconnect_surfaces_connection_error() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:down:v").await?;
        store.set_offline(true);
        store.drop_subscribers();

        let result = client.wait_on_any_subscribed(Some(Duration::from_secs(2))).await;
        assert!(result.is_err_and(|e| e.is_connection()));

        store.set_offline(false);
        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = writer.share("test:down", "v", 3_i8).await;
        });
        let value = client.wait_on_any_subscribed(Some(Duration::from_secs(2))).await?;
        assert_eq!(value.value(), Some(&Value::from(3_i8)));
        Ok(())
    }

    #[tokio::test]
    async fn callback_worker_survives_dropped_connection() -> TestResult {
        let (store, client) = client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe_with_callback("test:worker:v", move |v: SmaxValue| {
                let _ = tx.send(v);
            })
            .await?;

        store.drop_subscribers();
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.share("test:worker", "v", 9_i8).await?;

        let value = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
        assert_eq!(
            value.and_then(|v| v.value().cloned()),
            Some(Value::from(9_i8))
        );
        Ok(())
    }

    #[tokio::test]
    async fn streams_yield_pulled_values() -> TestResult {
        let (_store, client) = client();
        let mut stream = client.subscribe_stream("test:stream*").await?;
        client.share("test:stream", "speed", 3.5_f64).await?;

        let value = tokio::time::timeout(Duration::from_secs(2), stream.next()).await?;
        assert_eq!(value.map(|v| v.name().to_string()), Some("test:stream".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_stops_workers_and_poll_patterns() -> TestResult {
        let (store, client) = client();
        client.subscribe("test:unsub:a").await?;
        client.subscribe("test:unsub:b").await?;
        client.subscribe_with_callback("test:unsub:a", |_| {}).await?;
        assert_eq!(client.worker_count(), 1);

        client.unsubscribe(Some("test:unsub:a")).await?;
        assert_eq!(client.worker_count(), 0);

        let writer = writer(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = writer.share("test:unsub", "a", 1_i8).await;
            let _ = writer.share("test:unsub", "b", 2_i8).await;
        });
        let value = client.wait_on_any_subscribed(Some(Duration::from_secs(2))).await?;
        assert_eq!(value.name(), "test:unsub:b");

        client.unsubscribe(None).await?;
        let result = client.wait_on_any_subscribed(Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(SmaxError::NotSubscribed)));
        Ok(())
    }

    #[tokio::test]
    async fn shares_publish_on_the_variable_channel() -> TestResult {
        let (store, client) = client();
        let mut raw = store.subscriber().await?;
        raw.subscribe_exact("smax:test:raw:v").await?;
        client.share("test:raw", "v", 1_i8).await?;
        let seen = raw.next_message(Some(Duration::from_secs(1))).await?;
        assert_eq!(seen.map(|n| n.channel), Some("smax:test:raw:v".to_string()));
        Ok(())
    }
}
