//! Event manager: owns the remote subscription and fans events out.
//!
//! The manager keeps exactly one subscription to the controller's event
//! stream, opened when the first listener registers and closed when the last
//! one leaves. Raw notifications are pushed by the remote client into an
//! [`EventSink`] queue and drained by a single dispatch loop which
//! normalizes, de-duplicates, logs and delivers them to listeners in
//! registration order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use ccuhub_domain::error::{CcuError, ListenerError, NotFoundError, RemoteError};
use ccuhub_domain::event::Event;
use ccuhub_domain::time::to_millis;

use crate::ports::{
    EventLog, EventSink, Listener, Notice, RawEvent, RemoteClient, SubscriptionHandle,
};
use crate::retry::RetryPolicy;
use crate::sync::lock;

/// Tuning knobs for the [`EventManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Retries for opening the subscription.
    pub subscribe_retry: RetryPolicy,
    /// How often the dispatch loop re-establishes a subscription that could
    /// not be restored after a transport failure.
    pub resubscribe_interval: Duration,
    /// Number of recent `(source, timestamp)` keys remembered for duplicate
    /// suppression.
    pub dedup_window: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            subscribe_retry: RetryPolicy::default(),
            resubscribe_interval: Duration::from_secs(30),
            dedup_window: 1024,
        }
    }
}

/// Returned by [`EventManager::register`]; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

/// Outcome of dispatching one raw event.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// The normalized event, `None` when it was suppressed as a duplicate.
    pub event: Option<Event>,
    pub duplicate: bool,
    /// Listeners that handled the event successfully.
    pub delivered: usize,
    pub failures: Vec<ListenerError>,
}

impl DispatchReport {
    fn duplicate() -> Self {
        Self {
            duplicate: true,
            ..Self::default()
        }
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    generation: u64,
}

#[derive(Default)]
struct SubscriptionSlot {
    active: Option<ActiveSubscription>,
    generation: u64,
}

type DedupKey = (String, i64);

/// Bounded memory of recently seen events.
struct RecentKeys {
    capacity: usize,
    order: VecDeque<DedupKey>,
    seen: HashSet<DedupKey>,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns `false` when the key was already present.
    fn insert(&mut self, key: DedupKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    fn remove(&mut self, key: &DedupKey) {
        if self.seen.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}

/// Single-subscription event dispatcher.
pub struct EventManager<R, L>
where
    R: RemoteClient + 'static,
    L: EventLog,
{
    remote: Arc<R>,
    log: L,
    config: ManagerConfig,
    listeners: Mutex<Vec<(ListenerHandle, Arc<dyn Listener>)>>,
    next_handle: AtomicU64,
    subscription: tokio::sync::Mutex<SubscriptionSlot>,
    sender: mpsc::UnboundedSender<Notice>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Notice>>,
    recent: Mutex<RecentKeys>,
    dispatch: tokio::sync::Mutex<()>,
    failures: Mutex<HashMap<String, u64>>,
}

impl<R, L> EventManager<R, L>
where
    R: RemoteClient + 'static,
    L: EventLog,
{
    pub fn new(remote: Arc<R>, log: L, config: ManagerConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let recent = RecentKeys::new(config.dedup_window);
        Self {
            remote,
            log,
            config,
            listeners: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            subscription: tokio::sync::Mutex::new(SubscriptionSlot::default()),
            sender,
            queue: tokio::sync::Mutex::new(receiver),
            recent: Mutex::new(recent),
            dispatch: tokio::sync::Mutex::new(()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// The log events are appended to.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Add a listener to the fan-out set.
    ///
    /// Opens the subscription when this is the first listener. Registering
    /// the same listener (same `Arc`) again returns its existing handle.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Remote`] when the subscription cannot be opened
    /// after retries; the listener is not added in that case.
    #[tracing::instrument(skip_all, fields(listener = listener.name()))]
    pub async fn register(&self, listener: Arc<dyn Listener>) -> Result<ListenerHandle, CcuError> {
        let mut slot = self.subscription.lock().await;

        let existing = lock(&self.listeners)
            .iter()
            .find(|(_, l)| Arc::ptr_eq(l, &listener))
            .map(|(h, _)| *h);
        if let Some(handle) = existing {
            tracing::debug!(handle = handle.0, "listener already registered");
            return Ok(handle);
        }

        if slot.active.is_none() {
            self.open(&mut slot).await?;
        }

        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((handle, listener));
        tracing::info!(handle = handle.0, "listener registered");
        Ok(handle)
    }

    /// Remove a listener; closes the subscription when none are left.
    ///
    /// After teardown, notices already queued are drained and logged. When
    /// called from inside a delivery the dispatch loop picks them up instead.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::NotFound`] for unknown handles and
    /// [`CcuError::Storage`] when logging a drained event failed.
    #[tracing::instrument(skip(self))]
    pub async fn unregister(&self, handle: ListenerHandle) -> Result<(), CcuError> {
        if self.detach(handle).await? == 0 && self.dispatch.try_lock().is_ok() {
            let drained = self.pump().await?;
            if drained > 0 {
                tracing::debug!(drained, "drained buffered notices after teardown");
            }
        }
        Ok(())
    }

    async fn detach(&self, handle: ListenerHandle) -> Result<usize, CcuError> {
        let mut slot = self.subscription.lock().await;

        let remaining = {
            let mut listeners = lock(&self.listeners);
            let before = listeners.len();
            listeners.retain(|(h, _)| *h != handle);
            if listeners.len() == before {
                return Err(NotFoundError {
                    entity: "Listener",
                    id: handle.0.to_string(),
                }
                .into());
            }
            listeners.len()
        };

        tracing::info!(remaining, "listener unregistered");
        if remaining == 0 {
            self.release(&mut slot).await;
        }
        Ok(remaining)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Whether a subscription to the controller is currently open.
    pub async fn is_subscribed(&self) -> bool {
        self.subscription.lock().await.active.is_some()
    }

    /// Per-listener failure counters since startup.
    #[must_use]
    pub fn failure_counts(&self) -> HashMap<String, u64> {
        lock(&self.failures).clone()
    }

    /// Normalize, de-duplicate, log and deliver one raw event.
    ///
    /// Delivery is synchronous and in registration order. A failing (or
    /// panicking) listener is recorded in the report and does not stop
    /// delivery to the others.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed addresses and
    /// [`CcuError::Storage`] when the log append failed; in the latter case
    /// the event is not delivered and a later redelivery is not treated as a
    /// duplicate.
    pub async fn on_remote_event(&self, raw: RawEvent) -> Result<DispatchReport, CcuError> {
        let _dispatch = self.dispatch.lock().await;

        let address = raw.parameter_address()?;
        let event = Event::device_state_change(&address, &raw.value, raw.timestamp);
        let key = (event.source.clone(), to_millis(event.timestamp));

        if !lock(&self.recent).insert(key.clone()) {
            tracing::debug!(source = %event.source, "duplicate remote event suppressed");
            return Ok(DispatchReport::duplicate());
        }

        match self.append_new(&event).await {
            Ok(true) => Ok(self.deliver(event).await),
            Ok(false) => {
                tracing::debug!(source = %event.source, "remote event already logged");
                Ok(DispatchReport::duplicate())
            }
            Err(err) => {
                lock(&self.recent).remove(&key);
                tracing::error!(source = %event.source, error = %err, "failed to append event");
                Err(err)
            }
        }
    }

    /// Append `event`, returning `false` when the log already held it.
    ///
    /// Device events carry an id derived from source and timestamp, so the
    /// log returns the original entry for a redelivery. Sequences only grow,
    /// so an entry at or below the previous high-water mark was stored
    /// before this call.
    async fn append_new(&self, event: &Event) -> Result<bool, CcuError> {
        let before = self.log.high_water_mark().await?;
        let entry = self.log.append(event.clone()).await?;
        Ok(entry.sequence > before)
    }

    async fn deliver(&self, event: Event) -> DispatchReport {
        let listeners: Vec<Arc<dyn Listener>> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut report = DispatchReport::default();
        for listener in listeners {
            let outcome = AssertUnwindSafe(listener.handle(&event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => self.record_failure(err, &mut report),
                Err(_) => self.record_failure(
                    ListenerError::new(listener.name(), "panicked while handling event"),
                    &mut report,
                ),
            }
        }
        tracing::debug!(
            source = %event.source,
            delivered = report.delivered,
            failed = report.failures.len(),
            "event dispatched"
        );
        report.event = Some(event);
        report
    }

    fn record_failure(&self, err: ListenerError, report: &mut DispatchReport) {
        tracing::warn!(listener = %err.listener, error = %err, "listener failed");
        *lock(&self.failures).entry(err.listener.clone()).or_default() += 1;
        report.failures.push(err);
    }

    /// Process everything currently queued without waiting for more.
    ///
    /// Does nothing while [`run`](Self::run) owns the queue.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when an append failed.
    pub async fn pump(&self) -> Result<usize, CcuError> {
        let Ok(mut queue) = self.queue.try_lock() else {
            return Ok(0);
        };
        let mut processed = 0;
        while let Ok(notice) = queue.try_recv() {
            self.handle_notice(notice).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Dispatch loop: drains the queue until `shutdown` resolves, then
    /// releases the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when an append failed after retries.
    /// The subscription is released on every exit path.
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send) -> Result<(), CcuError> {
        let result = self.dispatch_loop(shutdown).await;
        let drained = self.shutdown().await;
        result.and(drained.map(|_| ()))
    }

    async fn dispatch_loop(&self, shutdown: impl Future<Output = ()> + Send) -> Result<(), CcuError> {
        let mut queue = self.queue.lock().await;
        let mut tick = tokio::time::interval(self.config.resubscribe_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!("dispatch loop started");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("dispatch loop stopping");
                    return Ok(());
                }
                Some(notice) = queue.recv() => {
                    self.handle_notice(notice).await?;
                }
                _ = tick.tick() => {
                    if let Err(err) = self.ensure_subscribed().await {
                        tracing::warn!(error = %err, "resubscription attempt failed");
                    }
                }
            }
        }
    }

    async fn handle_notice(&self, notice: Notice) -> Result<(), CcuError> {
        match notice {
            Notice::Event { raw, .. } => match self.on_remote_event(raw).await {
                Ok(_) => Ok(()),
                Err(err @ CcuError::Storage(_)) => Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unusable remote event");
                    Ok(())
                }
            },
            Notice::Lost { generation, error } => {
                self.recover(generation, error).await;
                Ok(())
            }
        }
    }

    /// Re-open the subscription after the remote side reported it lost.
    async fn recover(&self, generation: u64, error: RemoteError) {
        let mut slot = self.subscription.lock().await;
        if slot.active.as_ref().map(|a| a.generation) != Some(generation) {
            tracing::debug!(generation, "ignoring loss of stale subscription");
            return;
        }
        tracing::warn!(generation, error = %error, "subscription lost");
        self.release(&mut slot).await;

        if lock(&self.listeners).is_empty() {
            return;
        }
        if let Err(err) = self.open(&mut slot).await {
            tracing::error!(error = %err, "resubscription failed, retrying on next tick");
        }
    }

    /// Open a subscription if listeners exist but none is active.
    ///
    /// Returns whether a new subscription was opened.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Remote`] when subscribing fails after retries.
    pub async fn ensure_subscribed(&self) -> Result<bool, CcuError> {
        let mut slot = self.subscription.lock().await;
        if slot.active.is_some() || lock(&self.listeners).is_empty() {
            return Ok(false);
        }
        self.open(&mut slot).await?;
        Ok(true)
    }

    /// Release the subscription, deliver what is still queued and drop all
    /// listeners. Returns the number of drained notices.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when logging a drained event failed.
    pub async fn shutdown(&self) -> Result<usize, CcuError> {
        {
            let mut slot = self.subscription.lock().await;
            self.release(&mut slot).await;
        }
        let drained = self.pump().await;
        lock(&self.listeners).clear();
        tracing::info!("event manager shut down");
        drained
    }

    async fn open(&self, slot: &mut SubscriptionSlot) -> Result<(), CcuError> {
        slot.generation += 1;
        let generation = slot.generation;
        let sink = EventSink::new(self.sender.clone(), generation);

        let handle = self
            .config
            .subscribe_retry
            .run("subscribe", RemoteError::is_transient, || {
                self.remote.subscribe(sink.clone())
            })
            .await?;

        tracing::info!(generation, handle = handle.0, "subscribed to remote events");
        slot.active = Some(ActiveSubscription { handle, generation });
        Ok(())
    }

    async fn release(&self, slot: &mut SubscriptionSlot) {
        let Some(active) = slot.active.take() else {
            return;
        };
        match self.remote.unsubscribe(active.handle).await {
            Ok(()) => tracing::info!(handle = active.handle.0, "unsubscribed from remote events"),
            Err(err) => tracing::warn!(
                handle = active.handle.0,
                error = %err,
                "unsubscribe failed, treating subscription as closed"
            ),
        }
    }
}

impl<R, L> Drop for EventManager<R, L>
where
    R: RemoteClient + 'static,
    L: EventLog,
{
    fn drop(&mut self) {
        let Some(active) = self.subscription.get_mut().active.take() else {
            return;
        };
        tracing::warn!(
            handle = active.handle.0,
            "event manager dropped with an open subscription"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let remote = Arc::clone(&self.remote);
                runtime.spawn(async move {
                    if let Err(err) = remote.unsubscribe(active.handle).await {
                        tracing::warn!(error = %err, "late unsubscribe failed");
                    }
                });
            }
            Err(_) => tracing::error!(
                handle = active.handle.0,
                "no runtime to release subscription"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use crate::testing::{FakeRemote, InMemoryEventLog, RecordingListener};
    use ccuhub_domain::event::EventKind;
    use ccuhub_domain::time::from_millis;
    use std::sync::atomic::Ordering;

    type Journal = Arc<Mutex<Vec<(String, Event)>>>;

    fn config() -> ManagerConfig {
        ManagerConfig {
            subscribe_retry: RetryPolicy {
                attempts: 3,
                backoff: BackoffPolicy {
                    first: Duration::from_millis(1),
                    max: Duration::from_millis(2),
                    factor: 2.0,
                },
            },
            resubscribe_interval: Duration::from_millis(10),
            dedup_window: 16,
        }
    }

    fn manager() -> (
        EventManager<FakeRemote, Arc<InMemoryEventLog>>,
        Arc<FakeRemote>,
        Arc<InMemoryEventLog>,
    ) {
        let remote = Arc::new(FakeRemote::default());
        let log = Arc::new(InMemoryEventLog::default());
        let manager = EventManager::new(Arc::clone(&remote), Arc::clone(&log), config());
        (manager, remote, log)
    }

    fn state_event(ms: i64) -> RawEvent {
        RawEvent::new("BidCos-RF", "HM-1:1", "STATE", serde_json::json!(true)).at(from_millis(ms))
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn should_subscribe_on_first_register_only() {
        let (manager, remote, _) = manager();
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();
        manager.register(RecordingListener::new("b", &j)).await.unwrap();
        assert!(manager.is_subscribed().await);
        assert_eq!(remote.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn should_keep_subscription_iff_listeners_present() {
        let (manager, remote, _) = manager();
        let j = journal();
        let a = manager.register(RecordingListener::new("a", &j)).await.unwrap();
        let b = manager.register(RecordingListener::new("b", &j)).await.unwrap();

        manager.unregister(a).await.unwrap();
        assert!(manager.is_subscribed().await);
        assert_eq!(remote.active_subscriptions(), 1);

        manager.unregister(b).await.unwrap();
        assert!(!manager.is_subscribed().await);
        assert_eq!(remote.active_subscriptions(), 0);

        manager.register(RecordingListener::new("c", &j)).await.unwrap();
        assert!(manager.is_subscribed().await);
        assert_eq!(remote.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn should_return_same_handle_for_same_listener() {
        let (manager, _, _) = manager();
        let j = journal();
        let listener: Arc<dyn Listener> = RecordingListener::new("a", &j);
        let first = manager.register(Arc::clone(&listener)).await.unwrap();
        let second = manager.register(listener).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.listener_count(), 1);
    }

    #[tokio::test]
    async fn should_reject_unknown_handle() {
        let (manager, _, _) = manager();
        let j = journal();
        let handle = manager.register(RecordingListener::new("a", &j)).await.unwrap();
        manager.unregister(handle).await.unwrap();
        assert!(matches!(
            manager.unregister(handle).await,
            Err(CcuError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn should_retry_subscription_setup() {
        let (manager, remote, _) = manager();
        remote.failing_subscribes.store(2, Ordering::SeqCst);
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();
        assert_eq!(remote.subscribe_calls.load(Ordering::SeqCst), 3);
        assert!(manager.is_subscribed().await);
    }

    #[tokio::test]
    async fn should_not_retry_permanently_refused_subscription() {
        let (manager, remote, _) = manager();
        remote.refuse_subscribes.store(true, Ordering::SeqCst);
        let j = journal();
        let result = manager.register(RecordingListener::new("a", &j)).await;
        assert!(matches!(result, Err(CcuError::Remote(_))));
        assert_eq!(remote.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn should_not_add_listener_when_subscription_fails() {
        let (manager, remote, _) = manager();
        remote.failing_subscribes.store(10, Ordering::SeqCst);
        let j = journal();
        let result = manager.register(RecordingListener::new("a", &j)).await;
        assert!(matches!(result, Err(CcuError::Remote(_))));
        assert_eq!(manager.listener_count(), 0);
        assert!(!manager.is_subscribed().await);
    }

    #[tokio::test]
    async fn should_deliver_to_listeners_in_registration_order() {
        let (manager, remote, log) = manager();
        let j = journal();
        manager.register(RecordingListener::new("A", &j)).await.unwrap();
        manager.register(RecordingListener::new("B", &j)).await.unwrap();

        remote.emit(&state_event(1_000));
        assert_eq!(manager.pump().await.unwrap(), 1);

        let seen = j.lock().unwrap().clone();
        let names: Vec<&str> = seen.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(seen[0].1.source, "HM-1:1.STATE");
        assert_eq!(seen[0].1.kind, EventKind::DeviceStateChange);
        assert_eq!(seen[0].1.id, seen[1].1.id);
        assert_eq!(log.events().len(), 1);
    }

    #[tokio::test]
    async fn should_suppress_duplicate_raw_events() {
        let (manager, _, log) = manager();
        let first = manager.on_remote_event(state_event(5)).await.unwrap();
        let second = manager.on_remote_event(state_event(5)).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert!(second.event.is_none());
        assert_eq!(log.events().len(), 1);

        manager.on_remote_event(state_event(6)).await.unwrap();
        assert_eq!(log.events().len(), 2);
    }

    #[tokio::test]
    async fn should_suppress_redelivery_after_window_eviction() {
        let (manager, _, log) = manager();
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();

        manager.on_remote_event(state_event(5)).await.unwrap();
        for ms in 100..117 {
            manager.on_remote_event(state_event(ms)).await.unwrap();
        }
        let again = manager.on_remote_event(state_event(5)).await.unwrap();

        assert!(again.duplicate);
        assert_eq!(log.events().len(), 18);
        let at_five = log
            .events()
            .iter()
            .filter(|e| e.timestamp == from_millis(5))
            .count();
        assert_eq!(at_five, 1);
        assert_eq!(j.lock().unwrap().len(), 18);
    }

    #[tokio::test]
    async fn should_suppress_redelivery_seen_by_previous_manager() {
        let log = Arc::new(InMemoryEventLog::default());
        {
            let remote = Arc::new(FakeRemote::default());
            let first = EventManager::new(remote, Arc::clone(&log), config());
            first.on_remote_event(state_event(5)).await.unwrap();
        }

        let remote = Arc::new(FakeRemote::default());
        let restarted = EventManager::new(remote, Arc::clone(&log), config());
        let again = restarted.on_remote_event(state_event(5)).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(log.events().len(), 1);
    }

    #[tokio::test]
    async fn should_isolate_failing_and_panicking_listeners() {
        let (manager, _, _) = manager();
        let j = journal();
        manager.register(RecordingListener::failing("bad", &j)).await.unwrap();
        manager.register(RecordingListener::panicking("worse", &j)).await.unwrap();
        manager.register(RecordingListener::new("good", &j)).await.unwrap();

        let report = manager.on_remote_event(state_event(1)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(j.lock().unwrap().len(), 1);
        assert_eq!(manager.failure_counts().get("bad"), Some(&1));
        assert_eq!(manager.failure_counts().get("worse"), Some(&1));
    }

    #[tokio::test]
    async fn should_surface_storage_error_and_allow_redelivery() {
        let (manager, _, log) = manager();
        log.failing_appends.store(1, Ordering::SeqCst);
        let result = manager.on_remote_event(state_event(9)).await;
        assert!(matches!(result, Err(CcuError::Storage(_))));

        let retry = manager.on_remote_event(state_event(9)).await.unwrap();
        assert!(!retry.duplicate);
        assert_eq!(log.events().len(), 1);
    }

    #[tokio::test]
    async fn should_reject_malformed_raw_address() {
        let (manager, _, log) = manager();
        let raw = RawEvent::new("BidCos-RF", "garbage", "STATE", serde_json::json!(1));
        assert!(matches!(
            manager.on_remote_event(raw).await,
            Err(CcuError::Validation(_))
        ));
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn should_resubscribe_after_transport_loss() {
        let (manager, remote, _) = manager();
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();

        remote.break_subscriptions();
        assert_eq!(remote.active_subscriptions(), 0);
        manager.pump().await.unwrap();

        assert!(manager.is_subscribed().await);
        assert_eq!(remote.active_subscriptions(), 1);
        assert_eq!(remote.subscribe_calls.load(Ordering::SeqCst), 2);

        remote.emit(&state_event(42));
        manager.pump().await.unwrap();
        assert_eq!(j.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_restore_subscription_on_tick_after_failed_recovery() {
        let (manager, remote, _) = manager();
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();

        remote.failing_subscribes.store(3, Ordering::SeqCst);
        remote.break_subscriptions();
        manager.pump().await.unwrap();
        assert!(!manager.is_subscribed().await);

        assert!(manager.ensure_subscribed().await.unwrap());
        assert!(manager.is_subscribed().await);
    }

    #[tokio::test]
    async fn should_dispatch_events_buffered_before_teardown() {
        let (manager, remote, log) = manager();
        let j = journal();
        let handle = manager.register(RecordingListener::new("a", &j)).await.unwrap();

        remote.emit(&state_event(1));
        remote.emit(&state_event(2));
        manager.unregister(handle).await.unwrap();
        assert_eq!(remote.active_subscriptions(), 0);
        assert_eq!(log.events().len(), 2);
        assert_eq!(manager.pump().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_release_subscription_when_run_stops() {
        let (manager, remote, log) = manager();
        let j = journal();
        manager.register(RecordingListener::new("a", &j)).await.unwrap();
        remote.emit(&state_event(1));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let manager = Arc::new(manager);
        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(remote.active_subscriptions(), 0);
        assert_eq!(manager.listener_count(), 0);
        assert_eq!(log.events().len(), 1);
        assert_eq!(j.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_release_subscription_on_drop() {
        let remote = Arc::new(FakeRemote::default());
        {
            let manager = EventManager::new(
                Arc::clone(&remote),
                Arc::new(InMemoryEventLog::default()),
                config(),
            );
            let j = journal();
            manager.register(RecordingListener::new("a", &j)).await.unwrap();
            assert_eq!(remote.active_subscriptions(), 1);
        }
        tokio::task::yield_now().await;
        assert_eq!(remote.active_subscriptions(), 0);
    }

    #[test]
    fn should_forget_oldest_keys_beyond_window() {
        let mut recent = RecentKeys::new(2);
        assert!(recent.insert(("a".into(), 1)));
        assert!(recent.insert(("a".into(), 2)));
        assert!(recent.insert(("a".into(), 3)));
        assert!(recent.insert(("a".into(), 1)));
        assert!(!recent.insert(("a".into(), 3)));
    }
}
