use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::ConnectivitySource;

/// Buffer for reconnect events. Slow receivers only ever need the latest.
const EVENT_BUFFER_SIZE: usize = 16;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityEvent {
    /// Offline → online transition.
    Reconnected { at: DateTime<Utc> },
    /// Online → offline transition.
    Disconnected { at: DateTime<Utc> },
}

struct Inner {
    online: AtomicBool,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    /// Held while delivering, so subscribers observe transitions in order.
    dispatch: Mutex<()>,
    events: broadcast::Sender<ReachabilityEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking subscriber must not wedge the monitor
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn snapshot(&self) -> Vec<Callback> {
        lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers).retain(|(sid, _)| *sid != id);
    }
}

/// Tracks whether the device is online.
///
/// State lives in memory only. Subscribers get the current state on
/// subscribe and then one call per transition; repeated identical reports
/// are swallowed. Offline → online transitions are also published as
/// `ReachabilityEvent::Reconnected` for the sync engine.
///
/// Callbacks run synchronously on the reporting task and must not call
/// `handle_change` or `subscribe` themselves.
#[derive(Clone)]
pub struct ReachabilityMonitor {
    inner: Arc<Inner>,
}

impl ReachabilityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(initially_online),
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                dispatch: Mutex::new(()),
                events,
            }),
        }
    }

    /// Seed state from one query of `source`. An unavailable source means
    /// offline.
    pub async fn from_source(source: &dyn ConnectivitySource) -> Self {
        let initial = match source.check().await {
            Some(online) => online,
            None => {
                warn!("Connectivity API unavailable, assuming offline");
                false
            }
        };
        debug!(online = initial, "Reachability seeded");
        Self::new(initial)
    }

    /// Last known state. No I/O.
    pub fn is_connected(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Register `callback`. It is invoked immediately with the current state
    /// and again on every transition until the returned handle is dropped or
    /// `unsubscribe`d.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: Callback = Arc::new(callback);

        let _dispatch = lock(&self.inner.dispatch);
        lock(&self.inner.subscribers).push((id, callback.clone()));
        callback(self.is_connected());

        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn reconnect_events(&self) -> broadcast::Receiver<ReachabilityEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Report a connectivity observation. Returns true if it was a transition.
    pub fn handle_change(&self, online: bool) -> bool {
        let _dispatch = lock(&self.inner.dispatch);
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let at = Utc::now();
        if online {
            info!("Network: online");
            // No receivers is fine
            let _ = self.inner.events.send(ReachabilityEvent::Reconnected { at });
        } else {
            warn!("Network: offline");
            let _ = self.inner.events.send(ReachabilityEvent::Disconnected { at });
        }

        for callback in self.inner.snapshot() {
            callback(online);
        }
        true
    }

    /// Poll `source` every `interval` and feed the results in. A source that
    /// stops answering counts as offline.
    pub fn spawn_listener(
        &self,
        source: Arc<dyn ConnectivitySource>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = source.check().await.unwrap_or(false);
                monitor.handle_change(online);
            }
        })
    }
}

/// Disposer returned by `ReachabilityMonitor::subscribe`.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::source::StaticSource;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |online| sink.lock().unwrap().push(online))
    }

    #[test]
    fn test_subscribe_receives_current_state_immediately() {
        let monitor = ReachabilityMonitor::new(true);
        let (calls, cb) = recorder();
        let _sub = monitor.subscribe(cb);
        assert_eq!(*calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_duplicate_reports_are_swallowed() {
        let monitor = ReachabilityMonitor::new(false);
        let (calls, cb) = recorder();
        let _sub = monitor.subscribe(cb);

        assert!(monitor.handle_change(true));
        assert!(!monitor.handle_change(true));

        // Initial state plus exactly one transition
        assert_eq!(*calls.lock().unwrap(), vec![false, true]);
        assert!(monitor.is_connected());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let monitor = ReachabilityMonitor::new(false);
        let (calls, cb) = recorder();
        let sub = monitor.subscribe(cb);
        assert_eq!(monitor.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(monitor.subscriber_count(), 0);
        monitor.handle_change(true);
        assert_eq!(*calls.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_reconnect_event_only_on_offline_to_online() {
        let monitor = ReachabilityMonitor::new(false);
        let mut events = monitor.reconnect_events();

        monitor.handle_change(true);
        monitor.handle_change(true);
        monitor.handle_change(false);

        assert!(matches!(
            events.recv().await.unwrap(),
            ReachabilityEvent::Reconnected { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ReachabilityEvent::Disconnected { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_source_means_offline() {
        let monitor = ReachabilityMonitor::from_source(&StaticSource::unavailable()).await;
        assert!(!monitor.is_connected());

        let monitor = ReachabilityMonitor::from_source(&StaticSource::new(true)).await;
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_feeds_source_into_monitor() {
        let source = Arc::new(StaticSource::new(true));
        let monitor = ReachabilityMonitor::new(false);
        let handle = monitor.spawn_listener(source.clone(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.is_connected());

        source.set(Some(false));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!monitor.is_connected());

        handle.abort();
    }
}
