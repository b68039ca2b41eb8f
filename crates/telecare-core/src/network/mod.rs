//! Connectivity state and transition notifications.
//!
//! The host platform feeds reachability into [`NetworkMonitor::set_online`].
//! A fallback poller ([`spawn_poller`]) does the same from a periodic
//! [`ConnectivityProbe`] for hosts without a push signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::util::is_http_url;
use crate::{Error, Result};

/// Default fallback poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks whether the remote service is reachable.
///
/// Cloning shares the same state and subscriber list.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Report the current reachability.
    ///
    /// Returns whether this was a transition. Subscribers run once per
    /// transition, in subscription order, on the caller's task.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!(
            "Network is now {}",
            if online { "online" } else { "offline" }
        );

        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(online);
        }
        true
    }

    /// Register a transition callback. Dropping the handle detaches it.
    #[must_use = "dropping the subscription detaches the callback"]
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers().push((id, Arc::new(callback)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Async view of the state for `select!` loops.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Handle returned by [`NetworkMonitor::subscribe`].
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Detach the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers().retain(|(id, _)| *id != self.id);
        }
    }
}

/// A single-shot reachability check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probes a health URL with a bounded timeout; any HTTP response counts as
/// reachable.
#[derive(Clone)]
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into().trim().to_string();
        if !is_http_url(&url) {
            return Err(Error::Config(format!(
                "health url must include http:// or https://, got '{url}'"
            )));
        }
        Ok(Self {
            url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe to {} failed: {}", self.url, error);
                false
            }
        }
    }
}

/// Poll `probe` every `interval` and feed the result into `monitor`.
pub fn spawn_poller(
    monitor: NetworkMonitor,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let reachable = probe.is_reachable().await;
            monitor.set_online(reachable);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(bool) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |name: &str| -> Box<dyn Fn(bool) + Send + Sync> {
            let log = Arc::clone(&log_for_factory);
            let name = name.to_string();
            Box::new(move |online| log.lock().unwrap().push(format!("{name}:{online}")))
        };
        (log, factory)
    }

    #[test]
    fn transitions_notify_in_subscription_order() {
        let monitor = NetworkMonitor::new(false);
        let (log, make) = recorder();

        let _first = monitor.subscribe(make("first"));
        let _second = monitor.subscribe(make("second"));

        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:true".to_string(), "second:true".to_string()]
        );
    }

    #[test]
    fn repeated_state_is_not_a_transition() {
        let monitor = NetworkMonitor::new(false);
        let (log, make) = recorder();
        let _subscription = monitor.subscribe(make("only"));

        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["only:true".to_string(), "only:false".to_string()]
        );
    }

    #[test]
    fn dropping_subscription_detaches() {
        let monitor = NetworkMonitor::new(false);
        let (log, make) = recorder();

        let kept = monitor.subscribe(make("kept"));
        let dropped = monitor.subscribe(make("dropped"));
        assert_eq!(monitor.subscriber_count(), 2);

        dropped.unsubscribe();
        monitor.set_online(true);

        assert_eq!(*log.lock().unwrap(), vec!["kept:true".to_string()]);
        drop(kept);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn subscription_outliving_monitor_is_harmless() {
        let monitor = NetworkMonitor::new(true);
        let subscription = monitor.subscribe(|_| {});
        drop(monitor);
        drop(subscription);
    }

    #[tokio::test]
    async fn watch_sees_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut receiver = monitor.watch();

        monitor.set_online(true);
        receiver.changed().await.unwrap();
        assert!(*receiver.borrow_and_update());
    }

    struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn is_reachable(&self) -> bool {
            self.answers.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_feeds_probe_results() {
        let monitor = NetworkMonitor::new(false);
        let probe = Arc::new(ScriptedProbe {
            answers: Mutex::new(VecDeque::from([true, true, false])),
        });
        let mut receiver = monitor.watch();

        let handle = spawn_poller(monitor.clone(), probe, DEFAULT_POLL_INTERVAL);

        receiver.changed().await.unwrap();
        assert!(*receiver.borrow_and_update());

        receiver.changed().await.unwrap();
        assert!(!*receiver.borrow_and_update());

        handle.abort();
    }

    #[test]
    fn http_probe_requires_http_url() {
        assert!(HttpProbe::new("example.com/health", Duration::from_secs(1)).is_err());
        assert!(HttpProbe::new("http://127.0.0.1:9/health", Duration::from_secs(1)).is_ok());
    }
}
