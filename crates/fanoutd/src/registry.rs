use crate::metrics::gauges;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one WebSocket connection, unique for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry entry used to push text frames to one connection.
///
/// The registry owns the only long-lived clone of `tx`. Once a subscriber is
/// removed and in-flight snapshots are dropped, the connection's outbound
/// receiver yields `None` and the connection closes itself.
#[derive(Clone, Debug)]
pub struct Subscriber {
    id: SubscriberId,
    addr: SocketAddr,
    tx: mpsc::Sender<Arc<str>>,
}

impl Subscriber {
    /// Create a handle for a connection from `addr` with an outbound queue of
    /// `queue` frames. The receiver belongs to the connection task.
    #[must_use]
    pub fn new(addr: SocketAddr, queue: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(queue);
        let subscriber = Self {
            id: SubscriberId::next(),
            addr,
            tx,
        };
        (subscriber, rx)
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remote address, for logging.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a frame without waiting. Fails if the queue is full or the
    /// connection is gone.
    pub(crate) fn try_send(
        &self,
        frame: Arc<str>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<str>>> {
        self.tx.try_send(frame)
    }
}

/// Guarded set of live subscribers.
///
/// Every operation takes the same mutex. Snapshots are copies, so the guard is
/// never held while frames are sent.
#[derive(Debug, Default)]
pub struct Registry {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        // A panic while holding the guard cannot leave the map half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. Returns `false` if its id is already present.
    pub fn add(&self, subscriber: Subscriber) -> bool {
        let mut subscribers = self.guard();
        if subscribers.contains_key(&subscriber.id) {
            return false;
        }
        subscribers.insert(subscriber.id, subscriber);
        gauges::set_subscribers_active(subscribers.len());
        true
    }

    /// Unregister a subscriber. Removing an absent id is a no-op returning `false`.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.guard();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            gauges::set_subscribers_active(subscribers.len());
        }
        removed
    }

    /// Point-in-time copy of every live subscriber, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.guard().values().cloned().collect()
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.guard().contains_key(&id)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns `true` if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
