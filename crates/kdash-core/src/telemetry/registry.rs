//! Subscriber registry
//!
//! Tracks connected clients and fans messages out to them. Each subscriber
//! owns a bounded queue; a subscriber whose queue is full or closed is
//! dropped without affecting delivery to anyone else.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ServerMessage;

/// Messages are shared between subscribers rather than cloned per client
pub type Outbound = Arc<ServerMessage>;

/// Identity of a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// A fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of a subscriber's queue
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Outbound>,
}

impl Subscriber {
    /// Create a subscriber with a queue of `capacity` messages
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: SubscriberId::new(),
                tx,
            },
            rx,
        )
    }

    /// Id of this subscriber
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the message
    pub delivered: usize,
    /// Subscribers removed because they could not accept it
    pub dropped: Vec<SubscriberId>,
}

/// Set of connected subscribers
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<HashMap<SubscriberId, mpsc::Sender<Outbound>>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber
    pub fn register(&self, subscriber: Subscriber) -> SubscriberId {
        let id = subscriber.id;
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(id, subscriber.tx);
        debug!(subscriber = %id, total = map.len(), "subscriber registered");
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let removed = map.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = map.len(), "subscriber unregistered");
        }
        removed
    }

    /// Whether a subscriber is registered
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a message to every subscriber
    pub fn broadcast(&self, message: ServerMessage) -> BroadcastReport {
        let message = Arc::new(message);
        let targets: Vec<(SubscriberId, mpsc::Sender<Outbound>)> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, tx) in targets {
            if Self::deliver(id, &tx, Arc::clone(&message)) {
                report.delivered += 1;
            } else {
                report.dropped.push(id);
            }
        }

        for id in &report.dropped {
            self.unregister(*id);
        }
        report
    }

    /// Deliver a message to one subscriber. A subscriber that cannot accept
    /// it is removed.
    pub fn send_to(&self, id: SubscriberId, message: ServerMessage) -> bool {
        let tx = match self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            Some(tx) => tx.clone(),
            None => return false,
        };

        let delivered = Self::deliver(id, &tx, Arc::new(message));
        if !delivered {
            self.unregister(id);
        }
        delivered
    }

    fn deliver(id: SubscriberId, tx: &mpsc::Sender<Outbound>, message: Outbound) -> bool {
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %id, "subscriber queue full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "subscriber gone");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = SubscriberRegistry::new();
        let (a, mut rx_a) = Subscriber::channel(4);
        let (b, mut rx_b) = Subscriber::channel(4);
        registry.register(a);
        registry.register(b);

        let report = registry.broadcast(ServerMessage::refresh());
        assert_eq!(report.delivered, 2);
        assert!(report.dropped.is_empty());
        assert_eq!(*rx_a.recv().await.unwrap(), ServerMessage::refresh());
        assert_eq!(*rx_b.recv().await.unwrap(), ServerMessage::refresh());
    }

    #[tokio::test]
    async fn test_send_to_targets_one() {
        let registry = SubscriberRegistry::new();
        let (a, mut rx_a) = Subscriber::channel(4);
        let (b, mut rx_b) = Subscriber::channel(4);
        let id_a = registry.register(a);
        registry.register(b);

        assert!(registry.send_to(id_a, ServerMessage::success("hi")));
        assert_eq!(*rx_a.recv().await.unwrap(), ServerMessage::success("hi"));
        assert!(rx_b.try_recv().is_err());
        assert!(!registry.send_to(SubscriberId::new(), ServerMessage::refresh()));
    }

    #[test]
    fn test_full_queue_drops_subscriber() {
        let registry = SubscriberRegistry::new();
        let (slow, _rx) = Subscriber::channel(1);
        let id = registry.register(slow);

        assert_eq!(registry.broadcast(ServerMessage::refresh()).delivered, 1);
        let report = registry.broadcast(ServerMessage::refresh());
        assert_eq!(report.dropped, vec![id]);
        assert!(!registry.contains(id));
    }
}
