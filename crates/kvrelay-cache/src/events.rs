//! # Cache Notifications
//!
//! Observers registered on a [`TieredCache`](crate::TieredCache) receive
//! every event synchronously, inside the call that caused it, after the
//! tier mutation has completed. Observers may call back into the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::entry::Tier;

/// Event emitted by the tiered cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit { key: String, tier: Tier },
    Miss { key: String },
    Set { key: String },
    /// Entry dropped from the cache to make room
    Evict { key: String, tier: Tier },
}

impl CacheEvent {
    /// Wire-style event name (`cache:hit`, `cache:miss`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hit { .. } => "cache:hit",
            Self::Miss { .. } => "cache:miss",
            Self::Set { .. } => "cache:set",
            Self::Evict { .. } => "cache:evict",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Hit { key, .. }
            | Self::Miss { key }
            | Self::Set { key }
            | Self::Evict { key, .. } => key,
        }
    }
}

/// Receives cache events.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event);
    }
}

/// Handle returned by `subscribe`, used to detach an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered list of registered observers.
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, Arc<dyn CacheObserver>)>,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Arc<dyn CacheObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.observers.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    /// Cloned handles so delivery happens without holding the list lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn CacheObserver>> {
        self.observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

/// Forwards events onto a broadcast channel for a monitoring task.
///
/// Sending never blocks; with no live receivers the event is dropped, and a
/// lagging receiver loses the oldest events first.
#[derive(Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<CacheEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<CacheEvent>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }
}

impl CacheObserver for BroadcastObserver {
    fn on_event(&self, event: &CacheEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_names() {
        let hit = CacheEvent::Hit {
            key: "k".into(),
            tier: Tier::L1,
        };
        assert_eq!(hit.name(), "cache:hit");
        assert_eq!(hit.key(), "k");
        assert_eq!(CacheEvent::Miss { key: "k".into() }.name(), "cache:miss");
        assert_eq!(CacheEvent::Set { key: "k".into() }.name(), "cache:set");
        assert_eq!(
            CacheEvent::Evict {
                key: "k".into(),
                tier: Tier::L2
            }
            .name(),
            "cache:evict"
        );
    }

    #[test]
    fn test_observer_list_add_remove() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut list = ObserverList::default();
        let id = list.add(Arc::new(move |event: &CacheEvent| {
            sink.lock().unwrap().push(event.name());
        }));
        assert_eq!(list.len(), 1);

        for observer in list.snapshot() {
            observer.on_event(&CacheEvent::Set { key: "a".into() });
        }
        assert_eq!(*seen.lock().unwrap(), vec!["cache:set"]);

        assert!(list.remove(id));
        assert!(!list.remove(id));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_broadcast_observer_delivers() {
        let (observer, mut rx) = BroadcastObserver::new(8);
        observer.on_event(&CacheEvent::Miss { key: "x".into() });
        assert_eq!(rx.try_recv().unwrap(), CacheEvent::Miss { key: "x".into() });
    }

    #[test]
    fn test_broadcast_without_receivers_is_silent() {
        let (observer, rx) = BroadcastObserver::new(1);
        drop(rx);
        observer.on_event(&CacheEvent::Miss { key: "x".into() });
    }
}
