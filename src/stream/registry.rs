use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::models::Topic;

use super::errors::DeliveryFailure;

/// Identity of one connected subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
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

/// One serialized batch, shared by every subscriber of a topic
#[derive(Debug)]
pub struct OutboundBatch {
    /// event_time of the last event in the batch
    pub newest: DateTime<Utc>,
    /// Number of events in the batch
    pub len: usize,
    /// JSON array, ready to send as a text frame
    pub payload: String,
}

pub type OutboundSender = mpsc::Sender<Arc<OutboundBatch>>;
pub type OutboundReceiver = mpsc::Receiver<Arc<OutboundBatch>>;

/// Membership entry held by the registry
///
/// The registry only holds the sending half of the subscriber's outbound queue;
/// the session owns the socket and the receiving half.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub sender: OutboundSender,
}

impl SubscriberHandle {
    /// Create a handle and the receiving end of its bounded outbound queue
    pub fn channel(queue_capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                id: SubscriberId::new(),
                sender,
            },
            receiver,
        )
    }
}

/// Result of pushing one batch to a topic's subscribers
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<(SubscriberId, DeliveryFailure)>,
}

/// Process-wide map of topic -> live subscribers
///
/// Topic entries are created lazily and never removed; an empty set simply makes
/// the topic inactive. All operations lock a single DashMap shard, so unrelated
/// topics never contend on one global lock.
#[derive(Default)]
pub struct SubscriberRegistry {
    topics: DashMap<Topic, HashMap<SubscriberId, OutboundSender>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle under a topic; returns false if it was already present
    pub fn register(&self, topic: &Topic, handle: SubscriberHandle) -> bool {
        let mut subscribers = self.topics.entry(topic.clone()).or_default();
        if subscribers.contains_key(&handle.id) {
            return false;
        }
        subscribers.insert(handle.id, handle.sender);

        tracing::debug!(
            "Subscriber {} registered on {} ({} total)",
            handle.id,
            topic,
            subscribers.len()
        );
        true
    }

    /// Remove a handle; unregistering an absent handle is a no-op
    pub fn unregister(&self, topic: &Topic, id: SubscriberId) -> bool {
        let removed = self
            .topics
            .get_mut(topic)
            .map(|mut subscribers| subscribers.remove(&id).is_some())
            .unwrap_or(false);

        if removed {
            tracing::debug!("Subscriber {} unregistered from {}", id, topic);
        }
        removed
    }

    /// Topics with at least one subscriber
    pub fn active_topics(&self) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of the handles currently registered under a topic
    pub fn subscribers_of(&self, topic: &Topic) -> Vec<SubscriberId> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Subscriber count for every known topic, including inactive ones
    pub fn topic_counts(&self) -> Vec<(Topic, usize)> {
        let mut counts: Vec<(Topic, usize)> = self
            .topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();
        counts.sort_by(|a, b| a.0.cmp(&b.0));
        counts
    }

    /// Queue a batch for every subscriber of a topic without blocking
    ///
    /// Pushes happen while the topic's entry is held, so no push can be queued
    /// for a handle after its `unregister` call has returned. Failed handles are
    /// reported, not removed; call [`prune`](Self::prune) with them afterwards.
    pub fn broadcast(&self, topic: &Topic, batch: Arc<OutboundBatch>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let Some(subscribers) = self.topics.get(topic) else {
            return report;
        };

        for (id, sender) in subscribers.iter() {
            match sender.try_send(Arc::clone(&batch)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => report.failed.push((*id, DeliveryFailure::QueueFull)),
                Err(TrySendError::Closed(_)) => report.failed.push((*id, DeliveryFailure::Closed)),
            }
        }

        report
    }

    /// Drop the given handles from a topic, returning how many were present
    pub fn prune(&self, topic: &Topic, ids: &[SubscriberId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let Some(mut subscribers) = self.topics.get_mut(topic) else {
            return 0;
        };

        ids.iter()
            .filter(|id| subscribers.remove(*id).is_some())
            .count()
    }

    /// Register a fresh subscriber and return its RAII registration
    pub fn subscribe(self: &Arc<Self>, topic: &Topic, queue_capacity: usize) -> Subscription {
        let (handle, receiver) = SubscriberHandle::channel(queue_capacity);
        let id = handle.id;
        self.register(topic, handle);

        Subscription {
            id,
            topic: topic.clone(),
            receiver,
            registry: Arc::clone(self),
        }
    }
}

/// A live registration that unregisters itself exactly once when dropped
///
/// Dropping closes the outbound queue before unregistering, so anything the
/// loop tries to push after that point fails instead of being delivered.
pub struct Subscription {
    id: SubscriberId,
    topic: Topic,
    receiver: OutboundReceiver,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next batch for this subscriber; `None` once the loop has pruned it
    pub async fn recv(&mut self) -> Option<Arc<OutboundBatch>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        self.registry.unregister(&self.topic, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(len: usize) -> Arc<OutboundBatch> {
        Arc::new(OutboundBatch {
            newest: Utc::now(),
            len,
            payload: "[]".to_string(),
        })
    }

    #[test]
    fn test_register_is_set_semantics() {
        let registry = SubscriberRegistry::new();
        let topic = Topic::new("btcusdt");
        let (handle, _rx) = SubscriberHandle::channel(4);

        assert!(registry.register(&topic, handle.clone()));
        assert!(!registry.register(&topic, handle));
        assert_eq!(registry.subscriber_count(&topic), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let topic = Topic::new("btcusdt");
        let (handle, _rx) = SubscriberHandle::channel(4);
        let id = handle.id;
        registry.register(&topic, handle);

        assert!(registry.unregister(&topic, id));
        assert!(!registry.unregister(&topic, id));
        assert!(!registry.unregister(&Topic::new("never-seen"), id));
        assert!(registry.subscribers_of(&topic).is_empty());
    }

    #[test]
    fn test_active_topics_skip_empty_sets() {
        let registry = SubscriberRegistry::new();
        let btc = Topic::new("btcusdt");
        let eth = Topic::new("ethusdt");
        let (btc_handle, _btc_rx) = SubscriberHandle::channel(4);
        let (eth_handle, _eth_rx) = SubscriberHandle::channel(4);
        let eth_id = eth_handle.id;

        registry.register(&btc, btc_handle);
        registry.register(&eth, eth_handle);
        registry.unregister(&eth, eth_id);

        assert_eq!(registry.active_topics(), vec![btc.clone()]);
        // Emptied topics stay known
        assert_eq!(registry.topic_counts(), vec![(btc, 1), (eth, 0)]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let registry = SubscriberRegistry::new();
        let topic = Topic::new("btcusdt");
        let (a, mut rx_a) = SubscriberHandle::channel(4);
        let (b, mut rx_b) = SubscriberHandle::channel(4);
        registry.register(&topic, a);
        registry.register(&topic, b);

        let report = registry.broadcast(&topic, batch(2));

        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        assert_eq!(rx_a.recv().await.unwrap().len, 2);
        assert_eq!(rx_b.recv().await.unwrap().len, 2);
    }

    #[tokio::test]
    async fn test_broadcast_reports_full_and_closed_queues() {
        let registry = SubscriberRegistry::new();
        let topic = Topic::new("btcusdt");
        let (healthy, mut healthy_rx) = SubscriberHandle::channel(4);
        let (stalled, _stalled_rx) = SubscriberHandle::channel(1);
        let (gone, gone_rx) = SubscriberHandle::channel(4);
        let stalled_id = stalled.id;
        let gone_id = gone.id;
        registry.register(&topic, healthy);
        registry.register(&topic, stalled);
        registry.register(&topic, gone);
        drop(gone_rx);

        registry.broadcast(&topic, batch(1));
        let report = registry.broadcast(&topic, batch(1));

        assert_eq!(report.delivered, 1);
        assert!(report.failed.contains(&(stalled_id, DeliveryFailure::QueueFull)));
        assert!(report.failed.contains(&(gone_id, DeliveryFailure::Closed)));
        assert!(healthy_rx.recv().await.is_some());

        let failed: Vec<SubscriberId> = report.failed.iter().map(|(id, _)| *id).collect();
        assert_eq!(registry.prune(&topic, &failed), 2);
        assert_eq!(registry.subscriber_count(&topic), 1);
    }

    #[tokio::test]
    async fn test_prune_closes_subscription() {
        let registry = Arc::new(SubscriberRegistry::new());
        let topic = Topic::new("btcusdt");
        let mut subscription = registry.subscribe(&topic, 4);

        assert_eq!(registry.prune(&topic, &[subscription.id()]), 1);
        assert!(subscription.recv().await.is_none());
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let registry = Arc::new(SubscriberRegistry::new());
        let topic = Topic::new("btcusdt");

        let subscription = registry.subscribe(&topic, 4);
        let id = subscription.id();
        assert_eq!(registry.subscribers_of(&topic), vec![id]);

        drop(subscription);
        assert!(registry.subscribers_of(&topic).is_empty());
        assert!(registry.active_topics().is_empty());
    }

    #[test]
    fn test_no_push_after_unregister() {
        let registry = Arc::new(SubscriberRegistry::new());
        let topic = Topic::new("btcusdt");
        let subscription = registry.subscribe(&topic, 4);
        drop(subscription);

        let report = registry.broadcast(&topic, batch(1));
        assert_eq!(report.delivered, 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_concurrent_register_and_broadcast() {
        let registry = Arc::new(SubscriberRegistry::new());
        let topic = Topic::new("btcusdt");

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let topic = topic.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let subscription = registry.subscribe(&topic, 2);
                        registry.broadcast(&topic, batch(1));
                        drop(subscription);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.subscriber_count(&topic), 0);
    }
}
