use dashmap::DashMap;
use std::collections::VecDeque;

use crate::models::{OrderflowEvent, Topic};

/// Default number of events kept per topic for warm-starting new subscribers
pub const DEFAULT_REPLAY_CAPACITY: usize = 2000;

/// Per-topic bounded FIFO of the most recent events
///
/// Each topic gets its own ring lazily; capacity applies independently per topic.
/// Appending to a full ring evicts the oldest entry. Snapshots copy the current
/// contents in arrival order without mutating them.
pub struct ReplayBuffer {
    buffers: DashMap<Topic, VecDeque<OrderflowEvent>>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one event, evicting the oldest if the topic's ring is full
    pub fn append(&self, topic: &Topic, event: OrderflowEvent) {
        self.extend(topic, std::iter::once(event));
    }

    /// Append a batch under a single lock acquisition
    pub fn extend<I>(&self, topic: &Topic, events: I)
    where
        I: IntoIterator<Item = OrderflowEvent>,
    {
        if self.capacity == 0 {
            return;
        }

        let mut ring = self
            .buffers
            .entry(topic.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(256)));

        for event in events {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(event);
        }
    }

    /// Copy of the topic's ring, oldest first
    pub fn snapshot(&self, topic: &Topic) -> Vec<OrderflowEvent> {
        self.buffers
            .get(topic)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, topic: &Topic) -> usize {
        self.buffers.get(topic).map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &Topic) -> bool {
        self.len(topic) == 0
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn event_at(second: i64) -> OrderflowEvent {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        OrderflowEvent::new(
            base + Duration::seconds(second),
            Decimal::from(second),
            dec!(1),
            "sell",
            dec!(-1),
            dec!(-100),
        )
    }

    #[test]
    fn test_snapshot_of_unknown_topic_is_empty() {
        let buffer = ReplayBuffer::new(10);
        assert!(buffer.snapshot(&Topic::new("btcusdt")).is_empty());
        assert!(buffer.is_empty(&Topic::new("btcusdt")));
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let buffer = ReplayBuffer::new(3);
        let topic = Topic::new("btcusdt");

        for second in 0..5 {
            buffer.append(&topic, event_at(second));
        }

        let snapshot = buffer.snapshot(&topic);
        assert_eq!(snapshot.len(), 3);
        let prices: Vec<Decimal> = snapshot.iter().map(|e| e.price).collect();
        assert_eq!(prices, vec![dec!(2), dec!(3), dec!(4)]);
    }

    #[test]
    fn test_extend_respects_capacity() {
        let buffer = ReplayBuffer::new(4);
        let topic = Topic::new("ethusdt");

        buffer.extend(&topic, (0..10).map(event_at));

        assert_eq!(buffer.len(&topic), 4);
        assert_eq!(buffer.snapshot(&topic)[0].price, dec!(6));
    }

    #[test]
    fn test_topics_are_independent() {
        let buffer = ReplayBuffer::new(2);
        let btc = Topic::new("btcusdt");
        let eth = Topic::new("ethusdt");

        buffer.extend(&btc, (0..5).map(event_at));
        buffer.append(&eth, event_at(42));

        assert_eq!(buffer.len(&btc), 2);
        assert_eq!(buffer.len(&eth), 1);
    }

    #[test]
    fn test_snapshot_does_not_drain() {
        let buffer = ReplayBuffer::new(5);
        let topic = Topic::new("btcusdt");
        buffer.extend(&topic, (0..3).map(event_at));

        assert_eq!(buffer.snapshot(&topic), buffer.snapshot(&topic));
        assert_eq!(buffer.len(&topic), 3);
    }

    #[test]
    fn test_zero_capacity_disables_replay() {
        let buffer = ReplayBuffer::new(0);
        let topic = Topic::new("btcusdt");
        buffer.append(&topic, event_at(1));
        assert!(buffer.is_empty(&topic));
    }
}
