use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::Topic;

/// Default look-back applied to a topic's cursor before its first poll
pub const DEFAULT_GRACE_WINDOW_SECS: i64 = 30;

/// Time provider, swapped for a fixed clock in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Per-topic exclusive lower bound for the next fetch
///
/// A topic's cursor starts at `now - grace_window` on first reference and only
/// ever moves forward, to the event_time of a row the source actually returned.
pub struct CursorStore {
    cursors: DashMap<Topic, DateTime<Utc>>,
    grace_window: Duration,
    clock: Clock,
}

impl CursorStore {
    pub fn new(grace_window: Duration) -> Self {
        Self::with_clock(grace_window, Arc::new(Utc::now))
    }

    pub fn with_clock(grace_window: Duration, clock: Clock) -> Self {
        Self {
            cursors: DashMap::new(),
            grace_window,
            clock,
        }
    }

    /// Current cursor, initializing it on first reference
    pub fn get(&self, topic: &Topic) -> DateTime<Utc> {
        *self
            .cursors
            .entry(topic.clone())
            .or_insert_with(|| (self.clock)() - self.grace_window)
    }

    /// Cursor if the topic has been referenced, without initializing it
    pub fn peek(&self, topic: &Topic) -> Option<DateTime<Utc>> {
        self.cursors.get(topic).map(|cursor| *cursor)
    }

    /// Move the cursor forward to `to`
    ///
    /// Returns false (and leaves the cursor alone) if `to` is not after the
    /// current position.
    pub fn advance(&self, topic: &Topic, to: DateTime<Utc>) -> bool {
        let mut cursor = self
            .cursors
            .entry(topic.clone())
            .or_insert_with(|| (self.clock)() - self.grace_window);

        if to > *cursor {
            *cursor = to;
            true
        } else {
            false
        }
    }
}

impl Default for CursorStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_GRACE_WINDOW_SECS))
    }
}
