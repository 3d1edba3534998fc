use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{OrderflowEvent, Topic};

use super::errors::StreamError;

/// Where the poller pulls new events from
///
/// Implementations return the topic's events with `event_time > since`, ordered
/// by event_time ascending. An empty vector means nothing new; the newest
/// event_time of a batch is that of its last element.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(
        &self,
        topic: &Topic,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderflowEvent>, StreamError>;
}

/// Keep only events strictly after `since`, ordered by event_time
///
/// Events at the cursor boundary were delivered by an earlier cycle. The sort
/// is stable so rows sharing a timestamp keep the source's order.
pub fn normalize_batch(
    since: DateTime<Utc>,
    mut events: Vec<OrderflowEvent>,
) -> Vec<OrderflowEvent> {
    events.retain(|event| event.event_time > since);
    if events.windows(2).any(|pair| pair[0].event_time > pair[1].event_time) {
        tracing::warn!("Event source returned rows out of order; re-sorting batch");
        events.sort_by_key(|event| event.event_time);
    }
    events
}
