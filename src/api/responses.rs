use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::stream::PollerStats;

/// Liveness response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-topic view of the fan-out state
#[derive(Debug, Serialize, ToSchema)]
pub struct TopicStatsResponse {
    pub topic: String,
    pub subscribers: usize,
    /// Events currently held for warm start
    pub buffered: usize,
    /// Exclusive lower bound of the next fetch (absent until first polled)
    pub cursor: Option<DateTime<Utc>>,
}

/// Service statistics
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub poller: PollerStats,
    pub topics: Vec<TopicStatsResponse>,
    pub timestamp: DateTime<Utc>,
}
