use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::stream::{CursorStore, OrderflowPoller, ReplayBuffer, SubscriberRegistry};

use super::responses::*;

/// Shared state for the HTTP endpoints
pub struct ApiState {
    pub registry: Arc<SubscriberRegistry>,
    pub buffers: Arc<ReplayBuffer>,
    pub cursors: Arc<CursorStore>,
    pub poller: Arc<OrderflowPoller>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

/// Poller counters and per-topic subscriber, buffer and cursor state
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Stats",
    responses(
        (status = 200, description = "Current fan-out statistics", body = StatsResponse)
    )
)]
pub async fn get_stats(State(state): State<Arc<ApiState>>) -> Json<StatsResponse> {
    let topics = state
        .registry
        .topic_counts()
        .into_iter()
        .map(|(topic, subscribers)| TopicStatsResponse {
            buffered: state.buffers.len(&topic),
            cursor: state.cursors.peek(&topic),
            topic: topic.to_string(),
            subscribers,
        })
        .collect();

    Json(StatsResponse {
        poller: state.poller.stats(),
        topics,
        timestamp: Utc::now(),
    })
}
