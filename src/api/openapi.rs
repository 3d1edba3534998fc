use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::stream::PollerStats;

/// OpenAPI specification for the HTTP side of the service
///
/// The stream itself is a WebSocket at `/ws/orderflow/{coin}?token=...` and is
/// not described here.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orderflow Stream API",
        version = "1.0.0",
        description = "Near-real-time orderflow fan-out over WebSocket"
    ),
    paths(handlers::health_check, handlers::get_stats),
    components(schemas(HealthResponse, StatsResponse, TopicStatsResponse, PollerStats)),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Stats", description = "Fan-out statistics"),
    )
)]
pub struct ApiDoc;
