use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::websocket::{orderflow_ws_handler, WsState};

use super::handlers::{get_stats, health_check, ApiState};
use super::openapi::ApiDoc;

/// Create the router with the orderflow stream, health/stats endpoints and Swagger UI
pub fn create_router(ws_state: Arc<WsState>, api_state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // WebSocket endpoint
        .route("/ws/orderflow/:coin", get(orderflow_ws_handler))
        .with_state(ws_state)
        .route("/health", get(health_check))
        .route("/api/v1/stats", get(get_stats))
        .with_state(api_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
