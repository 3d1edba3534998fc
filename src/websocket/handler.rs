use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use super::session::{run_session, WsState};
use crate::models::Topic;

/// Query parameters accepted on the orderflow stream endpoint
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Handle WebSocket upgrade for `/ws/orderflow/:coin?token=...`
///
/// The upgrade is always accepted; a bad token is answered with a 1008 close
/// frame before anything is registered.
pub async fn orderflow_ws_handler(
    ws: WebSocketUpgrade,
    Path(coin): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<WsState>>,
) -> Response {
    let topic = Topic::new(&coin);
    ws.on_upgrade(move |socket| run_session(socket, topic, params.token, state))
}
