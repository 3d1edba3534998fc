// Library Crate Root
// lib.rs

pub mod api;
pub mod config;
pub mod database;
pub mod models;
pub mod stream;
pub mod websocket;

pub use api::{create_router, ApiState};
pub use config::{StoreConfig, StreamConfig};
pub use models::{OrderflowEvent, Topic};
pub use stream::{
    CursorStore, EventSource, OrderflowPoller, PollerConfig, ReplayBuffer, StreamError,
    SubscriberRegistry,
};
pub use websocket::WsState;
