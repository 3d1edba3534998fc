/// Event store integration
///
/// This module provides:
/// - r2d2 connection pooling over the store's PostgreSQL wire endpoint
/// - The `orderflow` table schema and row model
/// - A repository for cursor-bounded reads, adapted to the poller's `EventSource`

pub mod connection;
pub mod models;
pub mod repositories;
pub mod schema;

pub use connection::{establish_connection_pool, DatabaseError, DatabasePool};
pub use repositories::{OrderflowRepository, OrderflowRepositoryImpl, RepositoryEventSource};
