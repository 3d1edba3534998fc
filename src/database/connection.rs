use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Type alias for the store connection pool
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Type alias for pooled connection
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Pool over the analytical store's PostgreSQL wire endpoint
#[derive(Clone)]
pub struct DatabasePool {
    pool: Arc<PgPool>,
}

impl DatabasePool {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PgPooledConnection, DatabaseError> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Database query error: {0}")]
    QueryError(String),

    #[error("Diesel error: {0}")]
    DieselError(#[from] diesel::result::Error),
}

/// Build the connection pool for the event store
///
/// Connections are opened lazily, so an unreachable store does not block
/// startup; the poller reports the failure per topic and retries every cycle.
///
/// # Arguments
/// * `database_url` - PostgreSQL-protocol URL of the store
/// * `pool_size` - Maximum number of connections
pub fn establish_connection_pool(
    database_url: &str,
    pool_size: u32,
) -> Result<DatabasePool, DatabaseError> {
    tracing::info!("Establishing event store connection pool...");

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(pool_size)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))?;

    tracing::info!("Event store pool created with max size: {}", pool_size);

    match pool.get() {
        Ok(_) => tracing::info!("Event store connection successful"),
        Err(e) => tracing::warn!("⚠️  Event store not reachable yet: {}", e),
    }

    Ok(DatabasePool::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_pool_creation() {
        // Requires a live store
        let Ok(database_url) = std::env::var("ORDERFLOW_DATABASE_URL") else {
            return;
        };

        let pool = establish_connection_pool(&database_url, 2).unwrap();
        assert!(pool.get_conn().is_ok(), "Failed to check out a connection");
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::ConnectionPoolError("timed out".to_string());
        assert_eq!(err.to_string(), "Connection pool error: timed out");
    }
}
