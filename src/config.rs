use std::str::FromStr;
use std::time::Duration;

use crate::stream::{PollerConfig, DEFAULT_GRACE_WINDOW_SECS, DEFAULT_REPLAY_CAPACITY};

/// Service configuration
///
/// Built from environment variables by [`StreamConfig::from_env`]; every field has
/// a default so the service starts with no configuration at all.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Shared secret subscribers must present as `?token=`
    pub auth_token: String,

    /// HTTP listen address
    pub bind_addr: String,

    /// Pause between poll cycles in milliseconds
    pub poll_interval_ms: u64,

    /// Events kept per topic for warm-starting new subscribers
    pub buffer_capacity: usize,

    /// Initial cursor look-back in seconds
    pub grace_window_secs: i64,

    /// Maximum rows returned by a single fetch
    pub fetch_limit: i64,

    /// Per-fetch timeout in milliseconds
    pub query_timeout_ms: u64,

    /// Batches a subscriber may have queued before it is dropped as stalled
    pub subscriber_queue_capacity: usize,

    /// Per socket write timeout in milliseconds
    pub send_timeout_ms: u64,

    /// Interval between server pings in seconds
    pub heartbeat_interval_secs: u64,

    /// Event store connection
    pub store: StoreConfig,
}

/// Event store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Full connection URL; overrides the individual parts when set
    pub url: Option<String>,

    pub host: String,

    /// PostgreSQL-protocol port of the store
    pub port: u16,

    pub username: String,

    pub password: String,

    pub database: String,

    /// Maximum pooled connections
    pub pool_size: u32,
}

impl StreamConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = StoreConfig {
            url: lookup("ORDERFLOW_DATABASE_URL").filter(|url| !url.is_empty()),
            host: lookup("CLICKHOUSE_HOST").unwrap_or_else(default_store_host),
            port: parse_or(&lookup, "CLICKHOUSE_PORT", default_store_port()),
            username: lookup("CLICKHOUSE_USER").unwrap_or_else(default_store_user),
            password: lookup("CLICKHOUSE_PASSWORD").unwrap_or_default(),
            database: lookup("CLICKHOUSE_DATABASE").unwrap_or_else(default_store_database),
            pool_size: parse_or(&lookup, "DB_POOL_MAX_SIZE", default_pool_size()),
        };

        Self {
            auth_token: lookup("ORDERFLOW_TOKEN").unwrap_or_else(default_token),
            bind_addr: lookup("ORDERFLOW_BIND_ADDR").unwrap_or_else(default_bind_addr),
            poll_interval_ms: parse_or(&lookup, "POLL_INTERVAL_MS", default_poll_interval_ms()),
            buffer_capacity: parse_or(&lookup, "REPLAY_BUFFER_CAPACITY", default_buffer_capacity()),
            grace_window_secs: parse_or(&lookup, "CURSOR_GRACE_SECS", default_grace_window_secs()),
            fetch_limit: parse_or(&lookup, "FETCH_LIMIT", default_fetch_limit()),
            query_timeout_ms: parse_or(&lookup, "QUERY_TIMEOUT_MS", default_query_timeout_ms()),
            subscriber_queue_capacity: parse_or(
                &lookup,
                "SUBSCRIBER_QUEUE_CAPACITY",
                default_subscriber_queue_capacity(),
            ),
            send_timeout_ms: parse_or(&lookup, "SEND_TIMEOUT_MS", default_send_timeout_ms()),
            heartbeat_interval_secs: parse_or(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                default_heartbeat_interval_secs(),
            ),
            store,
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
        }
    }

    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl StoreConfig {
    /// Connection URL for the store's PostgreSQL wire endpoint
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let username = urlencoding::encode(&self.username);
        if self.password.is_empty() {
            format!(
                "postgres://{}@{}:{}/{}",
                username, self.host, self.port, self.database
            )
        } else {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                username,
                urlencoding::encode(&self.password),
                self.host,
                self.port,
                self.database
            )
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_store_host(),
            port: default_store_port(),
            username: default_store_user(),
            password: String::new(),
            database: default_store_database(),
            pool_size: default_pool_size(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️  Invalid {}={:?}, using default {:?}", key, raw, default);
            default
        }),
    }
}

// Defaults
fn default_token() -> String {
    "orderflow-secret".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_buffer_capacity() -> usize {
    DEFAULT_REPLAY_CAPACITY
}

fn default_grace_window_secs() -> i64 {
    DEFAULT_GRACE_WINDOW_SECS
}

fn default_fetch_limit() -> i64 {
    5000
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_subscriber_queue_capacity() -> usize {
    256
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_store_host() -> String {
    "localhost".to_string()
}

fn default_store_port() -> u16 {
    9005
}

fn default_store_user() -> String {
    "default".to_string()
}

fn default_store_database() -> String {
    "binance_trades".to_string()
}

fn default_pool_size() -> u32 {
    4
}
